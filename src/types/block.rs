use ethereum_types::{Bloom, H160, H256};
use k256::ecdsa::SigningKey;
use keccak_hash::keccak;
use rlp::{DecoderError, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

use crate::crypto::{recover_address, sign_hash, Signature};
use crate::errors::{BlockError, ChainResult};
use crate::types::{Log, Transaction};

/// Block header. The header hash covers every field except `signature`,
/// so sealing a block does not change its identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub parent_hash: H256,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipt_root: H256,
    pub uncle_hash: H256,
    pub bloom: Bloom,
    pub timestamp: u64,
    pub prevrandao: H256,
    pub proposer: H160,
    pub signature: Signature,
    pub extra_data: Vec<u8>,
    pub gas_used: u64,
}

impl BlockHeader {
    fn append_unsealed(&self, stream: &mut RlpStream) {
        stream.append(&self.height);
        stream.append(&self.parent_hash);
        stream.append(&self.state_root);
        stream.append(&self.transactions_root);
        stream.append(&self.receipt_root);
        stream.append(&self.uncle_hash);
        stream.append(&self.bloom);
        stream.append(&self.timestamp);
        stream.append(&self.prevrandao);
        stream.append(&self.proposer);
        stream.append(&self.extra_data);
        stream.append(&self.gas_used);
    }

    pub fn hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(12);
        self.append_unsealed(&mut stream);
        keccak(stream.out())
    }

    /// Signs the header hash with the proposer key.
    pub fn seal(&mut self, key: &SigningKey) -> ChainResult<()> {
        self.signature = sign_hash(key, self.hash())?;
        Ok(())
    }

    /// Recovers the sealer and requires it to be the header's proposer.
    pub fn verify_seal(&self) -> ChainResult<()> {
        if self.signature.is_empty() {
            return Err(BlockError::BadSeal.into());
        }
        let sealer = recover_address(self.hash(), &self.signature)
            .map_err(|_| BlockError::BadSeal)?;
        if sealer != self.proposer {
            return Err(BlockError::BadSeal.into());
        }
        Ok(())
    }
}

impl rlp::Encodable for BlockHeader {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(13);
        self.append_unsealed(stream);
        stream.append(&self.signature.to_vec());
    }
}

impl rlp::Decodable for BlockHeader {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let signature_bytes: Vec<u8> = rlp.val_at(12)?;
        Ok(Self {
            height: rlp.val_at(0)?,
            parent_hash: rlp.val_at(1)?,
            state_root: rlp.val_at(2)?,
            transactions_root: rlp.val_at(3)?,
            receipt_root: rlp.val_at(4)?,
            uncle_hash: rlp.val_at(5)?,
            bloom: rlp.val_at(6)?,
            timestamp: rlp.val_at(7)?,
            prevrandao: rlp.val_at(8)?,
            proposer: rlp.val_at(9)?,
            extra_data: rlp.val_at(10)?,
            gas_used: rlp.val_at(11)?,
            signature: Signature::from_slice(&signature_bytes)
                .map_err(|_| DecoderError::Custom("bad signature length"))?,
        })
    }
}

/// `keccak256(rlp(uncles))`; with no uncles this is the canonical empty
/// list hash.
pub fn calc_uncle_hash(uncles: &[BlockHeader]) -> H256 {
    let mut stream = RlpStream::new();
    stream.append_list(uncles);
    keccak(stream.out())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<BlockHeader>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            uncles: Vec::new(),
        }
    }

    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn body(&self) -> BlockBody {
        BlockBody {
            transactions: self.transactions.clone(),
            uncles: self.uncles.clone(),
        }
    }

    pub fn from_parts(header: BlockHeader, body: BlockBody) -> Self {
        Self {
            header,
            transactions: body.transactions,
            uncles: body.uncles,
        }
    }
}

impl rlp::Encodable for Block {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(3);
        stream.append(&self.header);
        stream.append_list(&self.transactions);
        stream.append_list(&self.uncles);
    }
}

impl rlp::Decodable for Block {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            header: rlp.val_at(0)?,
            transactions: rlp.list_at(1)?,
            uncles: rlp.list_at(2)?,
        })
    }
}

/// Transactions and uncles, stored separately from the header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<BlockHeader>,
}

impl rlp::Encodable for BlockBody {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(2);
        stream.append_list(&self.transactions);
        stream.append_list(&self.uncles);
    }
}

impl rlp::Decodable for BlockBody {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            transactions: rlp.list_at(0)?,
            uncles: rlp.list_at(1)?,
        })
    }
}

/// Broadcast exactly once per canonically inserted block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainEvent {
    pub block: Block,
    pub logs: Vec<Log>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EMPTY_UNCLE_HASH;
    use ethereum_types::U256;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            height: 9,
            parent_hash: H256::repeat_byte(0x01),
            state_root: H256::repeat_byte(0x02),
            transactions_root: H256::repeat_byte(0x03),
            receipt_root: H256::repeat_byte(0x04),
            uncle_hash: EMPTY_UNCLE_HASH,
            bloom: Bloom::zero(),
            timestamp: 1_700_000_000,
            prevrandao: H256::repeat_byte(0x05),
            proposer: H160::repeat_byte(0x06),
            signature: Signature::default(),
            extra_data: b"aurum".to_vec(),
            gas_used: 42_000,
        }
    }

    #[test]
    fn empty_uncle_list_hashes_to_constant() {
        assert_eq!(calc_uncle_hash(&[]), EMPTY_UNCLE_HASH);
    }

    #[test]
    fn header_rlp_round_trip_preserves_hash() {
        let header = sample_header();
        let decoded: BlockHeader = rlp::decode(&rlp::encode(&header)).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash(), header.hash());
    }

    #[test]
    fn sealing_does_not_change_the_hash() {
        let mut header = sample_header();
        let unsealed = header.hash();
        let key = SigningKey::from_slice(&[9u8; 32]).expect("key");
        header.proposer = crate::crypto::address_of(&key);
        let expected = header.hash();
        header.seal(&key).unwrap();
        assert_eq!(header.hash(), expected);
        assert_ne!(unsealed, expected);
        header.verify_seal().unwrap();
    }

    #[test]
    fn seal_by_other_key_is_rejected() {
        let mut header = sample_header();
        let key = SigningKey::from_slice(&[9u8; 32]).expect("key");
        header.seal(&key).unwrap();
        assert!(header.verify_seal().is_err());
    }

    #[test]
    fn block_rlp_round_trip() {
        let tx = Transaction::new(
            H160::repeat_byte(0x10),
            0,
            U256::from(1u64),
            Vec::new(),
            21_000,
            U256::from(2u64),
            String::new(),
        );
        let block = Block::new(sample_header(), vec![tx]);
        let decoded: Block = rlp::decode(&rlp::encode(&block)).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());

        let body = block.body();
        let decoded_body: BlockBody = rlp::decode(&rlp::encode(&body)).unwrap();
        assert_eq!(decoded_body, body);
    }
}

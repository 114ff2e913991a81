use ethereum_types::{Bloom, BloomInput, H160, H256, U256};
use keccak_hash::keccak;
use rlp::{DecoderError, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

use crate::types::ConsensusEncode;

pub const RECEIPT_STATUS_SUCCESS: u8 = 1;
pub const RECEIPT_STATUS_REVERT: u8 = 2;

/// A contract log entry. Only `emitter`, `topics` and `data` are part of
/// consensus; the remaining fields locate the log for clients and are
/// filled in as the enclosing block materialises.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_hash: H256,
    pub tx_hash: H256,
    pub tx_index: u32,
    pub index: u32,
}

impl Log {
    pub fn new(address: H160, topics: Vec<H256>, data: Vec<u8>) -> Self {
        Self {
            address,
            topics,
            data,
            block_hash: H256::zero(),
            tx_hash: H256::zero(),
            tx_index: 0,
            index: 0,
        }
    }

    fn append_consensus(&self, stream: &mut RlpStream) {
        stream.begin_list(3);
        stream.append(&self.address);
        stream.append_list(&self.topics);
        stream.append(&self.data);
    }
}

impl rlp::Encodable for Log {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(7);
        stream.append(&self.address);
        stream.append_list(&self.topics);
        stream.append(&self.data);
        stream.append(&self.block_hash);
        stream.append(&self.tx_hash);
        stream.append(&self.tx_index);
        stream.append(&self.index);
    }
}

impl rlp::Decodable for Log {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            address: rlp.val_at(0)?,
            topics: rlp.list_at(1)?,
            data: rlp.val_at(2)?,
            block_hash: rlp.val_at(3)?,
            tx_hash: rlp.val_at(4)?,
            tx_index: rlp.val_at(5)?,
            index: rlp.val_at(6)?,
        })
    }
}

/// Execution result of one transaction. The consensus encoding (status,
/// cumulative gas, bloom, logs) feeds the receipts root; everything else
/// is bookkeeping for clients and the explorer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: H256,
    pub from: H160,
    pub to: Option<H160>,
    pub amount: U256,
    pub status: u8,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    pub contract_address: Option<H160>,
    pub logs: Vec<Log>,
    pub logs_bloom: Bloom,
    pub block_hash: H256,
    pub block_number: u64,
    pub tx_index: u32,
}

impl Receipt {
    pub fn new(status: u8, cumulative_gas_used: u64) -> Self {
        Self {
            tx_hash: H256::zero(),
            from: H160::zero(),
            to: None,
            amount: U256::zero(),
            status,
            cumulative_gas_used,
            gas_used: 0,
            contract_address: None,
            logs: Vec::new(),
            logs_bloom: Bloom::zero(),
            block_hash: H256::zero(),
            block_number: 0,
            tx_index: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RECEIPT_STATUS_SUCCESS
    }

    pub fn hash(&self) -> H256 {
        keccak(self.consensus_bytes())
    }
}

fn append_optional_address(stream: &mut RlpStream, address: &Option<H160>) {
    match address {
        Some(addr) => stream.append(&addr.as_bytes().to_vec()),
        None => stream.append(&Vec::<u8>::new()),
    }
}

fn read_optional_address(rlp: &Rlp, index: usize) -> Result<Option<H160>, DecoderError> {
    let bytes: Vec<u8> = rlp.val_at(index)?;
    match bytes.len() {
        0 => Ok(None),
        20 => Ok(Some(H160::from_slice(&bytes))),
        _ => Err(DecoderError::Custom("bad address length")),
    }
}

impl rlp::Encodable for Receipt {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(13);
        stream.append(&self.tx_hash);
        stream.append(&self.from);
        append_optional_address(stream, &self.to);
        stream.append(&self.amount);
        stream.append(&self.status);
        stream.append(&self.cumulative_gas_used);
        stream.append(&self.gas_used);
        append_optional_address(stream, &self.contract_address);
        stream.append_list(&self.logs);
        stream.append(&self.logs_bloom);
        stream.append(&self.block_hash);
        stream.append(&self.block_number);
        stream.append(&self.tx_index);
    }
}

impl rlp::Decodable for Receipt {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            tx_hash: rlp.val_at(0)?,
            from: rlp.val_at(1)?,
            to: read_optional_address(rlp, 2)?,
            amount: rlp.val_at(3)?,
            status: rlp.val_at(4)?,
            cumulative_gas_used: rlp.val_at(5)?,
            gas_used: rlp.val_at(6)?,
            contract_address: read_optional_address(rlp, 7)?,
            logs: rlp.list_at(8)?,
            logs_bloom: rlp.val_at(9)?,
            block_hash: rlp.val_at(10)?,
            block_number: rlp.val_at(11)?,
            tx_index: rlp.val_at(12)?,
        })
    }
}

impl ConsensusEncode for Receipt {
    fn consensus_bytes(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(4);
        stream.append(&self.status);
        stream.append(&self.cumulative_gas_used);
        stream.append(&self.logs_bloom);
        stream.begin_list(self.logs.len());
        for log in &self.logs {
            log.append_consensus(&mut stream);
        }
        stream.out().to_vec()
    }
}

/// The 2048-bit filter over every log emitter and topic in `logs`; each
/// element sets three bits derived from its Keccak-256 digest.
pub fn logs_bloom(logs: &[Log]) -> Bloom {
    let mut bloom = Bloom::zero();
    for log in logs {
        bloom.accrue(BloomInput::Raw(log.address.as_bytes()));
        for topic in &log.topics {
            bloom.accrue(BloomInput::Raw(topic.as_bytes()));
        }
    }
    bloom
}

pub fn create_bloom(receipts: &[Receipt]) -> Bloom {
    let mut bloom = Bloom::zero();
    for receipt in receipts {
        bloom |= logs_bloom(&receipt.logs);
    }
    bloom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> Log {
        Log::new(
            H160::repeat_byte(0xaa),
            vec![H256::repeat_byte(0x01), H256::repeat_byte(0x02)],
            vec![1, 2, 3],
        )
    }

    #[test]
    fn receipt_rlp_round_trip() {
        let mut receipt = Receipt::new(RECEIPT_STATUS_SUCCESS, 21_000);
        receipt.tx_hash = H256::repeat_byte(0x33);
        receipt.from = H160::repeat_byte(0x44);
        receipt.to = Some(H160::repeat_byte(0x55));
        receipt.gas_used = 21_000;
        receipt.logs = vec![sample_log()];
        receipt.logs_bloom = logs_bloom(&receipt.logs);

        let decoded: Receipt = rlp::decode(&rlp::encode(&receipt)).unwrap();
        assert_eq!(decoded, receipt);
        assert_eq!(decoded.hash(), receipt.hash());
    }

    #[test]
    fn contract_creation_receipt_keeps_address() {
        let mut receipt = Receipt::new(RECEIPT_STATUS_SUCCESS, 60_000);
        receipt.contract_address = Some(H160::repeat_byte(0x77));
        let decoded: Receipt = rlp::decode(&rlp::encode(&receipt)).unwrap();
        assert_eq!(decoded.contract_address, receipt.contract_address);
        assert_eq!(decoded.to, None);
    }

    #[test]
    fn bloom_covers_address_and_topics() {
        let log = sample_log();
        let bloom = logs_bloom(std::slice::from_ref(&log));
        assert!(bloom.contains_input(BloomInput::Raw(log.address.as_bytes())));
        for topic in &log.topics {
            assert!(bloom.contains_input(BloomInput::Raw(topic.as_bytes())));
        }
        assert!(!bloom.contains_input(BloomInput::Raw(H160::repeat_byte(0x99).as_bytes())));
    }

    #[test]
    fn bloom_bits_match_manual_derivation() {
        use keccak_hash::keccak;

        let input = H160::repeat_byte(0xaa);
        let bloom = {
            let mut b = Bloom::zero();
            b.accrue(BloomInput::Raw(input.as_bytes()));
            b
        };
        let digest = keccak(input.as_bytes());
        for i in [0usize, 2, 4] {
            let bit = ((digest[i + 1] as usize) | ((digest[i] as usize) << 8)) & 2047;
            let byte = 256 - 1 - bit / 8;
            assert_ne!(bloom.as_bytes()[byte] & (1 << (bit % 8)), 0);
        }
    }
}

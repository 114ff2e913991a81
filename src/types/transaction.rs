use ethereum_types::{H160, H256, U256};
use k256::ecdsa::SigningKey;
use keccak_hash::keccak;
use rlp::{DecoderError, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

use crate::crypto::{recover_address, sign_hash, Signature};
use crate::errors::ChainResult;
use crate::types::ConsensusEncode;

/// A value transfer or contract interaction. A zero `to` address denotes
/// contract creation; the sender is never stored but recovered from the
/// signature over the sign-hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub to: H160,
    pub nonce: u64,
    pub amount: U256,
    pub data: Vec<u8>,
    pub gas: u64,
    pub gas_price: U256,
    pub message: String,
    pub signature: Signature,
}

impl Transaction {
    pub fn new(
        to: H160,
        nonce: u64,
        amount: U256,
        data: Vec<u8>,
        gas: u64,
        gas_price: U256,
        message: String,
    ) -> Self {
        Self {
            to,
            nonce,
            amount,
            data,
            gas,
            gas_price,
            message,
            signature: Signature::default(),
        }
    }

    pub fn is_create(&self) -> bool {
        self.to.is_zero()
    }

    fn append_unsigned(&self, stream: &mut RlpStream) {
        stream.append(&self.to);
        stream.append(&self.nonce);
        stream.append(&self.amount);
        stream.append(&self.data);
        stream.append(&self.gas);
        stream.append(&self.gas_price);
        stream.append(&self.message.as_bytes().to_vec());
    }

    /// Keccak-256 of the canonical encoding including the signature.
    pub fn hash(&self) -> H256 {
        keccak(rlp::encode(self))
    }

    /// Hash signed by the sender: the unsigned fields plus the chain id.
    pub fn sign_hash(&self, chain_id: u64) -> H256 {
        let mut stream = RlpStream::new_list(8);
        self.append_unsigned(&mut stream);
        stream.append(&chain_id);
        keccak(stream.out())
    }

    pub fn sign(&mut self, key: &SigningKey, chain_id: u64) -> ChainResult<()> {
        self.signature = sign_hash(key, self.sign_hash(chain_id))?;
        Ok(())
    }

    /// Recovers the sender address; fails with `InvalidSender` when the
    /// signature is absent or malformed.
    pub fn sender(&self, chain_id: u64) -> ChainResult<H160> {
        recover_address(self.sign_hash(chain_id), &self.signature)
    }

    /// Upper bound the sender must be able to pay: gas limit times gas
    /// price plus the transferred amount.
    pub fn cost(&self) -> U256 {
        U256::from(self.gas) * self.gas_price + self.amount
    }
}

impl rlp::Encodable for Transaction {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(8);
        self.append_unsigned(stream);
        stream.append(&self.signature.to_vec());
    }
}

impl rlp::Decodable for Transaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let message_bytes: Vec<u8> = rlp.val_at(6)?;
        let signature_bytes: Vec<u8> = rlp.val_at(7)?;
        Ok(Self {
            to: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            amount: rlp.val_at(2)?,
            data: rlp.val_at(3)?,
            gas: rlp.val_at(4)?,
            gas_price: rlp.val_at(5)?,
            message: String::from_utf8(message_bytes)
                .map_err(|_| DecoderError::Custom("transaction message is not utf-8"))?,
            signature: Signature::from_slice(&signature_bytes)
                .map_err(|_| DecoderError::Custom("bad signature length"))?,
        })
    }
}

impl ConsensusEncode for Transaction {
    fn consensus_bytes(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }
}

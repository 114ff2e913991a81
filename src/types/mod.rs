mod account;
mod block;
mod message;
mod receipt;
mod transaction;

pub use account::Account;
pub use block::{calc_uncle_hash, Block, BlockBody, BlockHeader, ChainEvent};
pub use message::Message;
pub use receipt::{
    create_bloom, logs_bloom, Log, Receipt, RECEIPT_STATUS_REVERT, RECEIPT_STATUS_SUCCESS,
};
pub use transaction::Transaction;

pub type Address = ethereum_types::H160;
pub type Hash = ethereum_types::H256;

/// Canonical byte encoding of a value as it is inserted into the
/// transactions or receipts trie when deriving a block root.
pub trait ConsensusEncode {
    fn consensus_bytes(&self) -> Vec<u8>;
}

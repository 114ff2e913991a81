use ethereum_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};

use crate::types::{Block, Log, Receipt, Transaction};

/// Payload shapes exchanged with clients and the explorer. Transport and
/// framing live outside the core; these types only fix the field layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    GetBalance {
        address: H160,
    },
    Balance {
        address: H160,
        balance: U256,
    },
    GetNonce {
        address: H160,
    },
    Nonce {
        address: H160,
        nonce: u64,
    },
    SendTransaction {
        transaction: Transaction,
    },
    CallSmartContract {
        from: Option<H160>,
        to: H160,
        data: Vec<u8>,
    },
    CallResult {
        success: bool,
        return_data: Vec<u8>,
    },
    GetReceipt {
        tx_hash: H256,
    },
    Receipt {
        receipt: Option<Receipt>,
    },
    GetReceipts {
        block_hash: H256,
    },
    Receipts {
        receipts: Vec<Receipt>,
    },
    ChainEvent {
        block: Block,
        logs: Vec<Log>,
    },
    TxMined {
        tx_hash: H256,
        block_hash: H256,
        height: u64,
        tx_index: u32,
    },
}

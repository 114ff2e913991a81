use ethereum_types::{H160, H256, U256};

/// One reversible state edit. Every entry carries exactly the data needed
/// to undo itself; reverting a snapshot replays the journal backwards.
#[derive(Clone, Debug)]
pub(crate) enum JournalEntry {
    BalanceChange {
        address: H160,
        prev: U256,
    },
    NonceChange {
        address: H160,
        prev: u64,
    },
    StorageChange {
        address: H160,
        key: H256,
        prev: H256,
    },
    CodeChange {
        address: H160,
        prev_code: Vec<u8>,
        prev_hash: H256,
    },
    AccountCreated {
        address: H160,
    },
    AccountDestructed {
        address: H160,
        prev_balance: U256,
    },
    LogAdded {
        tx_hash: H256,
    },
    RefundChange {
        prev: u64,
    },
    TouchChange {
        address: H160,
    },
}

use ethereum_types::{H256, U256};
use rlp_derive::{RlpDecodable, RlpEncodable};

use crate::params::{EMPTY_CODE_HASH, EMPTY_ROOT_HASH};

/// State-trie leaf: the consensus view of one account. RLP field order is
/// part of consensus.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl Account {
    /// Externally owned accounts and accounts that were only ever credited
    /// start from this shape.
    pub fn empty() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            storage_root: EMPTY_ROOT_HASH,
            code_hash: EMPTY_CODE_HASH,
        }
    }

    /// An account with zero nonce, zero balance and no code is eligible
    /// for deletion when the state is finalised with `delete_empty`.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == EMPTY_CODE_HASH
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != EMPTY_CODE_HASH
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rlp_round_trip() {
        let account = Account {
            nonce: 7,
            balance: U256::from(1_000_000u64),
            storage_root: EMPTY_ROOT_HASH,
            code_hash: EMPTY_CODE_HASH,
        };
        let encoded = rlp::encode(&account);
        let decoded: Account = rlp::decode(&encoded).unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn fresh_account_is_empty() {
        assert!(Account::empty().is_empty());
        let mut funded = Account::empty();
        funded.balance = U256::one();
        assert!(!funded.is_empty());
    }
}

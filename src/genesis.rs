//! Genesis block construction from the configuration's funded accounts.
//! Deterministic: every node configured with the same genesis produces
//! the same block 0 hash.

use ethereum_types::{Bloom, H160, H256};

use crate::chain::ChainStore;
use crate::config::GenesisConfig;
use crate::crypto::Signature;
use crate::errors::ChainResult;
use crate::params::{EMPTY_ROOT_HASH, EMPTY_UNCLE_HASH};
use crate::state::StateDB;
use crate::types::{Block, BlockHeader};

/// Builds and persists block 0 unless the store already has a head, and
/// returns the current head either way.
pub fn ensure_genesis(
    chain: &ChainStore,
    state: &mut StateDB,
    genesis: &GenesisConfig,
) -> ChainResult<BlockHeader> {
    if let Some(head) = chain.current_header() {
        return Ok(head);
    }

    state.reset(EMPTY_ROOT_HASH);
    for account in &genesis.accounts {
        let address = account.address_value()?;
        state.add_balance(address, account.balance_value()?)?;
    }
    let state_root = state.commit(true)?;

    let header = BlockHeader {
        height: 0,
        parent_hash: H256::zero(),
        state_root,
        transactions_root: EMPTY_ROOT_HASH,
        receipt_root: EMPTY_ROOT_HASH,
        uncle_hash: EMPTY_UNCLE_HASH,
        bloom: Bloom::zero(),
        timestamp: genesis.timestamp,
        prevrandao: H256::zero(),
        proposer: H160::zero(),
        signature: Signature::default(),
        extra_data: Vec::new(),
        gas_used: 0,
    };
    let block = Block::new(header.clone(), Vec::new());
    chain.write_genesis(&block)?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenesisAccount;
    use crate::kv::MemoryDb;
    use ethereum_types::U256;
    use std::sync::Arc;

    fn sample_genesis() -> GenesisConfig {
        GenesisConfig {
            timestamp: 0,
            accounts: vec![GenesisAccount {
                address: format!("{:#x}", H160::repeat_byte(0x42)),
                balance: "1000000".to_string(),
            }],
            validators: Vec::new(),
        }
    }

    #[test]
    fn genesis_is_deterministic_and_idempotent() {
        let build = || {
            let db: Arc<dyn crate::kv::KeyValueStore> = Arc::new(MemoryDb::new());
            let chain = ChainStore::new(db.clone(), 88).unwrap();
            let mut state = StateDB::new(EMPTY_ROOT_HASH, db);
            ensure_genesis(&chain, &mut state, &sample_genesis()).unwrap()
        };
        let first = build();
        let second = build();
        assert_eq!(first.hash(), second.hash());

        let db: Arc<dyn crate::kv::KeyValueStore> = Arc::new(MemoryDb::new());
        let chain = ChainStore::new(db.clone(), 88).unwrap();
        let mut state = StateDB::new(EMPTY_ROOT_HASH, db);
        let written = ensure_genesis(&chain, &mut state, &sample_genesis()).unwrap();
        let again = ensure_genesis(&chain, &mut state, &sample_genesis()).unwrap();
        assert_eq!(written.hash(), again.hash());
        assert_eq!(chain.genesis_hash().unwrap(), Some(written.hash()));
    }

    #[test]
    fn genesis_funds_accounts() {
        let db: Arc<dyn crate::kv::KeyValueStore> = Arc::new(MemoryDb::new());
        let chain = ChainStore::new(db.clone(), 88).unwrap();
        let mut state = StateDB::new(EMPTY_ROOT_HASH, db);
        let head = ensure_genesis(&chain, &mut state, &sample_genesis()).unwrap();

        state.reset(head.state_root);
        assert_eq!(
            state.get_balance(H160::repeat_byte(0x42)).unwrap(),
            U256::from(1_000_000u64)
        );
    }
}

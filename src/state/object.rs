use std::collections::HashMap;
use std::sync::Arc;

use ethereum_types::{H256, U256};

use crate::errors::ChainResult;
use crate::kv::KeyValueStore;
use crate::trie::Trie;
use crate::types::Account;

/// Working-set view of one account: its consensus fields, lazily loaded
/// code and the overlay of storage writes not yet flushed into the
/// account's storage trie.
pub(crate) struct StateObject {
    pub account: Account,
    pub code: Option<Vec<u8>>,
    pub dirty_storage: HashMap<H256, H256>,
    pub storage_trie: Trie,
}

impl StateObject {
    pub fn new(account: Account, db: Arc<dyn KeyValueStore>) -> Self {
        let storage_trie = Trie::new(account.storage_root, db);
        Self {
            account,
            code: None,
            dirty_storage: HashMap::new(),
            storage_trie,
        }
    }

    /// Current value of a slot: the dirty overlay wins over the trie.
    pub fn storage_at(&self, key: H256) -> ChainResult<H256> {
        if let Some(value) = self.dirty_storage.get(&key) {
            return Ok(*value);
        }
        self.committed_storage_at(key)
    }

    /// Value as of the last commit, ignoring the dirty overlay.
    pub fn committed_storage_at(&self, key: H256) -> ChainResult<H256> {
        match self.storage_trie.get(key.as_bytes())? {
            Some(bytes) => Ok(decode_storage_value(&bytes)?),
            None => Ok(H256::zero()),
        }
    }

    /// Flushes the dirty overlay into the storage trie and refreshes the
    /// account's storage root. Zero values delete their slot.
    pub fn flush_storage(&mut self) -> ChainResult<()> {
        let mut slots: Vec<(H256, H256)> = self.dirty_storage.drain().collect();
        slots.sort_unstable_by_key(|(key, _)| *key);
        for (key, value) in slots {
            if value.is_zero() {
                self.storage_trie.delete(key.as_bytes())?;
            } else {
                self.storage_trie
                    .update(key.as_bytes(), encode_storage_value(value))?;
            }
        }
        self.account.storage_root = self.storage_trie.hash();
        Ok(())
    }
}

fn encode_storage_value(value: H256) -> Vec<u8> {
    rlp::encode(&U256::from_big_endian(value.as_bytes())).to_vec()
}

fn decode_storage_value(bytes: &[u8]) -> ChainResult<H256> {
    let value: U256 = rlp::decode(bytes)?;
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    Ok(H256(out))
}

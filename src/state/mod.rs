//! Journaled account and storage state over the Merkle-Patricia trie.
//!
//! Mutations land in an in-memory working set of state objects and are
//! recorded in a journal of reversible edits; snapshots are journal
//! positions, so reverting costs O(|changes since snapshot|). `finalise`
//! folds the working set into the trie image, `intermediate_root` prices
//! that image without persisting, and `commit` flushes trie nodes and
//! contract code through one KV batch.

mod journal;
mod object;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ethereum_types::{H160, H256, U256};
use keccak_hash::keccak;

use crate::errors::{ChainError, ChainResult, VmError};
use crate::kv::{KeyValueStore, WriteBatch};
use crate::trie::Trie;
use crate::types::{Account, Log};

use journal::JournalEntry;
use object::StateObject;

fn code_key(code_hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b'c');
    key.extend_from_slice(code_hash.as_bytes());
    key
}

pub struct StateDB {
    db: Arc<dyn KeyValueStore>,
    trie: Trie,
    objects: HashMap<H160, StateObject>,
    dirty: HashSet<H160>,
    destructed: HashSet<H160>,
    journal: Vec<JournalEntry>,
    revisions: Vec<(usize, usize)>,
    next_revision: usize,
    logs: HashMap<H256, Vec<Log>>,
    log_index: u32,
    tx_hash: H256,
    block_hash: H256,
    tx_index: u32,
    refund: u64,
}

impl StateDB {
    pub fn new(root: H256, db: Arc<dyn KeyValueStore>) -> Self {
        let trie = Trie::new(root, db.clone());
        Self {
            db,
            trie,
            objects: HashMap::new(),
            dirty: HashSet::new(),
            destructed: HashSet::new(),
            journal: Vec::new(),
            revisions: Vec::new(),
            next_revision: 0,
            logs: HashMap::new(),
            log_index: 0,
            tx_hash: H256::zero(),
            block_hash: H256::zero(),
            tx_index: 0,
            refund: 0,
        }
    }

    fn ensure_loaded(&mut self, address: H160) -> ChainResult<()> {
        if self.objects.contains_key(&address) {
            return Ok(());
        }
        if let Some(bytes) = self.trie.get(address.as_bytes())? {
            let account: Account = rlp::decode(&bytes)?;
            self.objects
                .insert(address, StateObject::new(account, self.db.clone()));
        }
        Ok(())
    }

    fn mark_dirty(&mut self, address: H160) {
        if self.dirty.insert(address) {
            self.journal.push(JournalEntry::TouchChange { address });
        }
    }

    pub fn exist(&mut self, address: H160) -> ChainResult<bool> {
        self.ensure_loaded(address)?;
        Ok(self.objects.contains_key(&address))
    }

    /// Brings an account into existence. Existing accounts are left
    /// untouched.
    pub fn create_account(&mut self, address: H160) -> ChainResult<()> {
        if self.exist(address)? {
            return Ok(());
        }
        self.journal.push(JournalEntry::AccountCreated { address });
        self.objects
            .insert(address, StateObject::new(Account::empty(), self.db.clone()));
        self.mark_dirty(address);
        Ok(())
    }

    pub fn get_balance(&mut self, address: H160) -> ChainResult<U256> {
        self.ensure_loaded(address)?;
        Ok(self
            .objects
            .get(&address)
            .map(|object| object.account.balance)
            .unwrap_or_default())
    }

    pub fn add_balance(&mut self, address: H160, amount: U256) -> ChainResult<()> {
        self.create_account(address)?;
        if let Some(object) = self.objects.get_mut(&address) {
            self.journal.push(JournalEntry::BalanceChange {
                address,
                prev: object.account.balance,
            });
            object.account.balance = object.account.balance + amount;
        }
        self.mark_dirty(address);
        Ok(())
    }

    pub fn sub_balance(&mut self, address: H160, amount: U256) -> ChainResult<()> {
        self.create_account(address)?;
        let Some(object) = self.objects.get_mut(&address) else {
            return Err(ChainError::Vm(VmError::InsufficientBalance));
        };
        if object.account.balance < amount {
            return Err(ChainError::Vm(VmError::InsufficientBalance));
        }
        self.journal.push(JournalEntry::BalanceChange {
            address,
            prev: object.account.balance,
        });
        object.account.balance = object.account.balance - amount;
        self.mark_dirty(address);
        Ok(())
    }

    pub fn get_nonce(&mut self, address: H160) -> ChainResult<u64> {
        self.ensure_loaded(address)?;
        Ok(self
            .objects
            .get(&address)
            .map(|object| object.account.nonce)
            .unwrap_or_default())
    }

    pub fn set_nonce(&mut self, address: H160, nonce: u64) -> ChainResult<()> {
        self.create_account(address)?;
        if let Some(object) = self.objects.get_mut(&address) {
            self.journal.push(JournalEntry::NonceChange {
                address,
                prev: object.account.nonce,
            });
            object.account.nonce = nonce;
        }
        self.mark_dirty(address);
        Ok(())
    }

    pub fn get_code_hash(&mut self, address: H160) -> ChainResult<H256> {
        self.ensure_loaded(address)?;
        Ok(self
            .objects
            .get(&address)
            .map(|object| object.account.code_hash)
            .unwrap_or(crate::params::EMPTY_CODE_HASH))
    }

    pub fn get_code(&mut self, address: H160) -> ChainResult<Vec<u8>> {
        self.ensure_loaded(address)?;
        let code_hash = {
            let Some(object) = self.objects.get(&address) else {
                return Ok(Vec::new());
            };
            if let Some(code) = &object.code {
                return Ok(code.clone());
            }
            if !object.account.has_code() {
                return Ok(Vec::new());
            }
            object.account.code_hash
        };
        let code = self.db.get(&code_key(code_hash))?.unwrap_or_default();
        if let Some(object) = self.objects.get_mut(&address) {
            object.code = Some(code.clone());
        }
        Ok(code)
    }

    pub fn set_code(&mut self, address: H160, code: Vec<u8>) -> ChainResult<()> {
        self.create_account(address)?;
        let prev_code = self.get_code(address)?;
        if let Some(object) = self.objects.get_mut(&address) {
            self.journal.push(JournalEntry::CodeChange {
                address,
                prev_code,
                prev_hash: object.account.code_hash,
            });
            object.account.code_hash = keccak(&code);
            object.code = Some(code);
        }
        self.mark_dirty(address);
        Ok(())
    }

    /// Marks an account for removal at the next `finalise` and zeroes its
    /// balance; the caller moves the funds beforehand.
    pub fn destruct_account(&mut self, address: H160) -> ChainResult<()> {
        if self.destructed.contains(&address) {
            return Ok(());
        }
        self.ensure_loaded(address)?;
        let prev_balance = {
            let Some(object) = self.objects.get_mut(&address) else {
                return Ok(());
            };
            let prev = object.account.balance;
            object.account.balance = U256::zero();
            prev
        };
        self.journal.push(JournalEntry::AccountDestructed {
            address,
            prev_balance,
        });
        self.destructed.insert(address);
        self.mark_dirty(address);
        Ok(())
    }

    pub fn is_destructed(&self, address: H160) -> bool {
        self.destructed.contains(&address)
    }

    pub fn get_state(&mut self, address: H160, key: H256) -> ChainResult<H256> {
        self.ensure_loaded(address)?;
        match self.objects.get(&address) {
            Some(object) => object.storage_at(key),
            None => Ok(H256::zero()),
        }
    }

    /// Slot value as of the last commit; the SSTORE refund rule needs the
    /// original alongside the current value.
    pub fn get_committed_state(&mut self, address: H160, key: H256) -> ChainResult<H256> {
        self.ensure_loaded(address)?;
        match self.objects.get(&address) {
            Some(object) => object.committed_storage_at(key),
            None => Ok(H256::zero()),
        }
    }

    pub fn set_state(&mut self, address: H160, key: H256, value: H256) -> ChainResult<()> {
        self.create_account(address)?;
        let prev = self.get_state(address, key)?;
        if let Some(object) = self.objects.get_mut(&address) {
            self.journal.push(JournalEntry::StorageChange {
                address,
                key,
                prev,
            });
            object.dirty_storage.insert(key, value);
        }
        self.mark_dirty(address);
        Ok(())
    }

    /// Binds the log-emission context for the transaction about to run
    /// and resets its refund counter.
    pub fn prepare(&mut self, tx_hash: H256, block_hash: H256, tx_index: u32) {
        self.tx_hash = tx_hash;
        self.block_hash = block_hash;
        self.tx_index = tx_index;
        self.journal.push(JournalEntry::RefundChange {
            prev: self.refund,
        });
        self.refund = 0;
    }

    pub fn add_log(&mut self, mut log: Log) {
        log.tx_hash = self.tx_hash;
        log.block_hash = self.block_hash;
        log.tx_index = self.tx_index;
        log.index = self.log_index;
        self.log_index += 1;
        self.journal.push(JournalEntry::LogAdded {
            tx_hash: self.tx_hash,
        });
        self.logs.entry(self.tx_hash).or_default().push(log);
    }

    pub fn get_logs(&self, tx_hash: H256) -> Vec<Log> {
        self.logs.get(&tx_hash).cloned().unwrap_or_default()
    }

    /// Index of the transaction bound by the last `prepare`.
    pub fn current_tx_index(&self) -> u32 {
        self.tx_index
    }

    pub fn add_refund(&mut self, amount: u64) {
        self.journal.push(JournalEntry::RefundChange {
            prev: self.refund,
        });
        self.refund += amount;
    }

    pub fn get_refund(&self) -> u64 {
        self.refund
    }

    pub fn snapshot(&mut self) -> usize {
        let id = self.next_revision;
        self.next_revision += 1;
        self.revisions.push((id, self.journal.len()));
        id
    }

    /// Rolls every mutation since the snapshot back and invalidates the
    /// snapshot along with all later ones.
    pub fn revert_to_snapshot(&mut self, id: usize) -> ChainResult<()> {
        let position = self
            .revisions
            .iter()
            .rposition(|(revision, _)| *revision == id)
            .ok_or_else(|| ChainError::Config(format!("unknown state snapshot {id}")))?;
        let target = self.revisions[position].1;
        while self.journal.len() > target {
            if let Some(entry) = self.journal.pop() {
                self.undo(entry);
            }
        }
        self.revisions.truncate(position);
        Ok(())
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::BalanceChange { address, prev } => {
                if let Some(object) = self.objects.get_mut(&address) {
                    object.account.balance = prev;
                }
            }
            JournalEntry::NonceChange { address, prev } => {
                if let Some(object) = self.objects.get_mut(&address) {
                    object.account.nonce = prev;
                }
            }
            JournalEntry::StorageChange { address, key, prev } => {
                if let Some(object) = self.objects.get_mut(&address) {
                    object.dirty_storage.insert(key, prev);
                }
            }
            JournalEntry::CodeChange {
                address,
                prev_code,
                prev_hash,
            } => {
                if let Some(object) = self.objects.get_mut(&address) {
                    object.account.code_hash = prev_hash;
                    object.code = Some(prev_code);
                }
            }
            JournalEntry::AccountCreated { address } => {
                self.objects.remove(&address);
                self.dirty.remove(&address);
            }
            JournalEntry::AccountDestructed {
                address,
                prev_balance,
            } => {
                self.destructed.remove(&address);
                if let Some(object) = self.objects.get_mut(&address) {
                    object.account.balance = prev_balance;
                }
            }
            JournalEntry::LogAdded { tx_hash } => {
                if let Some(list) = self.logs.get_mut(&tx_hash) {
                    list.pop();
                    if list.is_empty() {
                        self.logs.remove(&tx_hash);
                    }
                }
                self.log_index = self.log_index.saturating_sub(1);
            }
            JournalEntry::RefundChange { prev } => {
                self.refund = prev;
            }
            JournalEntry::TouchChange { address } => {
                self.dirty.remove(&address);
            }
        }
    }

    /// Folds dirty accounts into the trie image. Accounts that ended up
    /// empty are removed when `delete_empty` is set. Invalidates every
    /// open snapshot.
    pub fn finalise(&mut self, delete_empty: bool) -> ChainResult<()> {
        let mut touched: Vec<H160> = self.dirty.drain().collect();
        touched.sort_unstable();
        for address in touched {
            let is_empty = self
                .objects
                .get(&address)
                .map(|object| object.account.is_empty())
                .unwrap_or(false);
            if self.destructed.contains(&address) || (delete_empty && is_empty) {
                self.trie.delete(address.as_bytes())?;
                self.objects.remove(&address);
            } else if let Some(object) = self.objects.get_mut(&address) {
                object.flush_storage()?;
                let encoded = rlp::encode(&object.account).to_vec();
                self.trie.update(address.as_bytes(), encoded)?;
            }
        }
        self.destructed.clear();
        self.journal.clear();
        self.revisions.clear();
        Ok(())
    }

    /// The state root the pending changes would commit to, without
    /// persisting anything.
    pub fn intermediate_root(&mut self, delete_empty: bool) -> ChainResult<H256> {
        self.finalise(delete_empty)?;
        Ok(self.trie.hash())
    }

    /// Persists the trie image, storage tries and contract code in a
    /// single KV batch and returns the new state root.
    pub fn commit(&mut self, delete_empty: bool) -> ChainResult<H256> {
        self.finalise(delete_empty)?;
        let mut batch = WriteBatch::new();
        for object in self.objects.values_mut() {
            let storage_commit = object.storage_trie.commit()?;
            storage_commit.stage(&mut batch);
            if object.account.has_code() {
                if let Some(code) = &object.code {
                    batch.put(code_key(object.account.code_hash), code.clone());
                }
            }
        }
        let account_commit = self.trie.commit()?;
        account_commit.stage(&mut batch);
        self.db.write(batch)?;
        Ok(account_commit.root)
    }

    /// Rebinds the working set to a previously committed root, dropping
    /// every cached object, log and journal entry.
    pub fn reset(&mut self, root: H256) {
        self.trie = Trie::new(root, self.db.clone());
        self.objects.clear();
        self.dirty.clear();
        self.destructed.clear();
        self.journal.clear();
        self.revisions.clear();
        self.logs.clear();
        self.log_index = 0;
        self.tx_hash = H256::zero();
        self.block_hash = H256::zero();
        self.tx_index = 0;
        self.refund = 0;
    }
}

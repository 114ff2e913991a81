use std::collections::BTreeMap;

use ethereum_types::{H160, H256, U256};
use parking_lot::Mutex;
use tracing::warn;

use crate::errors::{ChainError, ChainResult, TxError};
use crate::params::{BLOCK_GAS_LIMIT, MAX_TX_DATA_SIZE};
use crate::processor::intrinsic_gas;
use crate::state::StateDB;
use crate::types::Transaction;

/// Thread-safe set of transactions waiting for inclusion. Admission
/// validation is the [`TxValidator`]'s job; `add` is the commit point and
/// only rejects duplicates by hash.
pub struct Mempool {
    chain_id: u64,
    transactions: Mutex<Vec<Transaction>>,
}

impl Mempool {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            transactions: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, tx: Transaction) -> ChainResult<()> {
        let mut transactions = self.transactions.lock();
        let hash = tx.hash();
        if transactions.iter().any(|existing| existing.hash() == hash) {
            return Err(ChainError::Config(
                "transaction already queued".to_string(),
            ));
        }
        transactions.push(tx);
        Ok(())
    }

    pub fn remove(&self, removed: &[Transaction]) {
        let hashes: Vec<H256> = removed.iter().map(Transaction::hash).collect();
        self.transactions
            .lock()
            .retain(|tx| !hashes.contains(&tx.hash()));
    }

    pub fn clear(&self) {
        self.transactions.lock().clear();
    }

    pub fn size(&self) -> usize {
        self.transactions.lock().len()
    }

    /// Snapshot of the pending set grouped by recovered sender, each
    /// group sorted ascending by nonce. Sender recovery happens here,
    /// lazily; transactions whose sender cannot be recovered are dropped
    /// from the view (not from the pool).
    pub fn pending(&self) -> BTreeMap<H160, Vec<Transaction>> {
        let transactions = self.transactions.lock().clone();
        let mut grouped: BTreeMap<H160, Vec<Transaction>> = BTreeMap::new();
        for tx in transactions {
            match tx.sender(self.chain_id) {
                Ok(sender) => grouped.entry(sender).or_default().push(tx),
                Err(err) => {
                    warn!(?err, tx_hash = ?tx.hash(), "dropping unrecoverable transaction");
                }
            }
        }
        for group in grouped.values_mut() {
            group.sort_by_key(|tx| tx.nonce);
        }
        grouped
    }
}

/// Admission checks applied before a transaction enters the pool
/// (`quick_verify`) and again by the builder against live state
/// (`deep_verify`).
pub struct TxValidator {
    chain_id: u64,
    min_gas_price: U256,
}

impl TxValidator {
    pub fn new(chain_id: u64, min_gas_price: U256) -> Self {
        Self {
            chain_id,
            min_gas_price,
        }
    }

    /// Stateless checks: size caps, gas bounds, pricing floor and a
    /// recoverable signature.
    pub fn quick_verify(&self, tx: &Transaction) -> ChainResult<()> {
        if tx.data.len() > MAX_TX_DATA_SIZE {
            return Err(TxError::OversizedData.into());
        }
        if tx.gas > BLOCK_GAS_LIMIT {
            return Err(TxError::GasLimit.into());
        }
        if tx.gas_price < self.min_gas_price {
            return Err(TxError::Underpriced.into());
        }
        if intrinsic_gas(&tx.data, tx.is_create())? > tx.gas {
            return Err(TxError::IntrinsicGas.into());
        }
        tx.sender(self.chain_id)?;
        Ok(())
    }

    /// Stateful checks against the block builder's state: the nonce floor
    /// and the full upfront cost.
    pub fn deep_verify(&self, tx: &Transaction, state: &mut StateDB) -> ChainResult<()> {
        self.quick_verify(tx)?;
        let sender = tx.sender(self.chain_id)?;
        if state.get_nonce(sender)? > tx.nonce {
            return Err(TxError::NonceTooLow.into());
        }
        if state.get_balance(sender)? < tx.cost() {
            return Err(TxError::InsufficientFunds.into());
        }
        Ok(())
    }
}

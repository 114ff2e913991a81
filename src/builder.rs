//! Assembles the next block: drains the mempool snapshot through the
//! state-transition engine in stable sender order and derives every
//! header root. The produced block is unsigned; sealing belongs to the
//! node.

use std::time::{SystemTime, UNIX_EPOCH};

use ethereum_types::{Bloom, H160, H256};
use keccak_hash::keccak;
use tracing::{debug, warn};

use crate::crypto::Signature;
use crate::errors::ChainResult;
use crate::mempool::{Mempool, TxValidator};
use crate::params::BLOCK_GAS_LIMIT;
use crate::processor::{apply_transaction, GasPool};
use crate::state::StateDB;
use crate::trie::derive_root;
use crate::types::{calc_uncle_hash, Block, BlockHeader, Receipt, Transaction};

/// Placeholder randomness until a beacon lands: the hash of the block
/// timestamp.
fn derive_prevrandao(timestamp: u64) -> H256 {
    keccak(timestamp.to_be_bytes())
}

pub struct BlockBuilder<'a> {
    mempool: &'a Mempool,
    validator: &'a TxValidator,
    coinbase: H160,
    chain_id: u64,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(
        mempool: &'a Mempool,
        validator: &'a TxValidator,
        coinbase: H160,
        chain_id: u64,
    ) -> Self {
        Self {
            mempool,
            validator,
            coinbase,
            chain_id,
        }
    }

    /// Builds the block extending `parent`. Transactions failing the deep
    /// admission check or execution are skipped; their state effects are
    /// rolled back to the per-transaction snapshot.
    pub fn build(&self, parent: &BlockHeader, state: &mut StateDB) -> ChainResult<Block> {
        state.reset(parent.state_root);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut header = BlockHeader {
            height: parent.height + 1,
            parent_hash: parent.hash(),
            state_root: H256::zero(),
            transactions_root: H256::zero(),
            receipt_root: H256::zero(),
            uncle_hash: H256::zero(),
            bloom: Bloom::zero(),
            timestamp,
            prevrandao: derive_prevrandao(timestamp),
            proposer: self.coinbase,
            signature: Signature::default(),
            extra_data: Vec::new(),
            gas_used: 0,
        };

        let mut gas_pool = GasPool::new(BLOCK_GAS_LIMIT);
        let mut transactions: Vec<Transaction> = Vec::new();
        let mut receipts: Vec<Receipt> = Vec::new();

        let pending = self.mempool.pending();
        self.mempool.clear();

        let mut tx_index = 0u32;
        for (sender, group) in pending {
            for tx in group {
                if let Err(err) = self.validator.deep_verify(&tx, state) {
                    warn!(?err, ?sender, tx_hash = ?tx.hash(), "skipping transaction");
                    continue;
                }
                let snapshot = state.snapshot();
                state.prepare(tx.hash(), header.parent_hash, tx_index);
                match apply_transaction(
                    self.chain_id,
                    self.coinbase,
                    &mut gas_pool,
                    state,
                    &header,
                    &tx,
                    &mut header.gas_used,
                ) {
                    Ok(receipt) => {
                        transactions.push(tx);
                        receipts.push(receipt);
                        tx_index += 1;
                    }
                    Err(err) => {
                        warn!(?err, ?sender, tx_hash = ?tx.hash(), "transaction failed");
                        state.revert_to_snapshot(snapshot)?;
                    }
                }
            }
        }

        header.uncle_hash = calc_uncle_hash(&[]);
        header.transactions_root = derive_root(&transactions)?;
        header.receipt_root = derive_root(&receipts)?;
        header.state_root = state.intermediate_root(true)?;
        header.bloom = crate::types::create_bloom(&receipts);
        debug!(
            height = header.height,
            txs = transactions.len(),
            gas_used = header.gas_used,
            "assembled block"
        );
        Ok(Block::new(header, transactions))
    }
}

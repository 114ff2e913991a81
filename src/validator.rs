//! Block validation: structural checks against the local chain before
//! execution, and recomputed-root checks after re-executing the body.

use crate::chain::ChainReader;
use crate::errors::{BlockError, ChainResult};
use crate::schedule::ProposerSchedule;
use crate::state::StateDB;
use crate::trie::derive_root;
use crate::types::{calc_uncle_hash, create_bloom, Block, Receipt};

pub struct BlockValidator<'a> {
    chain: &'a dyn ChainReader,
    schedule: &'a ProposerSchedule,
}

impl<'a> BlockValidator<'a> {
    pub fn new(chain: &'a dyn ChainReader, schedule: &'a ProposerSchedule) -> Self {
        Self { chain, schedule }
    }

    /// Rejects known blocks, blocks with unavailable ancestry, blocks
    /// whose proposer is not the scheduled authority for the height, and
    /// any body whose derived uncle or transaction root disagrees with
    /// the header.
    pub fn validate_body(&self, block: &Block) -> ChainResult<()> {
        let header = &block.header;
        if self.chain.has_block_and_state(block.hash(), header.height)? {
            return Err(BlockError::KnownBlock.into());
        }
        if !self
            .chain
            .has_block_and_state(header.parent_hash, header.height.wrapping_sub(1))?
        {
            if !self
                .chain
                .has_block(header.parent_hash, header.height.wrapping_sub(1))?
            {
                return Err(BlockError::UnknownAncestor.into());
            }
            return Err(BlockError::PrunedAncestor.into());
        }
        // a correctly self-signed header still fails if its proposer was
        // not the authority assigned to this height
        if self.schedule.get_proposer(header.height)? != header.proposer {
            return Err(BlockError::BadSeal.into());
        }

        let uncle_hash = calc_uncle_hash(&block.uncles);
        if uncle_hash != header.uncle_hash {
            return Err(BlockError::UncleRootMismatch {
                remote: header.uncle_hash,
                local: uncle_hash,
            }
            .into());
        }
        let tx_root = derive_root(&block.transactions)?;
        if tx_root != header.transactions_root {
            return Err(BlockError::TxRootMismatch {
                remote: header.transactions_root,
                local: tx_root,
            }
            .into());
        }
        Ok(())
    }

    /// Compares every field derived from execution against the header.
    /// Any mismatch is fatal to the block.
    pub fn validate_state(
        &self,
        block: &Block,
        state: &mut StateDB,
        receipts: &[Receipt],
        used_gas: u64,
    ) -> ChainResult<()> {
        let header = &block.header;
        if header.gas_used != used_gas {
            return Err(BlockError::GasUsedMismatch {
                remote: header.gas_used,
                local: used_gas,
            }
            .into());
        }
        if create_bloom(receipts) != header.bloom {
            return Err(BlockError::BloomMismatch.into());
        }
        let receipt_root = derive_root(receipts)?;
        if receipt_root != header.receipt_root {
            return Err(BlockError::ReceiptRootMismatch {
                remote: header.receipt_root,
                local: receipt_root,
            }
            .into());
        }
        let state_root = state.intermediate_root(true)?;
        if state_root != header.state_root {
            return Err(BlockError::StateRootMismatch {
                remote: header.state_root,
                local: state_root,
            }
            .into());
        }
        Ok(())
    }
}

//! Persistent chain index over the KV store and the serialization point
//! for block insertion.
//!
//! Layout (distinct one-byte namespaces plus two singletons):
//! `h|hash|height → header`, `b|hash|height → body`, `r|hash|height →
//! receipts`, `n|height → hash`, `H|hash → height`, `l|tx_hash →
//! (block_hash, height, index)`, `LastHeader`, `LastBlock`.

use std::sync::Arc;

use ethereum_types::H256;
use parking_lot::{Mutex, RwLock};
use rlp_derive::{RlpDecodable, RlpEncodable};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::errors::{BlockError, ChainError, ChainResult};
use crate::kv::{KeyValueStore, WriteBatch};
use crate::params::EMPTY_ROOT_HASH;
use crate::processor::process_block;
use crate::schedule::ProposerSchedule;
use crate::state::StateDB;
use crate::types::{Block, BlockBody, BlockHeader, ChainEvent, Receipt};
use crate::validator::BlockValidator;

const LAST_HEADER_KEY: &[u8] = b"LastHeader";
const LAST_BLOCK_KEY: &[u8] = b"LastBlock";
const EVENT_CHANNEL_CAPACITY: usize = 256;

fn hash_height_key(prefix: u8, hash: H256, height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(prefix);
    key.extend_from_slice(hash.as_bytes());
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn header_key(hash: H256, height: u64) -> Vec<u8> {
    hash_height_key(b'h', hash, height)
}

fn body_key(hash: H256, height: u64) -> Vec<u8> {
    hash_height_key(b'b', hash, height)
}

fn receipts_key(hash: H256, height: u64) -> Vec<u8> {
    hash_height_key(b'r', hash, height)
}

fn canonical_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'n');
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn number_key(hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b'H');
    key.extend_from_slice(hash.as_bytes());
    key
}

fn tx_lookup_key(tx_hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b'l');
    key.extend_from_slice(tx_hash.as_bytes());
    key
}

/// Location of a mined transaction.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct TxLookupEntry {
    pub block_hash: H256,
    pub block_height: u64,
    pub tx_index: u64,
}

/// Read-only view consumed by the block validator; keeps the validator
/// free of a back-pointer onto the store.
pub trait ChainReader {
    fn has_block(&self, hash: H256, height: u64) -> ChainResult<bool>;
    fn has_block_and_state(&self, hash: H256, height: u64) -> ChainResult<bool>;
}

pub struct ChainStore {
    db: Arc<dyn KeyValueStore>,
    chain_id: u64,
    head: RwLock<Option<BlockHeader>>,
    insert_lock: Mutex<()>,
    events: broadcast::Sender<ChainEvent>,
}

impl ChainStore {
    pub fn new(db: Arc<dyn KeyValueStore>, chain_id: u64) -> ChainResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Self {
            db,
            chain_id,
            head: RwLock::new(None),
            insert_lock: Mutex::new(()),
            events,
        };
        if let Some(header) = store.load_head()? {
            *store.head.write() = Some(header);
        }
        Ok(store)
    }

    fn load_head(&self) -> ChainResult<Option<BlockHeader>> {
        let Some(raw) = self.db.get(LAST_HEADER_KEY)? else {
            return Ok(None);
        };
        if raw.len() != 32 {
            return Err(ChainError::Config("corrupt head pointer".to_string()));
        }
        let hash = H256::from_slice(&raw);
        let Some(height) = self.block_number(hash)? else {
            return Err(ChainError::Config("head hash has no height".to_string()));
        };
        self.get_header(hash, height)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn current_header(&self) -> Option<BlockHeader> {
        self.head.read().clone()
    }

    /// Receiver for canonical-insertion events. Lagging subscribers lose
    /// events rather than blocking insertion.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn get_header(&self, hash: H256, height: u64) -> ChainResult<Option<BlockHeader>> {
        match self.db.get(&header_key(hash, height))? {
            Some(bytes) => Ok(Some(rlp::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_body(&self, hash: H256, height: u64) -> ChainResult<Option<BlockBody>> {
        match self.db.get(&body_key(hash, height))? {
            Some(bytes) => Ok(Some(rlp::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_receipts(&self, hash: H256, height: u64) -> ChainResult<Vec<Receipt>> {
        match self.db.get(&receipts_key(hash, height))? {
            Some(bytes) => Ok(rlp::Rlp::new(&bytes).as_list()?),
            None => Ok(Vec::new()),
        }
    }

    pub fn canonical_hash(&self, height: u64) -> ChainResult<Option<H256>> {
        match self.db.get(&canonical_key(height))? {
            Some(bytes) if bytes.len() == 32 => Ok(Some(H256::from_slice(&bytes))),
            Some(_) => Err(ChainError::Config("corrupt canonical entry".to_string())),
            None => Ok(None),
        }
    }

    pub fn block_number(&self, hash: H256) -> ChainResult<Option<u64>> {
        match self.db.get(&number_key(hash))? {
            Some(bytes) if bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes);
                Ok(Some(u64::from_be_bytes(raw)))
            }
            Some(_) => Err(ChainError::Config("corrupt number entry".to_string())),
            None => Ok(None),
        }
    }

    pub fn get_block(&self, hash: H256, height: u64) -> ChainResult<Option<Block>> {
        let Some(header) = self.get_header(hash, height)? else {
            return Ok(None);
        };
        let Some(body) = self.get_body(hash, height)? else {
            return Ok(None);
        };
        Ok(Some(Block::from_parts(header, body)))
    }

    pub fn get_block_by_height(&self, height: u64) -> ChainResult<Option<Block>> {
        match self.canonical_hash(height)? {
            Some(hash) => self.get_block(hash, height),
            None => Ok(None),
        }
    }

    pub fn tx_lookup(&self, tx_hash: H256) -> ChainResult<Option<TxLookupEntry>> {
        match self.db.get(&tx_lookup_key(tx_hash))? {
            Some(bytes) => Ok(Some(rlp::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_receipt(&self, tx_hash: H256) -> ChainResult<Option<Receipt>> {
        let Some(entry) = self.tx_lookup(tx_hash)? else {
            return Ok(None);
        };
        let receipts = self.get_receipts(entry.block_hash, entry.block_height)?;
        Ok(receipts.into_iter().nth(entry.tx_index as usize))
    }

    fn has_state(&self, root: H256) -> ChainResult<bool> {
        if root == EMPTY_ROOT_HASH || root.is_zero() {
            return Ok(true);
        }
        self.db.has(root.as_bytes())
    }

    /// Writes the genesis block. Idempotent: an initialised store keeps
    /// its head.
    pub fn write_genesis(&self, block: &Block) -> ChainResult<()> {
        if self.current_header().is_some() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        self.stage_block(&mut batch, block, &[]);
        self.db.write(batch)?;
        *self.head.write() = Some(block.header.clone());
        info!(hash = ?block.hash(), "wrote genesis block");
        Ok(())
    }

    fn stage_block(&self, batch: &mut WriteBatch, block: &Block, receipts: &[Receipt]) {
        let hash = block.hash();
        let height = block.height();
        batch.put(header_key(hash, height), rlp::encode(&block.header).to_vec());
        batch.put(body_key(hash, height), rlp::encode(&block.body()).to_vec());
        batch.put(
            receipts_key(hash, height),
            rlp::encode_list(receipts).to_vec(),
        );
        batch.put(canonical_key(height), hash.as_bytes().to_vec());
        batch.put(number_key(hash), height.to_be_bytes().to_vec());
        for (index, tx) in block.transactions.iter().enumerate() {
            let entry = TxLookupEntry {
                block_hash: hash,
                block_height: height,
                tx_index: index as u64,
            };
            batch.put(tx_lookup_key(tx.hash()), rlp::encode(&entry).to_vec());
        }
        batch.put(LAST_HEADER_KEY.to_vec(), hash.as_bytes().to_vec());
        batch.put(LAST_BLOCK_KEY.to_vec(), hash.as_bytes().to_vec());
    }

    /// Validates, re-executes and commits a height-contiguous run of
    /// blocks; the schedule must cover every height in the run. Returns
    /// the number of blocks inserted together with the first failure, if
    /// any; blocks before the failure stay committed.
    pub fn insert_chain(
        &self,
        blocks: &[Block],
        state: &mut StateDB,
        schedule: &ProposerSchedule,
    ) -> (usize, ChainResult<()>) {
        let _guard = self.insert_lock.lock();
        for (index, block) in blocks.iter().enumerate() {
            if let Err(err) = self.insert_block(block, state, schedule) {
                warn!(?err, height = block.height(), "block import failed");
                return (index, Err(err));
            }
        }
        (blocks.len(), Ok(()))
    }

    fn insert_block(
        &self,
        block: &Block,
        state: &mut StateDB,
        schedule: &ProposerSchedule,
    ) -> ChainResult<()> {
        let head = self
            .current_header()
            .ok_or_else(|| ChainError::Config("chain store has no genesis".to_string()))?;
        if block.header.height != head.height + 1 {
            return Err(BlockError::NonContiguous.into());
        }
        block.header.verify_seal()?;

        let validator = BlockValidator::new(self, schedule);
        validator.validate_body(block)?;

        state.reset(head.state_root);
        let (mut receipts, mut logs, used_gas) =
            process_block(self.chain_id, state, block)?;
        validator.validate_state(block, state, &receipts, used_gas)?;
        state.commit(true)?;

        let hash = block.hash();
        for receipt in &mut receipts {
            receipt.block_hash = hash;
            for log in &mut receipt.logs {
                log.block_hash = hash;
            }
        }
        for log in &mut logs {
            log.block_hash = hash;
        }

        let mut batch = WriteBatch::new();
        self.stage_block(&mut batch, block, &receipts);
        self.db.write(batch)?;
        *self.head.write() = Some(block.header.clone());
        info!(height = block.height(), hash = ?hash, txs = block.transactions.len(), "imported block");

        let event = ChainEvent {
            block: block.clone(),
            logs,
        };
        // send only fails when no subscriber is live
        let _ = self.events.send(event);
        Ok(())
    }

    pub fn genesis_hash(&self) -> ChainResult<Option<H256>> {
        self.canonical_hash(0)
    }
}

impl ChainReader for ChainStore {
    fn has_block(&self, hash: H256, height: u64) -> ChainResult<bool> {
        self.db.has(&header_key(hash, height))
    }

    fn has_block_and_state(&self, hash: H256, height: u64) -> ChainResult<bool> {
        let Some(header) = self.get_header(hash, height)? else {
            return Ok(false);
        };
        self.has_state(header.state_root)
    }
}

/// Convenience used by client handlers: the mined location of a
/// transaction, if any.
pub fn tx_mined_location(
    chain: &ChainStore,
    tx_hash: H256,
) -> ChainResult<Option<(H256, u64, u32)>> {
    Ok(chain
        .tx_lookup(tx_hash)?
        .map(|entry| (entry.block_hash, entry.block_height, entry.tx_index as u32)))
}

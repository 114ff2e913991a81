use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ethereum_types::{H160, H256, U256};
use k256::ecdsa::SigningKey;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::time;
use tracing::{debug, info, warn};

use crate::builder::BlockBuilder;
use crate::chain::{tx_mined_location, ChainStore};
use crate::config::NodeConfig;
use crate::crypto::{address_of, load_or_generate_key};
use crate::errors::{ChainError, ChainResult};
use crate::evm::{Evm, EvmContext};
use crate::genesis::ensure_genesis;
use crate::kv::{KeyValueStore, RocksDb};
use crate::mempool::{Mempool, TxValidator};
use crate::params::{BLOCK_GAS_LIMIT, EMPTY_ROOT_HASH, EPOCH_LENGTH};
use crate::schedule::ProposerSchedule;
use crate::state::StateDB;
use crate::types::{Block, ChainEvent, Receipt, Transaction};

pub struct Node {
    inner: Arc<NodeInner>,
    stop: Arc<watch::Sender<bool>>,
}

struct NodeInner {
    config: NodeConfig,
    key: SigningKey,
    address: H160,
    chain: Arc<ChainStore>,
    state: Mutex<StateDB>,
    mempool: Arc<Mempool>,
    tx_validator: TxValidator,
    validators: BTreeMap<H160, U256>,
    schedule: RwLock<ProposerSchedule>,
    stop_rx: watch::Receiver<bool>,
}

/// Cloneable query and submission surface over a running node.
#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<NodeInner>,
    stop: Arc<watch::Sender<bool>>,
}

fn epoch_start(height: u64) -> u64 {
    (height / EPOCH_LENGTH) * EPOCH_LENGTH
}

fn build_schedule(
    chain: &ChainStore,
    height: u64,
    validators: &BTreeMap<H160, U256>,
) -> ChainResult<ProposerSchedule> {
    let from = epoch_start(height);
    // the canonical hash at the epoch start seeds the table; at an epoch
    // boundary that block does not exist yet, so the head hash stands in
    let salt = match chain.canonical_hash(from)? {
        Some(hash) => hash,
        None => chain
            .current_header()
            .map(|header| header.hash())
            .unwrap_or_default(),
    };
    Ok(ProposerSchedule::new(salt.as_bytes(), from, validators))
}

impl Node {
    pub fn new(config: NodeConfig) -> ChainResult<Self> {
        config.ensure_directories()?;
        let key = load_or_generate_key(&config.key_path)?;
        let address = address_of(&key);
        let db: Arc<dyn KeyValueStore> = Arc::new(RocksDb::open(&config.data_dir.join("db"))?);
        Self::with_database(config, key, address, db)
    }

    /// Wires the node over an explicit backend; tests run it on the
    /// in-memory store.
    pub fn with_database(
        config: NodeConfig,
        key: SigningKey,
        address: H160,
        db: Arc<dyn KeyValueStore>,
    ) -> ChainResult<Self> {
        let chain = Arc::new(ChainStore::new(db.clone(), config.chain_id)?);
        let mut state = StateDB::new(EMPTY_ROOT_HASH, db);
        let head = ensure_genesis(&chain, &mut state, &config.genesis)?;
        state.reset(head.state_root);

        let mut validators = config.genesis.validator_weights()?;
        if validators.is_empty() {
            info!(?address, "no validators configured, running single-authority");
            validators.insert(address, U256::one());
        }
        let schedule = build_schedule(&chain, head.height + 1, &validators)?;

        let (stop, stop_rx) = watch::channel(false);
        let inner = Arc::new(NodeInner {
            mempool: Arc::new(Mempool::new(config.chain_id)),
            tx_validator: TxValidator::new(config.chain_id, U256::from(config.min_gas_price)),
            config,
            key,
            address,
            chain,
            state: Mutex::new(state),
            validators,
            schedule: RwLock::new(schedule),
            stop_rx,
        });
        Ok(Self {
            inner,
            stop: Arc::new(stop),
        })
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            inner: self.inner.clone(),
            stop: self.stop.clone(),
        }
    }

    /// Block-production loop. Ticks at the configured interval, checks
    /// the proposer schedule and observes the stop signal between
    /// iterations.
    pub async fn start(self) -> ChainResult<()> {
        info!(address = ?self.inner.address, "starting node");
        let inner = self.inner.clone();
        let mut stop = inner.stop_rx.clone();
        let mut ticker = time::interval(Duration::from_millis(inner.config.block_time_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *stop.borrow() {
                        break;
                    }
                    if let Err(err) = inner.produce_block() {
                        warn!(?err, "block production failed");
                    }
                }
                _ = stop.changed() => break,
            }
        }
        info!("node stopped");
        Ok(())
    }
}

impl NodeInner {
    fn refresh_schedule(&self, height: u64) -> ChainResult<()> {
        if self.schedule.read().covers(height) {
            return Ok(());
        }
        let schedule = build_schedule(&self.chain, height, &self.validators)?;
        *self.schedule.write() = schedule;
        Ok(())
    }

    fn produce_block(&self) -> ChainResult<()> {
        let head = self
            .chain
            .current_header()
            .ok_or_else(|| ChainError::Config("chain store has no genesis".to_string()))?;
        let height = head.height + 1;
        self.refresh_schedule(height)?;
        let schedule = self.schedule.read();
        let proposer = schedule.get_proposer(height)?;
        if proposer != self.address {
            debug!(height, ?proposer, "not the scheduled proposer");
            return Ok(());
        }
        if self.mempool.size() == 0 {
            return Ok(());
        }

        let mut state = self.state.lock();
        let builder = BlockBuilder::new(
            &self.mempool,
            &self.tx_validator,
            self.address,
            self.config.chain_id,
        );
        let mut block = builder.build(&head, &mut state)?;
        block.header.seal(&self.key)?;
        let (_, result) =
            self.chain
                .insert_chain(std::slice::from_ref(&block), &mut state, &schedule);
        result?;
        info!(height = block.height(), txs = block.transactions.len(), "sealed block");
        Ok(())
    }
}

impl NodeHandle {
    /// Admission path for transactions arriving from peers or clients;
    /// `Mempool::add` is the commit point.
    pub fn submit_transaction(&self, tx: Transaction) -> ChainResult<H256> {
        self.inner.tx_validator.quick_verify(&tx)?;
        if self.inner.mempool.size() >= self.inner.config.mempool_limit {
            return Err(ChainError::Config("mempool full".to_string()));
        }
        let hash = tx.hash();
        self.inner.mempool.add(tx)?;
        Ok(hash)
    }

    pub fn get_balance(&self, address: H160) -> ChainResult<U256> {
        self.inner.state.lock().get_balance(address)
    }

    pub fn get_nonce(&self, address: H160) -> ChainResult<u64> {
        self.inner.state.lock().get_nonce(address)
    }

    /// Read-only contract query against the head state.
    pub fn call_contract(
        &self,
        from: Option<H160>,
        to: H160,
        data: Vec<u8>,
    ) -> ChainResult<Vec<u8>> {
        let head = self
            .inner
            .chain
            .current_header()
            .ok_or_else(|| ChainError::Config("chain store has no genesis".to_string()))?;
        let origin = from.unwrap_or_default();
        let mut state = self.inner.state.lock();
        let ctx = EvmContext {
            origin,
            gas_price: U256::zero(),
            coinbase: head.proposer,
            height: head.height,
            timestamp: head.timestamp,
            prevrandao: head.prevrandao,
        };
        let mut evm = Evm::new(&mut state, ctx);
        let outcome = evm.static_call(origin, to, data, BLOCK_GAS_LIMIT)?;
        match outcome.error {
            None => Ok(outcome.output),
            Some(err) => Err(ChainError::Vm(err)),
        }
    }

    pub fn get_receipt(&self, tx_hash: H256) -> ChainResult<Option<Receipt>> {
        self.inner.chain.get_receipt(tx_hash)
    }

    pub fn get_block(&self, height: u64) -> ChainResult<Option<Block>> {
        self.inner.chain.get_block_by_height(height)
    }

    pub fn tx_mined(&self, tx_hash: H256) -> ChainResult<Option<(H256, u64, u32)>> {
        tx_mined_location(&self.inner.chain, tx_hash)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.inner.chain.subscribe()
    }

    pub fn mempool_size(&self) -> usize {
        self.inner.mempool.size()
    }

    pub fn address(&self) -> H160 {
        self.inner.address
    }

    /// Drives one production attempt immediately instead of waiting for
    /// the loop tick; used by tools and tests.
    pub fn produce_block(&self) -> ChainResult<()> {
        self.inner.produce_block()
    }

    /// Signals the production loop to stop after the current iteration.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use aurum_chain::builder::BlockBuilder;
use aurum_chain::chain::ChainStore;
use aurum_chain::config::{GenesisAccount, GenesisConfig};
use aurum_chain::crypto::address_of;
use aurum_chain::genesis::ensure_genesis;
use aurum_chain::kv::{KeyValueStore, MemoryDb};
use aurum_chain::mempool::{Mempool, TxValidator};
use aurum_chain::params::EMPTY_ROOT_HASH;
use aurum_chain::schedule::ProposerSchedule;
use aurum_chain::state::StateDB;
use aurum_chain::types::{Block, BlockHeader, Transaction};
use ethereum_types::{H160, U256};
use k256::ecdsa::SigningKey;

pub const CHAIN_ID: u64 = 88;

pub fn proposer_key() -> SigningKey {
    SigningKey::from_slice(&[21u8; 32]).expect("key")
}

pub fn sender_key() -> SigningKey {
    SigningKey::from_slice(&[22u8; 32]).expect("key")
}

pub struct TestChain {
    pub db: Arc<dyn KeyValueStore>,
    pub chain: ChainStore,
    pub state: StateDB,
    pub head: BlockHeader,
    pub schedule: ProposerSchedule,
}

/// Schedule assigning every height of the first epoch to the test
/// proposer.
pub fn single_proposer_schedule() -> ProposerSchedule {
    let mut validators = BTreeMap::new();
    validators.insert(address_of(&proposer_key()), U256::one());
    ProposerSchedule::new(b"", 0, &validators)
}

/// Fresh in-memory chain with the given accounts funded at genesis.
pub fn setup(balances: &[(H160, U256)]) -> TestChain {
    let db: Arc<dyn KeyValueStore> = Arc::new(MemoryDb::new());
    let chain = ChainStore::new(db.clone(), CHAIN_ID).expect("chain store");
    let mut state = StateDB::new(EMPTY_ROOT_HASH, db.clone());
    let genesis = GenesisConfig {
        timestamp: 0,
        accounts: balances
            .iter()
            .map(|(address, balance)| GenesisAccount {
                address: format!("{address:#x}"),
                balance: balance.to_string(),
            })
            .collect(),
        validators: Vec::new(),
    };
    let head = ensure_genesis(&chain, &mut state, &genesis).expect("genesis");
    state.reset(head.state_root);
    TestChain {
        db,
        chain,
        state,
        head,
        schedule: single_proposer_schedule(),
    }
}

pub fn signed_tx(
    key: &SigningKey,
    to: H160,
    nonce: u64,
    amount: U256,
    data: Vec<u8>,
    gas: u64,
    gas_price: u64,
) -> Transaction {
    let mut tx = Transaction::new(
        to,
        nonce,
        amount,
        data,
        gas,
        U256::from(gas_price),
        String::new(),
    );
    tx.sign(key, CHAIN_ID).expect("sign");
    tx
}

/// Builds a block from the given transactions, seals it and drives it
/// through the full validation path of the chain store.
pub fn build_and_insert(tc: &mut TestChain, txs: Vec<Transaction>) -> Block {
    let block = build_block(tc, txs);
    insert_block(tc, &block);
    block
}

pub fn build_block(tc: &mut TestChain, txs: Vec<Transaction>) -> Block {
    let mempool = Mempool::new(CHAIN_ID);
    for tx in txs {
        mempool.add(tx).expect("queue transaction");
    }
    let validator = TxValidator::new(CHAIN_ID, U256::zero());
    let coinbase = address_of(&proposer_key());
    let builder = BlockBuilder::new(&mempool, &validator, coinbase, CHAIN_ID);
    let mut block = builder.build(&tc.head, &mut tc.state).expect("build block");
    block.header.seal(&proposer_key()).expect("seal");
    block
}

pub fn insert_block(tc: &mut TestChain, block: &Block) {
    let (inserted, result) =
        tc.chain
            .insert_chain(std::slice::from_ref(block), &mut tc.state, &tc.schedule);
    result.expect("insert block");
    assert_eq!(inserted, 1);
    tc.head = tc.chain.current_header().expect("head");
}

/// Init code deploying a runtime that returns the constant 5.
pub fn returning_five_init_code() -> Vec<u8> {
    let runtime = [0x60u8, 0x05, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
    let mut code = vec![0x69];
    code.extend_from_slice(&runtime);
    code.extend_from_slice(&[0x60, 0x00, 0x52, 0x60, 0x0a, 0x60, 0x16, 0xf3]);
    code
}

/// Init code deploying a runtime that always reverts.
pub fn reverting_init_code() -> Vec<u8> {
    // runtime: PUSH1 00 PUSH1 00 REVERT
    let runtime = [0x60u8, 0x00, 0x60, 0x00, 0xfd];
    let mut code = vec![0x64];
    code.extend_from_slice(&runtime);
    code.extend_from_slice(&[0x60, 0x00, 0x52, 0x60, 0x05, 0x60, 0x1b, 0xf3]);
    code
}

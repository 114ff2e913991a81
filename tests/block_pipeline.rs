//! End-to-end exercises of the build → validate → insert pipeline.

mod common;

use aurum_chain::crypto::{address_of, create_address};
use aurum_chain::errors::{BlockError, ChainError};
use aurum_chain::evm::{Evm, EvmContext};
use aurum_chain::params::BLOCK_GAS_LIMIT;
use aurum_chain::types::{RECEIPT_STATUS_REVERT, RECEIPT_STATUS_SUCCESS};
use common::*;
use ethereum_types::{BloomInput, H160, U256};

fn eth(pow: u8) -> U256 {
    U256::from(10u64).pow(U256::from(pow))
}

#[test]
fn simple_transfer_end_to_end() {
    let sender = address_of(&sender_key());
    let recipient = H160::repeat_byte(0xb0);
    let mut tc = setup(&[(sender, eth(20))]);

    let tx = signed_tx(&sender_key(), recipient, 0, eth(18), Vec::new(), 21_000, 20);
    let tx_hash = tx.hash();
    let block = build_and_insert(&mut tc, vec![tx]);

    assert_eq!(block.transactions.len(), 1);
    assert_eq!(block.header.gas_used, 21_000);

    let receipt = tc.chain.get_receipt(tx_hash).unwrap().expect("receipt");
    assert_eq!(receipt.status, RECEIPT_STATUS_SUCCESS);
    assert_eq!(receipt.gas_used, 21_000);
    assert_eq!(receipt.block_hash, block.hash());

    assert_eq!(
        tc.state.get_balance(sender).unwrap(),
        eth(20) - eth(18) - U256::from(21_000u64 * 20)
    );
    assert_eq!(tc.state.get_balance(recipient).unwrap(), eth(18));
    assert_eq!(tc.state.get_nonce(sender).unwrap(), 1);
}

#[test]
fn replayed_transfer_is_skipped_by_the_builder() {
    let sender = address_of(&sender_key());
    let mut tc = setup(&[(sender, eth(20))]);

    let tx = signed_tx(
        &sender_key(),
        H160::repeat_byte(0xb0),
        0,
        eth(18),
        Vec::new(),
        21_000,
        20,
    );
    build_and_insert(&mut tc, vec![tx.clone()]);
    let balance_after_first = tc.state.get_balance(sender).unwrap();

    let replay = build_block(&mut tc, vec![tx]);
    assert!(replay.transactions.is_empty());
    assert_eq!(tc.state.get_balance(sender).unwrap(), balance_after_first);
    assert_eq!(tc.state.get_nonce(sender).unwrap(), 1);
}

#[test]
fn underfunded_sender_cannot_buy_gas() {
    let sender = address_of(&sender_key());
    let mut tc = setup(&[(sender, U256::from(100u64))]);

    let tx = signed_tx(
        &sender_key(),
        H160::repeat_byte(0xb0),
        0,
        U256::zero(),
        Vec::new(),
        21_000,
        20,
    );
    let block = build_block(&mut tc, vec![tx]);
    assert!(block.transactions.is_empty());
    assert_eq!(tc.state.get_balance(sender).unwrap(), U256::from(100u64));
    assert_eq!(tc.state.get_nonce(sender).unwrap(), 0);
}

#[test]
fn contract_creation_and_call() {
    let sender = address_of(&sender_key());
    let mut tc = setup(&[(sender, eth(20))]);

    let deploy = signed_tx(
        &sender_key(),
        H160::zero(),
        0,
        U256::zero(),
        returning_five_init_code(),
        5_000_000,
        1,
    );
    let deploy_hash = deploy.hash();
    build_and_insert(&mut tc, vec![deploy]);

    let receipt = tc.chain.get_receipt(deploy_hash).unwrap().expect("receipt");
    assert_eq!(receipt.status, RECEIPT_STATUS_SUCCESS);
    let contract = receipt.contract_address.expect("contract address");
    assert_eq!(contract, create_address(sender, 0));
    assert!(!tc.state.get_code(contract).unwrap().is_empty());

    let call = signed_tx(
        &sender_key(),
        contract,
        1,
        U256::zero(),
        Vec::new(),
        100_000,
        1,
    );
    let call_hash = call.hash();
    build_and_insert(&mut tc, vec![call]);
    let call_receipt = tc.chain.get_receipt(call_hash).unwrap().expect("receipt");
    assert_eq!(call_receipt.status, RECEIPT_STATUS_SUCCESS);

    // read-only query sees the same result
    let head = tc.head.clone();
    let ctx = EvmContext {
        origin: sender,
        gas_price: U256::zero(),
        coinbase: head.proposer,
        height: head.height,
        timestamp: head.timestamp,
        prevrandao: head.prevrandao,
    };
    let mut evm = Evm::new(&mut tc.state, ctx);
    let outcome = evm
        .static_call(sender, contract, Vec::new(), BLOCK_GAS_LIMIT)
        .unwrap();
    assert!(outcome.error.is_none());
    assert_eq!(outcome.output.len(), 32);
    assert_eq!(outcome.output[31], 5);
}

#[test]
fn reverting_call_charges_gas_and_bumps_nonce() {
    let sender = address_of(&sender_key());
    let mut tc = setup(&[(sender, eth(20))]);

    let deploy = signed_tx(
        &sender_key(),
        H160::zero(),
        0,
        U256::zero(),
        reverting_init_code(),
        5_000_000,
        1,
    );
    build_and_insert(&mut tc, vec![deploy]);
    let contract = create_address(sender, 0);
    let balance_before = tc.state.get_balance(sender).unwrap();

    let call = signed_tx(&sender_key(), contract, 1, U256::zero(), Vec::new(), 100_000, 3);
    let call_hash = call.hash();
    build_and_insert(&mut tc, vec![call]);

    let receipt = tc.chain.get_receipt(call_hash).unwrap().expect("receipt");
    assert_eq!(receipt.status, RECEIPT_STATUS_REVERT);
    assert!(receipt.logs.is_empty());
    assert_eq!(tc.state.get_nonce(sender).unwrap(), 2);
    assert_eq!(
        balance_before - tc.state.get_balance(sender).unwrap(),
        U256::from(receipt.gas_used) * U256::from(3u64)
    );
}

#[test]
fn independent_nodes_derive_identical_roots() {
    let sender = address_of(&sender_key());
    let txs = || {
        vec![
            signed_tx(
                &sender_key(),
                H160::repeat_byte(0xb0),
                0,
                eth(17),
                Vec::new(),
                21_000,
                5,
            ),
            signed_tx(
                &sender_key(),
                H160::repeat_byte(0xb1),
                1,
                eth(16),
                Vec::new(),
                21_000,
                5,
            ),
        ]
    };

    let mut first = setup(&[(sender, eth(20))]);
    let mut second = setup(&[(sender, eth(20))]);
    let block_a = build_block(&mut first, txs());
    let block_b = build_block(&mut second, txs());

    assert_eq!(block_a.header.state_root, block_b.header.state_root);
    assert_eq!(
        block_a.header.transactions_root,
        block_b.header.transactions_root
    );
    assert_eq!(block_a.header.receipt_root, block_b.header.receipt_root);
    assert_eq!(block_a.header.bloom, block_b.header.bloom);
}

#[test]
fn blocks_replicate_onto_an_identical_chain() {
    let sender = address_of(&sender_key());
    let mut origin = setup(&[(sender, eth(20))]);
    let block_one = build_and_insert(
        &mut origin,
        vec![signed_tx(
            &sender_key(),
            H160::repeat_byte(0xb0),
            0,
            eth(17),
            Vec::new(),
            21_000,
            5,
        )],
    );
    let block_two = build_and_insert(
        &mut origin,
        vec![signed_tx(
            &sender_key(),
            H160::repeat_byte(0xb1),
            1,
            eth(16),
            Vec::new(),
            21_000,
            5,
        )],
    );

    // a fresh node with the same genesis accepts the run wholesale
    let mut replica = setup(&[(sender, eth(20))]);
    let (inserted, result) = replica.chain.insert_chain(
        &[block_one, block_two.clone()],
        &mut replica.state,
        &replica.schedule,
    );
    result.expect("replication");
    assert_eq!(inserted, 2);
    assert_eq!(
        replica.chain.current_header().unwrap().hash(),
        block_two.hash()
    );
}

#[test]
fn tampered_gas_used_rejects_only_the_bad_block() {
    let sender = address_of(&sender_key());
    let mut origin = setup(&[(sender, eth(20))]);
    let block_one = build_and_insert(
        &mut origin,
        vec![signed_tx(
            &sender_key(),
            H160::repeat_byte(0xb0),
            0,
            eth(17),
            Vec::new(),
            21_000,
            5,
        )],
    );
    let mut block_two = build_and_insert(
        &mut origin,
        vec![signed_tx(
            &sender_key(),
            H160::repeat_byte(0xb1),
            1,
            eth(16),
            Vec::new(),
            21_000,
            5,
        )],
    );
    block_two.header.gas_used += 1;
    block_two.header.seal(&proposer_key()).unwrap();

    let mut replica = setup(&[(sender, eth(20))]);
    let (inserted, result) = replica.chain.insert_chain(
        &[block_one.clone(), block_two],
        &mut replica.state,
        &replica.schedule,
    );
    assert_eq!(inserted, 1);
    match result.unwrap_err() {
        ChainError::Block(BlockError::GasUsedMismatch { .. }) => {}
        other => panic!("unexpected error {other:?}"),
    }
    // the good prefix stays committed
    assert_eq!(
        replica.chain.current_header().unwrap().hash(),
        block_one.hash()
    );
}

#[test]
fn emitted_logs_land_in_receipt_and_header_bloom() {
    let sender = address_of(&sender_key());
    let mut tc = setup(&[(sender, eth(20))]);

    // runtime: MSTORE8 0x01 at 0, LOG1 topic 0xbeef over mem[0..1], STOP
    let runtime = [
        0x60u8, 0x01, 0x60, 0x00, 0x53, 0x61, 0xbe, 0xef, 0x60, 0x01, 0x60, 0x00, 0xa1, 0x00,
    ];
    let mut init = vec![0x6d];
    init.extend_from_slice(&runtime);
    init.extend_from_slice(&[0x60, 0x00, 0x52, 0x60, 0x0e, 0x60, 0x12, 0xf3]);

    let deploy = signed_tx(&sender_key(), H160::zero(), 0, U256::zero(), init, 5_000_000, 1);
    build_and_insert(&mut tc, vec![deploy]);
    let contract = create_address(sender, 0);

    let call = signed_tx(&sender_key(), contract, 1, U256::zero(), Vec::new(), 200_000, 1);
    let call_hash = call.hash();
    let block = build_and_insert(&mut tc, vec![call]);

    let receipt = tc.chain.get_receipt(call_hash).unwrap().expect("receipt");
    assert_eq!(receipt.logs.len(), 1);
    let log = &receipt.logs[0];
    assert_eq!(log.address, contract);
    assert_eq!(log.block_hash, block.hash());
    assert!(receipt
        .logs_bloom
        .contains_input(BloomInput::Raw(contract.as_bytes())));
    assert!(block
        .header
        .bloom
        .contains_input(BloomInput::Raw(log.topics[0].as_bytes())));
}

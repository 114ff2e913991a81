//! State-transition engine: applies one transaction against the state
//! following the fixed sequence of nonce and balance pre-checks, gas
//! purchase, intrinsic-gas charge, VM invocation, refund and fee credit,
//! and finally receipt emission.

use ethereum_types::{H160, U256};

use crate::crypto::create_address;
use crate::errors::{ChainError, ChainResult, TxError, VmError};
use crate::evm::{Evm, EvmContext};
use crate::params::{
    BLOCK_GAS_LIMIT, TX_DATA_NON_ZERO_GAS, TX_DATA_ZERO_GAS, TX_GAS, TX_GAS_CONTRACT_CREATION,
};
use crate::state::StateDB;
use crate::types::{
    logs_bloom, Block, BlockHeader, Log, Receipt, Transaction, RECEIPT_STATUS_REVERT,
    RECEIPT_STATUS_SUCCESS,
};

/// Remaining gas allowance of the block under construction or
/// validation.
#[derive(Clone, Copy, Debug)]
pub struct GasPool(u64);

impl GasPool {
    pub fn new(limit: u64) -> Self {
        GasPool(limit)
    }

    pub fn sub_gas(&mut self, amount: u64) -> Result<(), TxError> {
        if self.0 < amount {
            return Err(TxError::GasLimitReached);
        }
        self.0 -= amount;
        Ok(())
    }

    pub fn add_gas(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }

    pub fn gas(&self) -> u64 {
        self.0
    }
}

/// Gas consumed before the first VM instruction runs. Saturation is an
/// error: a transaction whose data cannot be priced in a u64 is invalid.
pub fn intrinsic_gas(data: &[u8], contract_creation: bool) -> Result<u64, TxError> {
    let mut gas = if contract_creation {
        TX_GAS_CONTRACT_CREATION
    } else {
        TX_GAS
    };
    if !data.is_empty() {
        let non_zero = data.iter().filter(|byte| **byte != 0).count() as u64;
        if (u64::MAX - gas) / TX_DATA_NON_ZERO_GAS < non_zero {
            return Err(TxError::OutOfGas);
        }
        gas += non_zero * TX_DATA_NON_ZERO_GAS;

        let zero = data.len() as u64 - non_zero;
        if (u64::MAX - gas) / TX_DATA_ZERO_GAS < zero {
            return Err(TxError::OutOfGas);
        }
        gas += zero * TX_DATA_ZERO_GAS;
    }
    Ok(gas)
}

/// Applies `tx` to `state`. On success the receipt is returned and
/// `used_gas` has accumulated the transaction's gas; on error the caller
/// owns reverting any partial effects (the builder rolls back to its
/// snapshot, the validator rejects the block).
pub fn apply_transaction(
    chain_id: u64,
    author: H160,
    gas_pool: &mut GasPool,
    state: &mut StateDB,
    header: &BlockHeader,
    tx: &Transaction,
    used_gas: &mut u64,
) -> ChainResult<Receipt> {
    let from = tx.sender(chain_id)?;
    if !state.exist(from)? {
        state.create_account(from)?;
    }
    let contract_creation = tx.is_create();
    if !contract_creation && !state.exist(tx.to)? {
        state.create_account(tx.to)?;
    }

    // nonce pre-check
    let nonce = state.get_nonce(from)?;
    if nonce < tx.nonce {
        return Err(TxError::NonceTooHigh.into());
    }
    if nonce > tx.nonce {
        return Err(TxError::NonceTooLow.into());
    }

    // gas purchase: the full limit is paid up front and debited from the
    // block gas pool
    let upfront = U256::from(tx.gas) * tx.gas_price;
    if state.get_balance(from)? < upfront {
        return Err(TxError::InsufficientBalanceForGas.into());
    }
    gas_pool.sub_gas(tx.gas)?;
    let initial_gas = tx.gas;
    let mut gas = tx.gas;
    state.sub_balance(from, upfront)?;

    let intrinsic = intrinsic_gas(&tx.data, contract_creation)?;
    if gas < intrinsic {
        return Err(TxError::OutOfGas.into());
    }
    gas -= intrinsic;

    let ctx = EvmContext {
        origin: from,
        gas_price: tx.gas_price,
        coinbase: author,
        height: header.height,
        timestamp: header.timestamp,
        prevrandao: header.prevrandao,
    };
    let vm_error;
    {
        let mut evm = Evm::new(state, ctx);
        if contract_creation {
            let outcome = evm.create(from, tx.data.clone(), gas, tx.amount)?;
            gas = outcome.gas_left;
            vm_error = outcome.error;
        } else {
            {
                let inner = evm.state();
                let next = inner.get_nonce(from)? + 1;
                inner.set_nonce(from, next)?;
            }
            let outcome = evm.call(from, tx.to, tx.data.clone(), gas, tx.amount)?;
            gas = outcome.gas_left;
            vm_error = outcome.error;
        }
    }
    // the one VM error that is a consensus failure: the value transfer
    // itself could not be funded
    if vm_error == Some(VmError::InsufficientBalance) {
        return Err(ChainError::Vm(VmError::InsufficientBalance));
    }

    // refund, capped at half the gas spent, then fee credit to the
    // proposer; leftover gas returns to the block pool
    let refund = ((initial_gas - gas) / 2).min(state.get_refund());
    gas += refund;
    state.add_balance(from, U256::from(gas) * tx.gas_price)?;
    gas_pool.add_gas(gas);
    let gas_used = initial_gas - gas;
    state.add_balance(author, U256::from(gas_used) * tx.gas_price)?;

    state.finalise(true)?;
    *used_gas += gas_used;

    let status = if vm_error.is_some() {
        RECEIPT_STATUS_REVERT
    } else {
        RECEIPT_STATUS_SUCCESS
    };
    let mut receipt = Receipt::new(status, *used_gas);
    receipt.tx_hash = tx.hash();
    receipt.from = from;
    receipt.to = if contract_creation { None } else { Some(tx.to) };
    receipt.amount = tx.amount;
    receipt.gas_used = gas_used;
    receipt.block_number = header.height;
    receipt.tx_index = state.current_tx_index();
    if contract_creation && vm_error.is_none() {
        receipt.contract_address = Some(create_address(from, tx.nonce));
    }
    receipt.logs = state.get_logs(tx.hash());
    receipt.logs_bloom = logs_bloom(&receipt.logs);
    Ok(receipt)
}

/// Re-executes every transaction of a received block against the parent
/// state, in order, accumulating receipts, flattened logs and total gas.
pub fn process_block(
    chain_id: u64,
    state: &mut StateDB,
    block: &Block,
) -> ChainResult<(Vec<Receipt>, Vec<Log>, u64)> {
    let mut gas_pool = GasPool::new(BLOCK_GAS_LIMIT);
    let mut used_gas = 0u64;
    let mut receipts = Vec::with_capacity(block.transactions.len());
    let mut all_logs = Vec::new();
    for (index, tx) in block.transactions.iter().enumerate() {
        state.prepare(tx.hash(), block.header.parent_hash, index as u32);
        let receipt = apply_transaction(
            chain_id,
            block.header.proposer,
            &mut gas_pool,
            state,
            &block.header,
            tx,
            &mut used_gas,
        )?;
        all_logs.extend(receipt.logs.clone());
        receipts.push(receipt);
    }
    Ok((receipts, all_logs, used_gas))
}

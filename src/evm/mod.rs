//! Contract-execution environment over the state DB: value transfer,
//! call/create entry points with internal snapshotting, and the minimal
//! interpreter in [`interpreter`].

mod interpreter;

use ethereum_types::{H160, H256, U256};

use crate::crypto::create_address;
use crate::errors::{ChainResult, VmError};
use crate::params::{CALL_CREATE_DEPTH, CREATE_DATA_GAS, MAX_CODE_SIZE};
use crate::state::StateDB;

use interpreter::{execute, Contract};

/// Per-transaction execution context visible to contracts.
#[derive(Clone, Debug)]
pub struct EvmContext {
    pub origin: H160,
    pub gas_price: U256,
    pub coinbase: H160,
    pub height: u64,
    pub timestamp: u64,
    pub prevrandao: H256,
}

#[derive(Debug)]
pub struct CallOutcome {
    pub output: Vec<u8>,
    pub gas_left: u64,
    pub error: Option<VmError>,
}

#[derive(Debug)]
pub struct CreateOutcome {
    pub output: Vec<u8>,
    pub address: H160,
    pub gas_left: u64,
    pub error: Option<VmError>,
}

pub struct Evm<'a> {
    state: &'a mut StateDB,
    ctx: EvmContext,
    depth: usize,
}

impl<'a> Evm<'a> {
    pub fn new(state: &'a mut StateDB, ctx: EvmContext) -> Self {
        Self {
            state,
            ctx,
            depth: 0,
        }
    }

    pub fn state(&mut self) -> &mut StateDB {
        &mut *self.state
    }

    fn can_transfer(&mut self, from: H160, value: U256) -> ChainResult<bool> {
        Ok(self.state.get_balance(from)? >= value)
    }

    fn transfer(&mut self, from: H160, to: H160, value: U256) -> ChainResult<()> {
        if value.is_zero() {
            return Ok(());
        }
        self.state.sub_balance(from, value)?;
        self.state.add_balance(to, value)
    }

    /// Message call. The callee account is created on first touch; calls
    /// to code-less accounts succeed immediately with all gas intact.
    pub fn call(
        &mut self,
        caller: H160,
        to: H160,
        input: Vec<u8>,
        gas: u64,
        value: U256,
    ) -> ChainResult<CallOutcome> {
        if self.depth >= CALL_CREATE_DEPTH {
            return Ok(CallOutcome {
                output: Vec::new(),
                gas_left: gas,
                error: Some(VmError::Depth),
            });
        }
        if !self.can_transfer(caller, value)? {
            return Ok(CallOutcome {
                output: Vec::new(),
                gas_left: gas,
                error: Some(VmError::InsufficientBalance),
            });
        }
        let snapshot = self.state.snapshot();
        if !self.state.exist(to)? {
            self.state.create_account(to)?;
        }
        self.transfer(caller, to, value)?;
        let code = self.state.get_code(to)?;
        if code.is_empty() {
            return Ok(CallOutcome {
                output: Vec::new(),
                gas_left: gas,
                error: None,
            });
        }
        let contract = Contract {
            caller,
            address: to,
            value,
            code,
            input,
        };
        self.depth += 1;
        let result = execute(self.state, &self.ctx, &contract, gas, false)?;
        self.depth -= 1;
        if result.error.is_some() {
            self.state.revert_to_snapshot(snapshot)?;
        }
        Ok(CallOutcome {
            output: result.output,
            gas_left: result.gas_left,
            error: result.error,
        })
    }

    /// Read-only call used by client queries; any state write inside the
    /// frame fails with `WriteProtection` and effects are discarded.
    pub fn static_call(
        &mut self,
        caller: H160,
        to: H160,
        input: Vec<u8>,
        gas: u64,
    ) -> ChainResult<CallOutcome> {
        if self.depth >= CALL_CREATE_DEPTH {
            return Ok(CallOutcome {
                output: Vec::new(),
                gas_left: gas,
                error: Some(VmError::Depth),
            });
        }
        let snapshot = self.state.snapshot();
        let code = self.state.get_code(to)?;
        if code.is_empty() {
            return Ok(CallOutcome {
                output: Vec::new(),
                gas_left: gas,
                error: None,
            });
        }
        let contract = Contract {
            caller,
            address: to,
            value: U256::zero(),
            code,
            input,
        };
        self.depth += 1;
        let result = execute(self.state, &self.ctx, &contract, gas, true)?;
        self.depth -= 1;
        self.state.revert_to_snapshot(snapshot)?;
        Ok(CallOutcome {
            output: result.output,
            gas_left: result.gas_left,
            error: result.error,
        })
    }

    /// Contract creation. The caller nonce is consumed before the init
    /// code runs, so a failed deployment still burns it.
    pub fn create(
        &mut self,
        caller: H160,
        init_code: Vec<u8>,
        gas: u64,
        value: U256,
    ) -> ChainResult<CreateOutcome> {
        if self.depth >= CALL_CREATE_DEPTH {
            return Ok(CreateOutcome {
                output: Vec::new(),
                address: H160::zero(),
                gas_left: gas,
                error: Some(VmError::Depth),
            });
        }
        if !self.can_transfer(caller, value)? {
            return Ok(CreateOutcome {
                output: Vec::new(),
                address: H160::zero(),
                gas_left: gas,
                error: Some(VmError::InsufficientBalance),
            });
        }
        let nonce = self.state.get_nonce(caller)?;
        self.state.set_nonce(caller, nonce + 1)?;
        let address = create_address(caller, nonce);

        let snapshot = self.state.snapshot();
        self.state.create_account(address)?;
        self.transfer(caller, address, value)?;
        let contract = Contract {
            caller,
            address,
            value,
            code: init_code,
            input: Vec::new(),
        };
        self.depth += 1;
        let result = execute(self.state, &self.ctx, &contract, gas, false)?;
        self.depth -= 1;

        if let Some(error) = result.error {
            self.state.revert_to_snapshot(snapshot)?;
            return Ok(CreateOutcome {
                output: result.output,
                address,
                gas_left: result.gas_left,
                error: Some(error),
            });
        }

        let code = result.output;
        if code.len() > MAX_CODE_SIZE {
            self.state.revert_to_snapshot(snapshot)?;
            return Ok(CreateOutcome {
                output: Vec::new(),
                address,
                gas_left: 0,
                error: Some(VmError::MaxCodeSizeExceeded),
            });
        }
        let deposit = CREATE_DATA_GAS * code.len() as u64;
        if result.gas_left < deposit {
            self.state.revert_to_snapshot(snapshot)?;
            return Ok(CreateOutcome {
                output: Vec::new(),
                address,
                gas_left: 0,
                error: Some(VmError::OutOfGas),
            });
        }
        self.state.set_code(address, code.clone())?;
        Ok(CreateOutcome {
            output: code,
            address,
            gas_left: result.gas_left - deposit,
            error: None,
        })
    }
}

/// Init code that deploys a runtime returning the constant 5; the shared
/// fixture for contract tests.
#[cfg(test)]
pub(crate) fn returning_five_init_code() -> Vec<u8> {
    // runtime: PUSH1 05 PUSH1 00 MSTORE PUSH1 20 PUSH1 00 RETURN
    let runtime = [0x60u8, 0x05, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
    // init: PUSH10 <runtime> PUSH1 00 MSTORE PUSH1 0a PUSH1 16 RETURN
    let mut code = vec![0x69];
    code.extend_from_slice(&runtime);
    code.extend_from_slice(&[0x60, 0x00, 0x52, 0x60, 0x0a, 0x60, 0x16, 0xf3]);
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryDb;
    use crate::params::EMPTY_ROOT_HASH;
    use std::sync::Arc;

    fn context() -> EvmContext {
        EvmContext {
            origin: H160::repeat_byte(0x01),
            gas_price: U256::from(1u8),
            coinbase: H160::repeat_byte(0x02),
            height: 1,
            timestamp: 1_700_000_000,
            prevrandao: H256::zero(),
        }
    }

    fn funded_state(address: H160, balance: U256) -> StateDB {
        let mut state = StateDB::new(EMPTY_ROOT_HASH, Arc::new(MemoryDb::new()));
        state.add_balance(address, balance).unwrap();
        state
    }

    #[test]
    fn call_to_account_without_code_moves_value() {
        let caller = H160::repeat_byte(0x01);
        let mut state = funded_state(caller, U256::from(1_000u64));
        let mut evm = Evm::new(&mut state, context());
        let outcome = evm
            .call(caller, H160::repeat_byte(0x09), Vec::new(), 50_000, U256::from(400u64))
            .unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.gas_left, 50_000);
        assert_eq!(
            state.get_balance(H160::repeat_byte(0x09)).unwrap(),
            U256::from(400u64)
        );
    }

    #[test]
    fn transfer_beyond_balance_is_refused_with_gas_intact() {
        let caller = H160::repeat_byte(0x01);
        let mut state = funded_state(caller, U256::from(10u64));
        let mut evm = Evm::new(&mut state, context());
        let outcome = evm
            .call(caller, H160::repeat_byte(0x09), Vec::new(), 50_000, U256::from(11u64))
            .unwrap();
        assert_eq!(outcome.error, Some(VmError::InsufficientBalance));
        assert_eq!(outcome.gas_left, 50_000);
        assert_eq!(state.get_balance(caller).unwrap(), U256::from(10u64));
    }

    #[test]
    fn create_then_call_returns_constant() {
        let caller = H160::repeat_byte(0x01);
        let mut state = funded_state(caller, U256::from(1_000_000u64));
        let mut evm = Evm::new(&mut state, context());

        let created = evm
            .create(caller, returning_five_init_code(), 1_000_000, U256::zero())
            .unwrap();
        assert!(created.error.is_none());
        assert_eq!(created.address, create_address(caller, 0));

        let called = evm
            .call(caller, created.address, Vec::new(), 100_000, U256::zero())
            .unwrap();
        assert!(called.error.is_none());
        assert_eq!(called.output[31], 5);
        assert_eq!(state.get_nonce(caller).unwrap(), 1);
    }

    #[test]
    fn failed_init_code_keeps_nonce_and_reverts_effects() {
        let caller = H160::repeat_byte(0x01);
        let mut state = funded_state(caller, U256::from(1_000u64));
        let mut evm = Evm::new(&mut state, context());
        // init code immediately reverts
        let outcome = evm
            .create(caller, vec![0x60, 0x00, 0x60, 0x00, 0xfd], 100_000, U256::from(5u64))
            .unwrap();
        assert_eq!(outcome.error, Some(VmError::Revert));
        assert_eq!(state.get_nonce(caller).unwrap(), 1);
        assert_eq!(state.get_balance(caller).unwrap(), U256::from(1_000u64));
        assert!(!state.exist(outcome.address).unwrap());
    }

    #[test]
    fn static_call_rejects_writes_and_discards_effects() {
        let caller = H160::repeat_byte(0x01);
        let target = H160::repeat_byte(0x0a);
        let mut state = funded_state(caller, U256::from(1_000u64));
        state
            .set_code(target, vec![0x60, 0x01, 0x60, 0x00, 0x55, 0x00])
            .unwrap();
        let mut evm = Evm::new(&mut state, context());
        let outcome = evm.static_call(caller, target, Vec::new(), 100_000).unwrap();
        assert_eq!(outcome.error, Some(VmError::WriteProtection));
        assert!(state
            .get_state(target, H256::zero())
            .unwrap()
            .is_zero());
    }
}

//! Stack-machine interpreter for the contract bytecode the chain
//! executes. Covers the arithmetic, comparison, memory, storage, flow,
//! environment and logging opcodes with legacy gas rules; nested calls
//! are not dispatched from bytecode.

use std::collections::HashSet;

use ethereum_types::{H160, H256, U256};
use keccak_hash::keccak;

use crate::errors::{ChainResult, VmError};
use crate::evm::EvmContext;
use crate::state::StateDB;
use crate::types::Log;

const G_BASE: u64 = 2;
const G_VERYLOW: u64 = 3;
const G_LOW: u64 = 5;
const G_MID: u64 = 8;
const G_HIGH: u64 = 10;
const G_JUMPDEST: u64 = 1;
const G_BALANCE: u64 = 400;
const G_SLOAD: u64 = 200;
const G_SSTORE_SET: u64 = 20_000;
const G_SSTORE_RESET: u64 = 5_000;
const R_SSTORE_CLEAR: u64 = 15_000;
const G_EXP: u64 = 10;
const G_EXP_BYTE: u64 = 50;
const G_KECCAK: u64 = 30;
const G_KECCAK_WORD: u64 = 6;
const G_COPY_WORD: u64 = 3;
const G_LOG: u64 = 375;
const G_LOG_TOPIC: u64 = 375;
const G_LOG_DATA: u64 = 8;
const G_SELFDESTRUCT: u64 = 5_000;
const R_SELFDESTRUCT: u64 = 24_000;
const STACK_LIMIT: usize = 1024;

pub(crate) struct Contract {
    pub caller: H160,
    pub address: H160,
    pub value: U256,
    pub code: Vec<u8>,
    pub input: Vec<u8>,
}

/// Raw interpreter outcome. `Revert` keeps its output and remaining gas;
/// every other error burns the remainder.
pub(crate) struct ExecResult {
    pub output: Vec<u8>,
    pub gas_left: u64,
    pub error: Option<VmError>,
}

struct Machine {
    stack: Vec<U256>,
    memory: Vec<u8>,
    gas: u64,
}

impl Machine {
    fn push(&mut self, value: U256) -> Result<(), VmError> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<U256, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn use_gas(&mut self, amount: u64) -> Result<(), VmError> {
        if self.gas < amount {
            return Err(VmError::OutOfGas);
        }
        self.gas -= amount;
        Ok(())
    }

    /// Expands memory to cover `[offset, offset+size)`, charging the
    /// quadratic expansion cost for new words.
    fn expand(&mut self, offset: U256, size: U256) -> Result<(), VmError> {
        if size.is_zero() {
            return Ok(());
        }
        let offset = to_usize(offset)?;
        let size = to_usize(size)?;
        let end = offset.checked_add(size).ok_or(VmError::OutOfGas)?;
        let new_words = (end as u64).div_ceil(32);
        let old_words = (self.memory.len() as u64) / 32;
        if new_words > old_words {
            self.use_gas(mem_cost(new_words) - mem_cost(old_words))?;
            self.memory.resize(new_words as usize * 32, 0);
        }
        Ok(())
    }

    fn read_slice(&self, offset: U256, size: U256) -> Result<Vec<u8>, VmError> {
        if size.is_zero() {
            return Ok(Vec::new());
        }
        let offset = to_usize(offset)?;
        let size = to_usize(size)?;
        Ok(self.memory[offset..offset + size].to_vec())
    }
}

fn mem_cost(words: u64) -> u64 {
    3 * words + words * words / 512
}

fn to_usize(value: U256) -> Result<usize, VmError> {
    if value > U256::from(u32::MAX) {
        return Err(VmError::OutOfGas);
    }
    Ok(value.as_usize())
}

fn to_h256(value: U256) -> H256 {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    H256(out)
}

fn to_address(value: U256) -> H160 {
    H160::from_slice(&to_h256(value)[12..])
}

fn address_word(address: H160) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

/// Zero-padded 32-byte read used by CALLDATALOAD.
fn padded_word(data: &[u8], offset: usize) -> U256 {
    let mut word = [0u8; 32];
    for i in 0..32 {
        if let Some(byte) = data.get(offset + i) {
            word[i] = *byte;
        }
    }
    U256::from_big_endian(&word)
}

/// Zero-padded arbitrary-length copy used by CALLDATACOPY and CODECOPY.
fn padded_copy(target: &mut [u8], source: &[u8], offset: usize) {
    for (i, slot) in target.iter_mut().enumerate() {
        *slot = source.get(offset + i).copied().unwrap_or(0);
    }
}

fn jump_destinations(code: &[u8]) -> HashSet<usize> {
    let mut destinations = HashSet::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let op = code[pc];
        if op == 0x5b {
            destinations.insert(pc);
        }
        if (0x60..=0x7f).contains(&op) {
            pc += (op - 0x60) as usize + 1;
        }
        pc += 1;
    }
    destinations
}

pub(crate) fn execute(
    state: &mut StateDB,
    ctx: &EvmContext,
    contract: &Contract,
    gas: u64,
    readonly: bool,
) -> ChainResult<ExecResult> {
    let mut machine = Machine {
        stack: Vec::new(),
        memory: Vec::new(),
        gas,
    };
    match run(state, ctx, contract, &mut machine, readonly) {
        Ok(output) => Ok(ExecResult {
            output,
            gas_left: machine.gas,
            error: None,
        }),
        Err(Failure::Vm(VmError::Revert)) => Ok(ExecResult {
            output: machine.take_revert_output(),
            gas_left: machine.gas,
            error: Some(VmError::Revert),
        }),
        Err(Failure::Vm(error)) => Ok(ExecResult {
            output: Vec::new(),
            gas_left: 0,
            error: Some(error),
        }),
        Err(Failure::Fatal(error)) => Err(error),
    }
}

enum Failure {
    Vm(VmError),
    Fatal(crate::errors::ChainError),
}

impl From<VmError> for Failure {
    fn from(error: VmError) -> Self {
        Failure::Vm(error)
    }
}

impl From<crate::errors::ChainError> for Failure {
    fn from(error: crate::errors::ChainError) -> Self {
        Failure::Fatal(error)
    }
}

impl Machine {
    // REVERT parks its payload here so `execute` can hand it back.
    fn take_revert_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.memory)
    }
}

fn run(
    state: &mut StateDB,
    ctx: &EvmContext,
    contract: &Contract,
    m: &mut Machine,
    readonly: bool,
) -> Result<Vec<u8>, Failure> {
    let code = &contract.code;
    let destinations = jump_destinations(code);
    let mut pc = 0usize;

    while pc < code.len() {
        let op = code[pc];
        match op {
            // STOP
            0x00 => return Ok(Vec::new()),
            // ADD MUL SUB DIV MOD
            0x01 => {
                m.use_gas(G_VERYLOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(a.overflowing_add(b).0)?;
            }
            0x02 => {
                m.use_gas(G_LOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(a.overflowing_mul(b).0)?;
            }
            0x03 => {
                m.use_gas(G_VERYLOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(a.overflowing_sub(b).0)?;
            }
            0x04 => {
                m.use_gas(G_LOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(if b.is_zero() { U256::zero() } else { a / b })?;
            }
            0x06 => {
                m.use_gas(G_LOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(if b.is_zero() { U256::zero() } else { a % b })?;
            }
            // EXP
            0x0a => {
                let (base, exponent) = (m.pop()?, m.pop()?);
                let byte_len = (exponent.bits() as u64).div_ceil(8);
                m.use_gas(G_EXP + G_EXP_BYTE * byte_len)?;
                m.push(base.overflowing_pow(exponent).0)?;
            }
            // LT GT EQ ISZERO
            0x10 => {
                m.use_gas(G_VERYLOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(U256::from((a < b) as u8))?;
            }
            0x11 => {
                m.use_gas(G_VERYLOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(U256::from((a > b) as u8))?;
            }
            0x14 => {
                m.use_gas(G_VERYLOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(U256::from((a == b) as u8))?;
            }
            0x15 => {
                m.use_gas(G_VERYLOW)?;
                let a = m.pop()?;
                m.push(U256::from(a.is_zero() as u8))?;
            }
            // AND OR XOR NOT BYTE SHL SHR
            0x16 => {
                m.use_gas(G_VERYLOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(a & b)?;
            }
            0x17 => {
                m.use_gas(G_VERYLOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(a | b)?;
            }
            0x18 => {
                m.use_gas(G_VERYLOW)?;
                let (a, b) = (m.pop()?, m.pop()?);
                m.push(a ^ b)?;
            }
            0x19 => {
                m.use_gas(G_VERYLOW)?;
                let a = m.pop()?;
                m.push(!a)?;
            }
            0x1a => {
                m.use_gas(G_VERYLOW)?;
                let (index, word) = (m.pop()?, m.pop()?);
                let byte = if index < U256::from(32u8) {
                    to_h256(word)[index.as_usize()]
                } else {
                    0
                };
                m.push(U256::from(byte))?;
            }
            0x1b => {
                m.use_gas(G_VERYLOW)?;
                let (shift, value) = (m.pop()?, m.pop()?);
                m.push(if shift >= U256::from(256u16) {
                    U256::zero()
                } else {
                    value << shift.as_usize()
                })?;
            }
            0x1c => {
                m.use_gas(G_VERYLOW)?;
                let (shift, value) = (m.pop()?, m.pop()?);
                m.push(if shift >= U256::from(256u16) {
                    U256::zero()
                } else {
                    value >> shift.as_usize()
                })?;
            }
            // KECCAK256
            0x20 => {
                let (offset, size) = (m.pop()?, m.pop()?);
                let words = if size.is_zero() {
                    0
                } else {
                    (to_usize(size)? as u64).div_ceil(32)
                };
                m.use_gas(G_KECCAK + G_KECCAK_WORD * words)?;
                m.expand(offset, size)?;
                let data = m.read_slice(offset, size)?;
                m.push(U256::from_big_endian(keccak(&data).as_bytes()))?;
            }
            // Environment
            0x30 => {
                m.use_gas(G_BASE)?;
                m.push(address_word(contract.address))?;
            }
            0x31 => {
                m.use_gas(G_BALANCE)?;
                let address = to_address(m.pop()?);
                let balance = state.get_balance(address)?;
                m.push(balance)?;
            }
            0x32 => {
                m.use_gas(G_BASE)?;
                m.push(address_word(ctx.origin))?;
            }
            0x33 => {
                m.use_gas(G_BASE)?;
                m.push(address_word(contract.caller))?;
            }
            0x34 => {
                m.use_gas(G_BASE)?;
                m.push(contract.value)?;
            }
            0x35 => {
                m.use_gas(G_VERYLOW)?;
                let offset = m.pop()?;
                m.push(padded_word(&contract.input, to_usize(offset)?))?;
            }
            0x36 => {
                m.use_gas(G_BASE)?;
                m.push(U256::from(contract.input.len()))?;
            }
            0x37 | 0x39 => {
                let (mem_offset, data_offset, size) = (m.pop()?, m.pop()?, m.pop()?);
                let words = if size.is_zero() {
                    0
                } else {
                    (to_usize(size)? as u64).div_ceil(32)
                };
                m.use_gas(G_VERYLOW + G_COPY_WORD * words)?;
                m.expand(mem_offset, size)?;
                if !size.is_zero() {
                    let start = to_usize(mem_offset)?;
                    let length = to_usize(size)?;
                    let source = if op == 0x37 { &contract.input } else { code };
                    let from = to_usize(data_offset)?;
                    padded_copy(&mut m.memory[start..start + length], source, from);
                }
            }
            0x38 => {
                m.use_gas(G_BASE)?;
                m.push(U256::from(code.len()))?;
            }
            0x3a => {
                m.use_gas(G_BASE)?;
                m.push(ctx.gas_price)?;
            }
            0x41 => {
                m.use_gas(G_BASE)?;
                m.push(address_word(ctx.coinbase))?;
            }
            0x42 => {
                m.use_gas(G_BASE)?;
                m.push(U256::from(ctx.timestamp))?;
            }
            0x43 => {
                m.use_gas(G_BASE)?;
                m.push(U256::from(ctx.height))?;
            }
            0x44 => {
                m.use_gas(G_BASE)?;
                m.push(U256::from_big_endian(ctx.prevrandao.as_bytes()))?;
            }
            // POP MLOAD MSTORE MSTORE8
            0x50 => {
                m.use_gas(G_BASE)?;
                m.pop()?;
            }
            0x51 => {
                m.use_gas(G_VERYLOW)?;
                let offset = m.pop()?;
                m.expand(offset, U256::from(32u8))?;
                let start = to_usize(offset)?;
                let word = U256::from_big_endian(&m.memory[start..start + 32]);
                m.push(word)?;
            }
            0x52 => {
                m.use_gas(G_VERYLOW)?;
                let (offset, value) = (m.pop()?, m.pop()?);
                m.expand(offset, U256::from(32u8))?;
                let start = to_usize(offset)?;
                m.memory[start..start + 32].copy_from_slice(to_h256(value).as_bytes());
            }
            0x53 => {
                m.use_gas(G_VERYLOW)?;
                let (offset, value) = (m.pop()?, m.pop()?);
                m.expand(offset, U256::one())?;
                let start = to_usize(offset)?;
                m.memory[start] = to_h256(value)[31];
            }
            // SLOAD SSTORE
            0x54 => {
                m.use_gas(G_SLOAD)?;
                let key = to_h256(m.pop()?);
                let value = state.get_state(contract.address, key)?;
                m.push(U256::from_big_endian(value.as_bytes()))?;
            }
            0x55 => {
                if readonly {
                    return Err(VmError::WriteProtection.into());
                }
                let (key, value) = (to_h256(m.pop()?), to_h256(m.pop()?));
                let current = state.get_state(contract.address, key)?;
                let cost = if current.is_zero() && !value.is_zero() {
                    G_SSTORE_SET
                } else {
                    G_SSTORE_RESET
                };
                m.use_gas(cost)?;
                if !current.is_zero() && value.is_zero() {
                    state.add_refund(R_SSTORE_CLEAR);
                }
                state.set_state(contract.address, key, value)?;
            }
            // JUMP JUMPI PC MSIZE GAS JUMPDEST
            0x56 => {
                m.use_gas(G_MID)?;
                let target = to_usize(m.pop()?).map_err(|_| VmError::InvalidJump)?;
                if !destinations.contains(&target) {
                    return Err(VmError::InvalidJump.into());
                }
                pc = target;
                continue;
            }
            0x57 => {
                m.use_gas(G_HIGH)?;
                let (target, condition) = (m.pop()?, m.pop()?);
                if !condition.is_zero() {
                    let target = to_usize(target).map_err(|_| VmError::InvalidJump)?;
                    if !destinations.contains(&target) {
                        return Err(VmError::InvalidJump.into());
                    }
                    pc = target;
                    continue;
                }
            }
            0x58 => {
                m.use_gas(G_BASE)?;
                m.push(U256::from(pc))?;
            }
            0x59 => {
                m.use_gas(G_BASE)?;
                m.push(U256::from(m.memory.len()))?;
            }
            0x5a => {
                m.use_gas(G_BASE)?;
                m.push(U256::from(m.gas))?;
            }
            0x5b => {
                m.use_gas(G_JUMPDEST)?;
            }
            // PUSH1..PUSH32
            0x60..=0x7f => {
                m.use_gas(G_VERYLOW)?;
                let width = (op - 0x60) as usize + 1;
                let end = (pc + 1 + width).min(code.len());
                let mut word = [0u8; 32];
                let bytes = &code[pc + 1..end];
                word[32 - width..32 - width + bytes.len()].copy_from_slice(bytes);
                m.push(U256::from_big_endian(&word))?;
                pc += width;
            }
            // DUP1..DUP16
            0x80..=0x8f => {
                m.use_gas(G_VERYLOW)?;
                let depth = (op - 0x80) as usize + 1;
                if m.stack.len() < depth {
                    return Err(VmError::StackUnderflow.into());
                }
                let value = m.stack[m.stack.len() - depth];
                m.push(value)?;
            }
            // SWAP1..SWAP16
            0x90..=0x9f => {
                m.use_gas(G_VERYLOW)?;
                let depth = (op - 0x90) as usize + 1;
                if m.stack.len() < depth + 1 {
                    return Err(VmError::StackUnderflow.into());
                }
                let top = m.stack.len() - 1;
                m.stack.swap(top, top - depth);
            }
            // LOG0..LOG4
            0xa0..=0xa4 => {
                if readonly {
                    return Err(VmError::WriteProtection.into());
                }
                let topic_count = (op - 0xa0) as usize;
                let (offset, size) = (m.pop()?, m.pop()?);
                let data_len = if size.is_zero() { 0 } else { to_usize(size)? as u64 };
                m.use_gas(G_LOG + G_LOG_TOPIC * topic_count as u64 + G_LOG_DATA * data_len)?;
                m.expand(offset, size)?;
                let mut topics = Vec::with_capacity(topic_count);
                for _ in 0..topic_count {
                    topics.push(to_h256(m.pop()?));
                }
                let data = m.read_slice(offset, size)?;
                state.add_log(Log::new(contract.address, topics, data));
            }
            // RETURN
            0xf3 => {
                let (offset, size) = (m.pop()?, m.pop()?);
                m.expand(offset, size)?;
                return Ok(m.read_slice(offset, size)?);
            }
            // REVERT
            0xfd => {
                let (offset, size) = (m.pop()?, m.pop()?);
                m.expand(offset, size)?;
                let output = m.read_slice(offset, size)?;
                m.memory = output;
                return Err(VmError::Revert.into());
            }
            0xfe => return Err(VmError::InvalidOpcode(op).into()),
            // SELFDESTRUCT
            0xff => {
                if readonly {
                    return Err(VmError::WriteProtection.into());
                }
                m.use_gas(G_SELFDESTRUCT)?;
                let beneficiary = to_address(m.pop()?);
                let balance = state.get_balance(contract.address)?;
                if !state.is_destructed(contract.address) {
                    state.add_refund(R_SELFDESTRUCT);
                }
                state.add_balance(beneficiary, balance)?;
                state.destruct_account(contract.address)?;
                return Ok(Vec::new());
            }
            other => return Err(VmError::InvalidOpcode(other).into()),
        }
        pc += 1;
    }
    Ok(Vec::new())
}

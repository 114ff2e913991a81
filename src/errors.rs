use std::io;

use ethereum_types::H256;
use thiserror::Error;

/// Transaction-level failures: admission checks and the pre-execution
/// checks of the state-transition engine. Returned to the submitter or
/// used by the builder to skip a transaction; never fatal to the node.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("invalid sender")]
    InvalidSender,
    #[error("nonce too high")]
    NonceTooHigh,
    #[error("nonce too low")]
    NonceTooLow,
    #[error("insufficient funds for gas * price + value")]
    InsufficientFunds,
    #[error("intrinsic gas too low")]
    IntrinsicGas,
    #[error("exceeds block gas limit")]
    GasLimit,
    #[error("negative value")]
    NegativeValue,
    #[error("oversized data")]
    OversizedData,
    #[error("transaction underpriced")]
    Underpriced,
    #[error("insufficient balance to pay for gas")]
    InsufficientBalanceForGas,
    #[error("gas limit reached")]
    GasLimitReached,
    #[error("out of gas")]
    OutOfGas,
}

/// Errors raised inside the contract VM. Apart from
/// [`VmError::InsufficientBalance`], which is promoted to a consensus
/// failure, these only flip the receipt status to revert while the gas
/// charging semantics stay intact.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("execution reverted")]
    Revert,
    #[error("write protection")]
    WriteProtection,
    #[error("max code size exceeded")]
    MaxCodeSizeExceeded,
    #[error("return data out of bounds")]
    ReturnDataOutOfBounds,
    #[error("max call depth exceeded")]
    Depth,
    #[error("insufficient balance for transfer")]
    InsufficientBalance,
    #[error("out of gas")]
    OutOfGas,
    #[error("invalid jump destination")]
    InvalidJump,
    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
}

/// Block-level failures raised by the validator and the chain store. Any
/// of these rejects the offending block and halts insertion of the slice
/// it arrived in; previously inserted blocks stay committed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("block already known")]
    KnownBlock,
    #[error("unknown ancestor")]
    UnknownAncestor,
    #[error("pruned ancestor")]
    PrunedAncestor,
    #[error("block in the future")]
    FutureBlock,
    #[error("invalid block number")]
    InvalidNumber,
    #[error("non-contiguous block import")]
    NonContiguous,
    #[error("invalid gas used (remote: {remote}, local: {local})")]
    GasUsedMismatch { remote: u64, local: u64 },
    #[error("invalid bloom")]
    BloomMismatch,
    #[error("invalid transaction root (remote: {remote:?}, local: {local:?})")]
    TxRootMismatch { remote: H256, local: H256 },
    #[error("invalid receipt root (remote: {remote:?}, local: {local:?})")]
    ReceiptRootMismatch { remote: H256, local: H256 },
    #[error("invalid state root (remote: {remote:?}, local: {local:?})")]
    StateRootMismatch { remote: H256, local: H256 },
    #[error("invalid uncle root (remote: {remote:?}, local: {local:?})")]
    UncleRootMismatch { remote: H256, local: H256 },
    #[error("invalid seal")]
    BadSeal,
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] rlp::DecoderError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cryptography error: {0}")]
    Crypto(String),
    #[error("missing trie node {0:?}")]
    MissingNode(H256),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error("vm error: {0}")]
    Vm(#[from] VmError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error("no proposer scheduled for height {0}")]
    UnknownHeight(u64),
    #[error("request timed out")]
    Timeout,
    #[error("aborted")]
    Aborted,
}

pub type ChainResult<T> = Result<T, ChainError>;

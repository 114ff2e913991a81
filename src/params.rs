//! Protocol constants shared by the execution engine, the builder and the
//! validator. All of these are consensus-critical: changing one forks the
//! chain.

use ethereum_types::H256;

/// Root hash of an empty Merkle-Patricia trie, `keccak256(rlp(""))`.
pub const EMPTY_ROOT_HASH: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
]);

/// Code hash of an account without code, `keccak256([])`.
pub const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
]);

/// `keccak256(rlp([]))`, the uncle hash of a block without uncles.
pub const EMPTY_UNCLE_HASH: H256 = H256([
    0x1d, 0xcc, 0x4d, 0xe8, 0xde, 0xc7, 0x5d, 0x7a, 0xab, 0x85, 0xb5, 0x67, 0xb6, 0xcc, 0xd4,
    0x1a, 0xd3, 0x12, 0x45, 0x1b, 0x94, 0x8a, 0x74, 0x13, 0xf0, 0xa1, 0x42, 0xfd, 0x40, 0xd4,
    0x93, 0x47,
]);

/// Base intrinsic gas of a plain transaction.
pub const TX_GAS: u64 = 21_000;
/// Base intrinsic gas of a contract-creating transaction.
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
/// Intrinsic gas charged per non-zero byte of transaction data.
pub const TX_DATA_NON_ZERO_GAS: u64 = 68;
/// Intrinsic gas charged per zero byte of transaction data.
pub const TX_DATA_ZERO_GAS: u64 = 4;

/// Fixed gas allowance of a block until dynamic gas limits land.
pub const BLOCK_GAS_LIMIT: u64 = 10_000_000;

/// Number of heights covered by one precomputed proposer schedule.
pub const EPOCH_LENGTH: u64 = 100;

/// Maximum byte size of deployed contract code.
pub const MAX_CODE_SIZE: usize = 24_576;
/// Gas charged per byte of deployed contract code.
pub const CREATE_DATA_GAS: u64 = 200;
/// Maximum call/create nesting depth inside the VM.
pub const CALL_CREATE_DEPTH: usize = 1024;
/// Maximum transaction payload accepted by the mempool; DOS protection,
/// not a consensus rule.
pub const MAX_TX_DATA_SIZE: usize = 128 * 1024;

/// Chain identifier mixed into every sign-hash.
pub const DEFAULT_CHAIN_ID: u64 = 88;

#[cfg(test)]
mod tests {
    use super::*;
    use keccak_hash::keccak;

    #[test]
    fn empty_hashes_match_keccak() {
        assert_eq!(keccak(rlp::NULL_RLP), EMPTY_ROOT_HASH);
        assert_eq!(keccak([0u8; 0]), EMPTY_CODE_HASH);
        assert_eq!(keccak(rlp::EMPTY_LIST_RLP), EMPTY_UNCLE_HASH);
    }
}

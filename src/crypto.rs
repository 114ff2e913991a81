use std::fmt;
use std::fs;
use std::path::Path;

use ethereum_types::{H160, H256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use keccak_hash::keccak;
use rand::RngCore;
use rand::rngs::OsRng;
use rlp::RlpStream;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{ChainError, ChainResult, TxError};

pub const SIGNATURE_LENGTH: usize = 65;

/// Recoverable secp256k1 signature, `r ‖ s ‖ v` with `v ∈ {0, 1}`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn from_slice(data: &[u8]) -> ChainResult<Self> {
        if data.len() != SIGNATURE_LENGTH {
            return Err(ChainError::Crypto(format!(
                "invalid signature length {}",
                data.len()
            )));
        }
        let mut out = [0u8; SIGNATURE_LENGTH];
        out.copy_from_slice(data);
        Ok(Signature(out))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature([0u8; SIGNATURE_LENGTH])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(raw).map_err(D::Error::custom)?;
        Signature::from_slice(&bytes).map_err(D::Error::custom)
    }
}

pub fn generate_signing_key() -> SigningKey {
    let mut bytes = [0u8; 32];
    loop {
        OsRng.fill_bytes(&mut bytes);
        if let Ok(key) = SigningKey::from_slice(&bytes) {
            return key;
        }
    }
}

/// Hex-encoded key material stored next to the node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKeypair {
    pub public_key: String,
    pub secret_key: String,
}

pub fn load_or_generate_key(path: &Path) -> ChainResult<SigningKey> {
    if path.exists() {
        load_key(path)
    } else {
        let key = generate_signing_key();
        save_key(path, &key)?;
        Ok(key)
    }
}

pub fn save_key(path: &Path, key: &SigningKey) -> ChainResult<()> {
    let stored = StoredKeypair {
        public_key: hex::encode(key.verifying_key().to_encoded_point(false).as_bytes()),
        secret_key: hex::encode(key.to_bytes()),
    };
    let encoded = toml::to_string_pretty(&stored)
        .map_err(|err| ChainError::Config(format!("failed to encode keypair: {err}")))?;
    fs::create_dir_all(path.parent().unwrap_or_else(|| Path::new(".")))?;
    fs::write(path, encoded)?;
    Ok(())
}

pub fn load_key(path: &Path) -> ChainResult<SigningKey> {
    let raw = fs::read_to_string(path)?;
    let stored: StoredKeypair = toml::from_str(&raw)
        .map_err(|err| ChainError::Config(format!("failed to decode keypair: {err}")))?;
    let secret_bytes = hex::decode(stored.secret_key)
        .map_err(|err| ChainError::Config(format!("invalid secret key encoding: {err}")))?;
    SigningKey::from_slice(&secret_bytes)
        .map_err(|err| ChainError::Config(format!("invalid secret key bytes: {err}")))
}

/// Low 20 bytes of the Keccak-256 of the uncompressed public key.
pub fn address_from_public_key(key: &VerifyingKey) -> H160 {
    let point = key.to_encoded_point(false);
    let digest = keccak(&point.as_bytes()[1..]);
    H160::from_slice(&digest[12..])
}

pub fn address_of(key: &SigningKey) -> H160 {
    address_from_public_key(key.verifying_key())
}

pub fn sign_hash(key: &SigningKey, hash: H256) -> ChainResult<Signature> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash.as_bytes())
        .map_err(|err| ChainError::Crypto(format!("signing failed: {err}")))?;
    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id.to_byte();
    Ok(Signature(out))
}

/// Recovers the signing address from a prehashed message. Malformed
/// signatures surface as [`TxError::InvalidSender`] so callers on the
/// transaction path can report them uniformly.
pub fn recover_address(hash: H256, signature: &Signature) -> ChainResult<H160> {
    let parsed = EcdsaSignature::from_slice(&signature.0[..64])
        .map_err(|_| ChainError::Tx(TxError::InvalidSender))?;
    let recovery_id =
        RecoveryId::from_byte(signature.0[64]).ok_or(ChainError::Tx(TxError::InvalidSender))?;
    let key = VerifyingKey::recover_from_prehash(hash.as_bytes(), &parsed, recovery_id)
        .map_err(|_| ChainError::Tx(TxError::InvalidSender))?;
    Ok(address_from_public_key(&key))
}

/// `keccak256(rlp([sender, nonce]))[12..]`, the address of a contract
/// created by `sender` at `nonce`.
pub fn create_address(sender: H160, nonce: u64) -> H160 {
    let mut stream = RlpStream::new_list(2);
    stream.append(&sender);
    stream.append(&nonce);
    let digest = keccak(stream.out());
    H160::from_slice(&digest[12..])
}

pub fn parse_address(raw: &str) -> ChainResult<H160> {
    let trimmed = raw.trim_start_matches("0x");
    let bytes = hex::decode(trimmed)
        .map_err(|err| ChainError::Config(format!("invalid address encoding: {err}")))?;
    if bytes.len() != 20 {
        return Err(ChainError::Config(format!(
            "invalid address length {}",
            bytes.len()
        )));
    }
    Ok(H160::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic_key() -> SigningKey {
        SigningKey::from_slice(&[7u8; 32]).expect("key")
    }

    #[test]
    fn sign_and_recover_round_trip() {
        let key = deterministic_key();
        let hash = keccak(b"aurum");
        let signature = sign_hash(&key, hash).unwrap();
        let recovered = recover_address(hash, &signature).unwrap();
        assert_eq!(recovered, address_of(&key));
    }

    #[test]
    fn tampered_signature_fails_recovery_or_changes_signer() {
        let key = deterministic_key();
        let hash = keccak(b"aurum");
        let mut signature = sign_hash(&key, hash).unwrap();
        signature.0[10] ^= 0xff;
        match recover_address(hash, &signature) {
            Ok(addr) => assert_ne!(addr, address_of(&key)),
            Err(err) => assert!(matches!(err, ChainError::Tx(TxError::InvalidSender))),
        }
    }

    #[test]
    fn keystore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_key.toml");
        let generated = load_or_generate_key(&path).unwrap();
        let loaded = load_or_generate_key(&path).unwrap();
        assert_eq!(generated.to_bytes(), loaded.to_bytes());
    }

    #[test]
    fn create_address_depends_on_nonce() {
        let sender = H160::repeat_byte(0x11);
        assert_ne!(create_address(sender, 0), create_address(sender, 1));
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ethereum_types::{H160, U256};
use serde::{Deserialize, Serialize};

use crate::crypto::parse_address;
use crate::errors::{ChainError, ChainResult};
use crate::params::DEFAULT_CHAIN_ID;

/// Node configuration, loaded once at startup and passed by reference to
/// every component. Listen and explorer addresses are consumed by the
/// external transport layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub key_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub ws_listen_addr: SocketAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_addr: Option<SocketAddr>,
    #[serde(default)]
    pub explorer_addrs: Vec<SocketAddr>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub block_time_ms: u64,
    pub mempool_limit: usize,
    #[serde(default)]
    pub min_gas_price: u64,
    pub genesis: GenesisConfig,
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

impl NodeConfig {
    pub fn load(path: &Path) -> ChainResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| ChainError::Config(format!("unable to parse config: {err}")))
    }

    pub fn save(&self, path: &Path) -> ChainResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ChainError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> ChainResult<()> {
        fs::create_dir_all(&self.data_dir)?;
        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            key_path: PathBuf::from("./keys/node.toml"),
            listen_addr: "127.0.0.1:9000".parse().expect("valid socket addr"),
            ws_listen_addr: "127.0.0.1:9001".parse().expect("valid socket addr"),
            boot_addr: None,
            explorer_addrs: Vec::new(),
            chain_id: DEFAULT_CHAIN_ID,
            block_time_ms: 1_500,
            mempool_limit: 8_192,
            min_gas_price: 0,
            genesis: GenesisConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenesisConfig {
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
}

impl GenesisConfig {
    /// Authority set keyed by address, ready for the proposer schedule.
    pub fn validator_weights(&self) -> ChainResult<BTreeMap<H160, U256>> {
        let mut weights = BTreeMap::new();
        for validator in &self.validators {
            weights.insert(
                parse_address(&validator.address)?,
                U256::from(validator.weight),
            );
        }
        Ok(weights)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: String,
    /// Decimal string so genesis balances are not capped by TOML integer
    /// range.
    pub balance: String,
}

impl GenesisAccount {
    pub fn address_value(&self) -> ChainResult<H160> {
        parse_address(&self.address)
    }

    pub fn balance_value(&self) -> ChainResult<U256> {
        U256::from_dec_str(&self.balance)
            .map_err(|_| ChainError::Config(format!("invalid genesis balance {}", self.balance)))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub address: String,
    pub weight: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        let mut config = NodeConfig::default();
        config.genesis.accounts.push(GenesisAccount {
            address: format!("{:#x}", H160::repeat_byte(0x11)),
            balance: "100000000000000000000".to_string(),
        });
        config.genesis.validators.push(GenesisValidator {
            address: format!("{:#x}", H160::repeat_byte(0x11)),
            weight: 100,
        });
        config.save(&path).unwrap();
        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.chain_id, config.chain_id);
        assert_eq!(loaded.genesis.accounts.len(), 1);
        assert_eq!(
            loaded.genesis.accounts[0].balance_value().unwrap(),
            U256::from(10u64).pow(U256::from(20u8))
        );
        let weights = loaded.genesis.validator_weights().unwrap();
        assert_eq!(
            weights.get(&H160::repeat_byte(0x11)),
            Some(&U256::from(100u64))
        );
    }

    #[test]
    fn bad_genesis_balance_is_a_config_error() {
        let account = GenesisAccount {
            address: format!("{:#x}", H160::repeat_byte(0x11)),
            balance: "not-a-number".to_string(),
        };
        assert!(account.balance_value().is_err());
    }
}

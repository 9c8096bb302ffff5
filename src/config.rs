// Copyright (c) 2025 Crest Developers

//! Node-local configuration, loaded from a TOML file. Chain-wide constants
//! derive from the selected chain in [`crate::settings`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::KeyPair;
use crate::keyvalue::BloomFilterParams;
use crate::settings::BlockchainSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mining: MiningConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    #[default]
    Testnet,
    Mainnet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_name")]
    pub name: String,
    #[serde(default)]
    pub chain: Chain,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            chain: Chain::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Negative-lookup bloom filter in front of the key-value store.
    #[serde(default = "default_true")]
    pub bloom_enabled: bool,
    #[serde(default = "default_bloom_items")]
    pub bloom_items: usize,
    #[serde(default = "default_bloom_fpr")]
    pub bloom_false_positive_rate: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            bloom_enabled: true,
            bloom_items: default_bloom_items(),
            bloom_false_positive_rate: default_bloom_fpr(),
        }
    }
}

impl StorageConfig {
    pub fn bloom_params(&self) -> Option<BloomFilterParams> {
        self.bloom_enabled.then(|| BloomFilterParams {
            n: self.bloom_items,
            false_positive_rate: self.bloom_false_positive_rate,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Hex-encoded 32-byte signing seeds, one per generating account.
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default = "default_max_txs")]
    pub max_transactions_per_block: usize,
    #[serde(default = "default_utx_capacity")]
    pub utx_capacity: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            seeds: Vec::new(),
            max_transactions_per_block: default_max_txs(),
            utx_capacity: default_utx_capacity(),
        }
    }
}

impl MiningConfig {
    pub fn key_pairs(&self) -> Result<Vec<KeyPair>> {
        self.seeds
            .iter()
            .map(|seed| {
                let bytes = hex::decode(seed).context("mining seed is not valid hex")?;
                let seed: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .ok()
                    .context("mining seed must be 32 bytes")?;
                Ok(KeyPair::from_seed(seed))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Deepest fork the applier will roll back to adopt.
    #[serde(default = "default_max_rollback_depth")]
    pub max_rollback_depth: u64,
    #[serde(default)]
    pub declared_address: Option<String>,
    #[serde(default)]
    pub node_nonce: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_rollback_depth: default_max_rollback_depth(),
            declared_address: None,
            node_nonce: 0,
        }
    }
}

fn default_node_name() -> String {
    "crest-node".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

fn default_bloom_items() -> usize {
    2_000_000
}

fn default_bloom_fpr() -> f64 {
    0.01
}

fn default_max_txs() -> usize {
    100
}

fn default_utx_capacity() -> usize {
    10_000
}

fn default_max_rollback_depth() -> u64 {
    100
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        toml::from_str(&contents).context("failed to parse config")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write config to {}", path.display()))
    }

    pub fn blockchain_settings(&self) -> BlockchainSettings {
        match self.node.chain {
            Chain::Testnet => BlockchainSettings::testnet(),
            Chain::Mainnet => BlockchainSettings::mainnet(),
        }
    }
}

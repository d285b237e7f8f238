//! Configuration management for WeaveChain

use crate::consensus;
use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub protocol: ProtocolParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Byte budget for blocks and transactions. Probed from the filesystem when unset.
    #[serde(default)]
    pub disk_space: Option<u64>,
    /// Maintain the SQLite block/transaction index.
    #[serde(default = "default_enabled")]
    pub index: bool,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            disk_space: None,
            index: default_enabled(),
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_max_miners")]
    pub max_miners: usize,
    #[serde(default = "default_refresh_interval")]
    pub timestamp_refresh_interval_secs: u64,
    /// Hex-encoded reward address; blocks are mined unclaimed when absent.
    #[serde(default)]
    pub reward_address: Option<String>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            max_miners: default_max_miners(),
            timestamp_refresh_interval_secs: default_refresh_interval(),
            reward_address: None,
        }
    }
}

/// Consensus parameters. Every node on a network must agree on these.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolParams {
    #[serde(default = "default_fork_height")]
    pub fork_height: u64,
    #[serde(default = "default_tx_data_size_limit")]
    pub tx_data_size_limit: usize,
    #[serde(default = "default_block_tx_count_limit")]
    pub block_tx_count_limit: usize,
    #[serde(default = "default_block_tx_data_size_limit")]
    pub block_tx_data_size_limit: usize,
    #[serde(default = "default_mempool_data_size_limit")]
    pub mempool_data_size_limit: usize,
    #[serde(default = "default_max_tx_anchor_depth")]
    pub max_tx_anchor_depth: usize,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            fork_height: default_fork_height(),
            tx_data_size_limit: default_tx_data_size_limit(),
            block_tx_count_limit: default_block_tx_count_limit(),
            block_tx_data_size_limit: default_block_tx_data_size_limit(),
            mempool_data_size_limit: default_mempool_data_size_limit(),
            max_tx_anchor_depth: default_max_tx_anchor_depth(),
        }
    }
}

impl ProtocolParams {
    pub fn is_post_fork(&self, height: u64) -> bool {
        height >= self.fork_height
    }
}

/// Load configuration from `path`, falling back to defaults when the file is absent.
pub fn load_config(path: &Path) -> Result<Config, ChainError> {
    let config: Config = match fs::read_to_string(path) {
        Ok(config_str) if !config_str.trim().is_empty() => toml::from_str(&config_str)?,
        Ok(_) => Config::default(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(e.into()),
    };

    // Validate critical values
    if config.storage.data_dir.as_os_str().is_empty() {
        return Err(ChainError::ConfigError(
            "storage.data_dir must be set".to_string(),
        ));
    }
    if config.miner.max_miners == 0 {
        return Err(ChainError::ConfigError(
            "miner.max_miners must be at least 1".to_string(),
        ));
    }
    if config.miner.timestamp_refresh_interval_secs == 0 {
        return Err(ChainError::ConfigError(
            "miner.timestamp_refresh_interval_secs must be at least 1".to_string(),
        ));
    }
    if config.protocol.block_tx_data_size_limit < config.protocol.tx_data_size_limit {
        return Err(ChainError::ConfigError(
            "protocol.block_tx_data_size_limit must not be below tx_data_size_limit".to_string(),
        ));
    }

    Ok(config)
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_enabled() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_max_miners() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_fork_height() -> u64 {
    consensus::FORK_HEIGHT
}

fn default_tx_data_size_limit() -> usize {
    consensus::TX_DATA_SIZE_LIMIT
}

fn default_block_tx_count_limit() -> usize {
    consensus::BLOCK_TX_COUNT_LIMIT
}

fn default_block_tx_data_size_limit() -> usize {
    consensus::BLOCK_TX_DATA_SIZE_LIMIT
}

fn default_mempool_data_size_limit() -> usize {
    consensus::MEMPOOL_DATA_SIZE_LIMIT
}

fn default_max_tx_anchor_depth() -> usize {
    consensus::MAX_TX_ANCHOR_DEPTH
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/weave.toml")).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert!(config.miner.max_miners >= 1);
        assert_eq!(config.protocol.fork_height, consensus::FORK_HEIGHT);
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("weave.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[miner]\nmax_miners = 3\n\n[protocol]\nfork_height = 7\n\n[storage]\ndisk_space = 1024"
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.miner.max_miners, 3);
        assert_eq!(config.miner.timestamp_refresh_interval_secs, 10);
        assert_eq!(config.protocol.fork_height, 7);
        assert!(config.protocol.is_post_fork(7));
        assert!(!config.protocol.is_post_fork(6));
        assert_eq!(config.storage.disk_space, Some(1024));
    }

    #[test]
    fn test_zero_miners_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("weave.toml");
        fs::write(&path, "[miner]\nmax_miners = 0\n").unwrap();
        assert!(matches!(load_config(&path), Err(ChainError::ConfigError(_))));
    }

    #[test]
    fn test_zero_refresh_interval_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("weave.toml");
        fs::write(&path, "[miner]\ntimestamp_refresh_interval_secs = 0\n").unwrap();
        match load_config(&path) {
            Err(ChainError::ConfigError(msg)) => {
                assert!(msg.contains("timestamp_refresh_interval_secs"))
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}

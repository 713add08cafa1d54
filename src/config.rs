//! Node configuration
//!
//! Operational settings loaded from a TOML file. Consensus parameters are
//! not configurable; only the network is selected here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::checkpoint::CheckpointMode;
use crate::consensus::Network;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub network: Network,
    pub checkpoint_mode: CheckpointMode,
    /// Hex secret of the checkpoint master key; only the master node sets it
    pub checkpoint_key: Option<String>,
    pub data_dir: PathBuf,
    pub rpc_port: u16,
    /// `tracing` filter directive, overridden by `RUST_LOG`
    pub log_filter: String,
    /// Seconds between pending-checkpoint retries
    pub sync_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            checkpoint_mode: CheckpointMode::Strict,
            checkpoint_key: None,
            data_dir: PathBuf::from("./data"),
            rpc_port: 8332,
            log_filter: "info".to_string(),
            sync_interval_secs: 30,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_port == 0 {
            return Err(ConfigError::Validation("rpc_port must be non-zero".to_string()));
        }
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sync_interval_secs must be at least 1".to_string(),
            ));
        }
        if let Some(key) = &self.checkpoint_key {
            let well_formed = key.len() == 64 && key.chars().all(|c| c.is_ascii_hexdigit());
            if !well_formed {
                return Err(ConfigError::Validation(
                    "checkpoint_key must be 64 hex digits".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Location of the checkpoint database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(self.network.to_string()).join("checkpoints")
    }
}

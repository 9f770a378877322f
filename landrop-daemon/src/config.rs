//! Daemon configuration
//!
//! Loaded from `<config_dir>/landrop/daemon.toml`; a default file is
//! written on first run. Every field has a default so a partial file
//! is valid.

use anyhow::{Context, Result};
use landrop_protocol::{DEFAULT_TRANSFER_PORT, DEFAULT_WORKER_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP transfer port, shared by all devices
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,

    /// Maximum number of concurrent receptions
    #[serde(default = "default_worker_capacity")]
    pub worker_capacity: usize,
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Directory where received files are written
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_transfer_port() -> u16 {
    DEFAULT_TRANSFER_PORT
}

fn default_worker_capacity() -> usize {
    DEFAULT_WORKER_CAPACITY
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("LANdrop")
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transfer_port: default_transfer_port(),
            worker_capacity: default_worker_capacity(),
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

impl Config {
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("landrop")
            .join("daemon.toml")
    }

    /// Load configuration, creating a default file on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, contents).context("Failed to write config file")?;
        Ok(())
    }
}

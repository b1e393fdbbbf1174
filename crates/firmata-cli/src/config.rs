//! Configuration file.
//!
//! ```yaml
//! port: /dev/ttyACM0
//! baud: 57600
//! board:
//!   boot_delay_ms: 2000
//!   max_retries: 10
//! ```
//!
//! Every key is optional. Command-line flags take precedence.

use std::path::{Path, PathBuf};

use firmata_board::BoardConfig;
use firmata_protocol::DEFAULT_BAUD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Contents of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Serial device path.
    pub port: Option<String>,
    /// Serial baud rate.
    pub baud: u32,
    /// Session timing.
    pub board: BoardConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        CliConfig {
            port: None,
            baud: DEFAULT_BAUD,
            board: BoardConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

//! Configuration loading for sync-client.
//!
//! Configuration is loaded from a TOML file; every key is optional.
//!
//! ```toml
//! transaction_feed = true
//! max_buffered_events = 1024
//! prune_on_partial_stop = true
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use objsync_core::SyncOptions;

/// Data synchronization configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataSyncConfig {
    /// Subscribe to transaction feeds and apply transactions atomically
    /// (default: true).
    #[serde(default = "default_transaction_feed")]
    pub transaction_feed: bool,
    /// Events held for open transactions before overflowing (default: 1024).
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,
    /// Drop cached data of locations removed by a partial stop
    /// (default: true).
    #[serde(default = "default_prune_on_partial_stop")]
    pub prune_on_partial_stop: bool,
}

// Default value functions
fn default_transaction_feed() -> bool {
    true
}

fn default_max_buffered_events() -> usize {
    1024
}

fn default_prune_on_partial_stop() -> bool {
    true
}

impl Default for DataSyncConfig {
    fn default() -> Self {
        Self {
            transaction_feed: default_transaction_feed(),
            max_buffered_events: default_max_buffered_events(),
            prune_on_partial_stop: default_prune_on_partial_stop(),
        }
    }
}

impl DataSyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })
    }

    /// Options for the synchronization state.
    pub fn to_options(&self) -> SyncOptions {
        SyncOptions {
            transaction_feed: self.transaction_feed,
            max_buffered_events: self.max_buffered_events,
            prune_on_partial_stop: self.prune_on_partial_stop,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

//! Chain layer settings and their TOML loader.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tunables of the coordinators, the forwarder and the resume scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Forwarder retries on a remote leader change.
    pub retry_limit: u32,
    /// Per-attempt remote timeout in milliseconds; an elapsed attempt is an RPC failure.
    pub rpc_timeout_ms: u64,
    /// Sleep between leader-changed retries in milliseconds.
    pub leader_retry_backoff_ms: u64,
    /// Period of the background resume scanner in milliseconds.
    pub scan_interval_ms: u64,
    /// Maximum staged entries resumed per partition and phase in one pass.
    pub scan_batch_limit: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            retry_limit: 10,
            rpc_timeout_ms: 3000,
            leader_retry_backoff_ms: 0,
            scan_interval_ms: 1000,
            scan_batch_limit: 1024,
        }
    }
}

impl ChainConfig {
    /// Sets the leader-changed retry budget.
    pub fn with_retry_limit(mut self, retries: u32) -> Self {
        self.retry_limit = retries;
        self
    }

    /// Sets the per-attempt remote timeout.
    pub fn with_rpc_timeout_ms(mut self, ms: u64) -> Self {
        self.rpc_timeout_ms = ms;
        self
    }

    /// Sets the sleep between leader-changed retries.
    pub fn with_leader_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.leader_retry_backoff_ms = ms;
        self
    }

    /// Sets the scanner period.
    pub fn with_scan_interval_ms(mut self, ms: u64) -> Self {
        self.scan_interval_ms = ms;
        self
    }

    /// Sets the per-pass scan bound.
    pub fn with_scan_batch_limit(mut self, limit: usize) -> Self {
        self.scan_batch_limit = limit;
        self
    }

    /// Remote timeout as a [`Duration`].
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Leader retry backoff as a [`Duration`].
    pub fn leader_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.leader_retry_backoff_ms)
    }

    /// Scanner period as a [`Duration`].
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Reads and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `explicit`, else the default path if that file exists, else defaults.
    pub fn load_or_default(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(&path),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Rejects settings that would stall the protocol.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "rpc_timeout_ms",
                reason: "must be greater than zero",
            });
        }
        if self.scan_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "scan_interval_ms",
                reason: "must be greater than zero",
            });
        }
        if self.scan_batch_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "scan_batch_limit",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

/// Failures loading a [`ChainConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read chain config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse chain config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid chain config: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// `<config dir>/sombra/chain.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("sombra").join("chain.toml"))
}

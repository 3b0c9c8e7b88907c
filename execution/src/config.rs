use crate::defaults;
use keel_types::{block::MAX_BLOCK_TRANSACTIONS, Identity, MAX_IDENTITY_LEN};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::Level;

/// Configuration for the [crate::Stf].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Identity used for consensus messages, block hooks and queries (hex).
    #[serde(default = "default_runtime_identity")]
    pub runtime_identity: Identity,
    #[serde(default = "default_max_block_transactions")]
    pub max_block_transactions: usize,
    #[serde(default = "default_query_gas_limit")]
    pub query_gas_limit: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config")]
    Parse(#[from] serde_yaml::Error),
    #[error("runtime_identity must be 1..={max} bytes (got {len})")]
    InvalidIdentity { len: usize, max: usize },
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be <= {max} (got {value})")]
    TooLarge {
        field: &'static str,
        value: u64,
        max: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub runtime_identity: Identity,
    pub max_block_transactions: usize,
    pub query_gas_limit: u64,
    pub log_level: Level,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_identity: default_runtime_identity(),
            max_block_transactions: default_max_block_transactions(),
            query_gas_limit: default_query_gas_limit(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let len = self.runtime_identity.as_bytes().len();
        if len == 0 || len > MAX_IDENTITY_LEN {
            return Err(ConfigError::InvalidIdentity {
                len,
                max: MAX_IDENTITY_LEN,
            });
        }
        ensure_nonzero("max_block_transactions", self.max_block_transactions as u64)?;
        if self.max_block_transactions > MAX_BLOCK_TRANSACTIONS {
            return Err(ConfigError::TooLarge {
                field: "max_block_transactions",
                value: self.max_block_transactions as u64,
                max: MAX_BLOCK_TRANSACTIONS as u64,
            });
        }
        ensure_nonzero("query_gas_limit", self.query_gas_limit)?;
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            runtime_identity: self.runtime_identity,
            max_block_transactions: self.max_block_transactions,
            query_gas_limit: self.query_gas_limit,
            log_level,
            log_json: self.log_json,
        })
    }
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

fn default_runtime_identity() -> Identity {
    Identity::new(defaults::DEFAULT_RUNTIME_IDENTITY)
}

fn default_max_block_transactions() -> usize {
    defaults::DEFAULT_MAX_BLOCK_TRANSACTIONS
}

fn default_query_gas_limit() -> u64 {
    defaults::DEFAULT_QUERY_GAS_LIMIT
}

fn default_log_level() -> String {
    defaults::DEFAULT_LOG_LEVEL.to_string()
}

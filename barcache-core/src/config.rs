//! Serializable sync configuration.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! cache_dir = "TICKERS"
//! default_start = "2010-01-01"
//!
//! [fetcher]
//! base_url = "https://query2.finance.yahoo.com/v8/finance/chart/"
//! timeout_secs = 30
//! max_retries = 3
//! base_delay_ms = 500
//!
//! [circuit_breaker]
//! cooldown_secs = 1800
//! failure_threshold = 3
//! ```

use crate::data::CircuitBreaker;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Root of the on-disk cache.
    pub cache_dir: PathBuf,

    /// Start date used when a symbol has no cached bars yet.
    pub default_start: NaiveDate,

    pub fetcher: FetcherConfig,

    pub circuit_breaker: BreakerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("TICKERS"),
            default_start: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
            fetcher: FetcherConfig::default(),
            circuit_breaker: BreakerConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }
}

/// HTTP fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetcherConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// First retry delay; doubles on each further attempt.
    pub base_delay_ms: u64,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query2.finance.yahoo.com/v8/finance/chart/".into(),
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    pub cooldown_secs: u64,
    pub failure_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 30 * 60,
            failure_threshold: 3,
        }
    }
}

impl BreakerConfig {
    pub fn build(&self) -> CircuitBreaker {
        CircuitBreaker::new(Duration::from_secs(self.cooldown_secs), self.failure_threshold)
    }
}

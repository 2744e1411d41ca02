//! Configuration for distcoord components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Local worker pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Session settings
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            pool: PoolConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Local worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of in-process workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Transport rank of each worker, in worker-id order.
    /// Identity assignment when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_ranks: Option<Vec<usize>>,

    /// Request queue depth per worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_workers() -> usize {
    4
}
fn default_channel_capacity() -> usize {
    64
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            transport_ranks: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("pool needs at least one worker".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig("channel_capacity must be positive".into()));
        }
        if let Some(ranks) = &self.transport_ranks {
            if ranks.len() != self.workers {
                return Err(Error::InvalidConfig(format!(
                    "{} transport ranks given for {} workers",
                    ranks.len(),
                    self.workers
                )));
            }
        }
        Ok(())
    }
}

/// Session configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Worker subset; the whole pool when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<u32>>,

    /// Escalate leftover keys at teardown to a fatal fault
    #[serde(default)]
    pub strict_cleanup: bool,
}

impl Config {
    /// Load configuration from an optional TOML file, then `DISTCOORD_*`
    /// environment variables (e.g. `DISTCOORD_POOL__WORKERS=8`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("DISTCOORD")
                .prefix_separator("_")
                .separator("__"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.pool.validate()?;
        Ok(config)
    }
}

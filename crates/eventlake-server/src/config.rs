//! Node configuration.
//!
//! Loaded once at startup from the TOML file named by the
//! `TALARIA_CONF` environment variable. Anything wrong here is fatal:
//! the process exits non-zero before touching the store or the queue.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, ServerError};

/// Environment variable naming the configuration file path.
pub const CONFIG_ENV: &str = "TALARIA_CONF";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Query server listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory owned by the embedded KV store.
    pub data_dir: String,
    /// Region for the queue and object storage.
    pub aws_region: String,
    /// Environment tag attached to metrics.
    #[serde(default = "default_env")]
    pub env: String,
    pub sqs: SqsConfig,
    pub storage: StorageConfig,
    pub presto: PrestoConfig,
    #[serde(default)]
    pub route: Option<RouteConfig>,
    #[serde(default)]
    pub statsd: Option<StatsdConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqsConfig {
    /// Notification queue URL.
    pub endpoint: String,
    /// Long-poll wait in seconds.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,
    /// Redelivery deadline in seconds.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Partition column of incoming files.
    pub key_column: String,
    /// Event-time column of incoming files.
    pub time_column: String,
    /// Block retention in seconds.
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrestoConfig {
    /// Logical event-log table name.
    pub table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Domain whose A records mirror the live member set.
    pub domain: String,
    /// Provider zone handle (the zone-file provider reads it as a
    /// path).
    pub zone_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsdConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Load from the path named by [`CONFIG_ENV`].
    pub fn load() -> Result<Config> {
        let path = std::env::var(CONFIG_ENV).map_err(|_| {
            ServerError::ConfigInvalid(format!("{CONFIG_ENV} environment variable not set"))
        })?;
        Self::load_path(&path)
    }

    pub fn load_path(path: &str) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::ConfigInvalid(format!("cannot read {path}: {e}")))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| ServerError::ConfigInvalid(format!("cannot parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.data_dir.is_empty() {
            return Err(ServerError::ConfigInvalid("data_dir is empty".into()));
        }
        if self.storage.key_column.is_empty() || self.storage.time_column.is_empty() {
            return Err(ServerError::ConfigInvalid(
                "storage.key_column and storage.time_column are required".into(),
            ));
        }
        if self.storage.ttl_seconds == 0 {
            return Err(ServerError::ConfigInvalid(
                "storage.ttl_seconds must be positive".into(),
            ));
        }
        if self.presto.table.is_empty() {
            return Err(ServerError::ConfigInvalid("presto.table is empty".into()));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.storage.ttl_seconds)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.sqs.wait_timeout)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.sqs.visibility_timeout)
    }
}

fn default_port() -> u16 {
    8042
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_wait_timeout() -> u64 {
    20
}

fn default_visibility_timeout() -> u64 {
    30
}

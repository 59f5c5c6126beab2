//! Engine configuration.
//!
//! Loaded in layers, later layers overriding earlier ones:
//! 1. Defaults in code
//! 2. Optional config file (`STOCKLEDGER_CONFIG`, default `config/stockledger`, any format the
//!    `config` crate recognizes by extension)
//! 3. Environment variables prefixed `STOCKLEDGER__`, nested keys separated by `__`
//!    (e.g. `STOCKLEDGER__RETRY__MAX_ATTEMPTS=3`)

use std::path::PathBuf;
use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

use crate::retry::{BackoffStrategy, RetryPolicy};

pub const CONFIG_PATH_VAR: &str = "STOCKLEDGER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/stockledger";
const ENV_PREFIX: &str = "STOCKLEDGER";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EngineConfig {
    /// Bounded wait for per-SKU locks before a movement fails with `Busy`.
    pub lock_timeout_ms: u64,

    /// Batches expiring within this many days raise `expiring` alerts.
    pub expiry_horizon_days: i64,

    /// VAT rate in basis points (1000 = 10%).
    pub vat_rate_bps: u32,

    /// Backoff for callers retrying `Busy` (order fulfillment).
    pub retry: RetryConfig,

    /// JSON snapshot restored at start and written at shutdown.
    /// Ignored when `database_url` is set.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// PostgreSQL connection string. When set, the ledger tables live in
    /// Postgres instead of memory.
    #[serde(default)]
    pub database_url: Option<String>,

    pub database_max_connections: u32,

    pub server: ServerConfig,

    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `exponential`, `linear` or `fixed`.
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `json` or `pretty`.
    pub format: String,
    /// Used when `RUST_LOG` is unset.
    pub filter: String,
}

impl EngineConfig {
    /// Load from the file named by `STOCKLEDGER_CONFIG` (if any) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(&path)
    }

    /// Load with an explicit config file path (the file is optional).
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        defaults()?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            strategy: self.retry.strategy,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            expiry_horizon_days: 30,
            vat_rate_bps: 1_000,
            retry: RetryConfig {
                max_attempts: 5,
                base_delay_ms: 20,
                max_delay_ms: 1_000,
                strategy: BackoffStrategy::Exponential,
            },
            snapshot_path: None,
            database_url: None,
            database_max_connections: 10,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            log: LogConfig {
                format: "json".to_string(),
                filter: "info".to_string(),
            },
        }
    }
}

fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    let d = EngineConfig::default();
    config::Config::builder()
        .set_default("lock_timeout_ms", d.lock_timeout_ms)?
        .set_default("expiry_horizon_days", d.expiry_horizon_days)?
        .set_default("vat_rate_bps", i64::from(d.vat_rate_bps))?
        .set_default("retry.max_attempts", i64::from(d.retry.max_attempts))?
        .set_default("retry.base_delay_ms", d.retry.base_delay_ms)?
        .set_default("retry.max_delay_ms", d.retry.max_delay_ms)?
        .set_default("retry.strategy", "exponential")?
        .set_default("database_max_connections", i64::from(d.database_max_connections))?
        .set_default("server.host", d.server.host)?
        .set_default("server.port", i64::from(d.server.port))?
        .set_default("log.format", d.log.format)?
        .set_default("log.filter", d.log.filter)
}

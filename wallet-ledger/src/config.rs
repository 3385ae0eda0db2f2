//! Configuration for the wallet ledger
//!
//! Layered: built-in defaults, then an optional config file
//! (`CONFIG_FILE` or `config/{ENVIRONMENT}`), then `WALLET__*`
//! environment variables, then the conventional `DATABASE_URL` /
//! `REDIS_URL` overrides.

use crate::{Result, WalletError};
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Wallet ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Postgres ledger store
    pub database: DatabaseConfig,

    /// Redis connection shared by the cache and the lock manager
    pub redis: RedisConfig,

    /// Balance cache settings
    pub cache: CacheConfig,

    /// Reconciliation lock settings
    pub lock: LockConfig,

    /// Reconciler scheduling settings
    pub reconciler: ReconcilerConfig,

    /// Mutation path settings
    pub mutation: MutationConfig,

    /// Logging settings
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            cache: CacheConfig::default(),
            lock: LockConfig::default(),
            reconciler: ReconcilerConfig::default(),
            mutation: MutationConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Postgres configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,

    /// Pool size
    pub max_connections: u32,

    /// Pool acquire timeout (seconds)
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/wallet".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Balance cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live of a published balance (seconds)
    pub balance_ttl_secs: u64,

    /// Key prefix, followed by the wallet ID
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            balance_ttl_secs: 15,
            key_prefix: "wallet_balance".to_string(),
        }
    }
}

impl CacheConfig {
    /// TTL as a duration
    pub fn balance_ttl(&self) -> Duration {
        Duration::from_secs(self.balance_ttl_secs)
    }
}

/// Which lock implementation to run with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Redis `SET NX PX`, for multi-instance deployments
    Redis,
    /// In-process table, for single-instance deployments
    Local,
}

/// Reconciliation lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock expiry (seconds); must exceed the worst-case reconcile duration
    pub ttl_secs: u64,

    /// Key prefix, followed by the wallet ID
    pub key_prefix: String,

    /// Backend
    pub backend: LockBackend,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 15,
            key_prefix: "lock:wallet".to_string(),
            backend: LockBackend::Redis,
        }
    }
}

impl LockConfig {
    /// TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Lower bound of the pre-run jitter (milliseconds)
    pub jitter_min_ms: u64,

    /// Upper bound of the pre-run jitter (milliseconds, inclusive)
    pub jitter_max_ms: u64,

    /// Bounded scheduler queue capacity
    pub queue_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            jitter_min_ms: 0,
            jitter_max_ms: 4_000,
            queue_capacity: 1_024,
        }
    }
}

/// Mutation path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    /// Re-check funds against the ledger inside the atomic append
    pub serialize_withdrawals: bool,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            serialize_withdrawals: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load from defaults, optional file and environment
    pub fn from_env() -> Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let defaults = Config::default();

        let mut builder = config::Config::builder()
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections)?
            .set_default(
                "database.acquire_timeout_secs",
                defaults.database.acquire_timeout_secs,
            )?
            .set_default("redis.url", defaults.redis.url)?
            .set_default("cache.balance_ttl_secs", defaults.cache.balance_ttl_secs)?
            .set_default("cache.key_prefix", defaults.cache.key_prefix)?
            .set_default("lock.ttl_secs", defaults.lock.ttl_secs)?
            .set_default("lock.key_prefix", defaults.lock.key_prefix)?
            .set_default("lock.backend", "redis")?
            .set_default("reconciler.jitter_min_ms", defaults.reconciler.jitter_min_ms)?
            .set_default("reconciler.jitter_max_ms", defaults.reconciler.jitter_max_ms)?
            .set_default(
                "reconciler.queue_capacity",
                defaults.reconciler.queue_capacity as u64,
            )?
            .set_default(
                "mutation.serialize_withdrawals",
                defaults.mutation.serialize_withdrawals,
            )?
            .set_default("log.level", defaults.log.level)?
            .set_default("log.format", "pretty")?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        builder = builder.add_source(Environment::with_prefix("WALLET").separator("__"));

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(redis_url) = env::var("REDIS_URL") {
            builder = builder.set_override("redis.url", redis_url)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(WalletError::Config("Database URL is required".to_string()));
        }

        if self.lock.backend == LockBackend::Redis && self.redis.url.is_empty() {
            return Err(WalletError::Config("Redis URL is required".to_string()));
        }

        if self.reconciler.jitter_min_ms > self.reconciler.jitter_max_ms {
            return Err(WalletError::Config(format!(
                "jitter_min_ms ({}) exceeds jitter_max_ms ({})",
                self.reconciler.jitter_min_ms, self.reconciler.jitter_max_ms
            )));
        }

        if self.lock.ttl_secs == 0 {
            return Err(WalletError::Config("Lock TTL must be positive".to_string()));
        }

        // A fresh run must be able to land before the previous entry expires.
        if self.cache.balance_ttl_secs * 1_000 <= self.reconciler.jitter_max_ms {
            return Err(WalletError::Config(format!(
                "cache TTL ({}s) must exceed the maximum jitter ({}ms)",
                self.cache.balance_ttl_secs, self.reconciler.jitter_max_ms
            )));
        }

        if self.reconciler.queue_capacity == 0 {
            return Err(WalletError::Config(
                "Reconciler queue capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.balance_ttl_secs, 15);
        assert_eq!(config.lock.ttl_secs, 15);
        assert_eq!(config.lock.backend, LockBackend::Redis);
        assert!(config.mutation.serialize_withdrawals);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_jitter() {
        let mut config = Config::default();
        config.reconciler.jitter_min_ms = 500;
        config.reconciler.jitter_max_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ttl_below_jitter() {
        let mut config = Config::default();
        config.cache.balance_ttl_secs = 2;
        config.reconciler.jitter_max_ms = 4_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_lock_ttl() {
        let mut config = Config::default();
        config.lock.ttl_secs = 0;
        assert!(config.validate().is_err());
    }
}

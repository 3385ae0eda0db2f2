//! Balance cache: read-through, write-through best-effort
//!
//! Never authoritative. A miss, an expired entry, an undecodable entry or
//! a backend error all mean "go to the ledger store snapshot".

use crate::metrics;
use crate::types::WalletId;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Cached balance entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedBalance {
    pub wallet_id: WalletId,
    pub balance: i64,
    pub refreshed_at: DateTime<Utc>,
}

#[async_trait]
pub trait BalanceCache: Send + Sync {
    /// Fresh entry, or `None` on miss/expiry
    async fn get(&self, wallet_id: &WalletId) -> Result<Option<CachedBalance>>;

    /// Publish a balance with a fresh TTL
    async fn set(&self, wallet_id: &WalletId, balance: i64, ttl: Duration) -> Result<()>;

    /// Drop the entry
    async fn delete(&self, wallet_id: &WalletId) -> Result<()>;
}

/// Snapshot of cache counters
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64) * 100.0
        }
    }
}

#[derive(Default, Debug)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl CacheCounters {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
    }

    fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

/// Redis-backed balance cache
#[derive(Clone)]
pub struct RedisBalanceCache {
    redis: ConnectionManager,
    key_prefix: String,
    counters: std::sync::Arc<CacheCounters>,
}

impl RedisBalanceCache {
    pub fn new(redis: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
            counters: Default::default(),
        }
    }

    fn key(&self, wallet_id: &WalletId) -> String {
        format!("{}:{}", self.key_prefix, wallet_id)
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.counters.snapshot()
    }
}

#[async_trait]
impl BalanceCache for RedisBalanceCache {
    async fn get(&self, wallet_id: &WalletId) -> Result<Option<CachedBalance>> {
        let key = self.key(wallet_id);

        let cached = match self.redis.clone().get::<_, Option<String>>(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                self.counters.record_miss();
                return Err(e.into());
            }
        };

        match cached {
            Some(json) => match serde_json::from_str(&json) {
                Ok(entry) => {
                    self.counters.record_hit();
                    Ok(Some(entry))
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cached balance");
                    self.counters.record_miss();
                    Ok(None)
                }
            },
            None => {
                self.counters.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, wallet_id: &WalletId, balance: i64, ttl: Duration) -> Result<()> {
        let entry = CachedBalance {
            wallet_id: wallet_id.clone(),
            balance,
            refreshed_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry)?;
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let _: () = redis::cmd("SET")
            .arg(self.key(wallet_id))
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut self.redis.clone())
            .await?;
        self.counters.record_set();
        Ok(())
    }

    async fn delete(&self, wallet_id: &WalletId) -> Result<()> {
        let _: () = self.redis.clone().del(self.key(wallet_id)).await?;
        self.counters.record_delete();
        Ok(())
    }
}

/// In-process balance cache with per-entry expiry
#[derive(Default)]
pub struct InMemoryBalanceCache {
    entries: DashMap<WalletId, (CachedBalance, Instant)>,
    counters: CacheCounters,
}

impl InMemoryBalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.counters.snapshot()
    }
}

#[async_trait]
impl BalanceCache for InMemoryBalanceCache {
    async fn get(&self, wallet_id: &WalletId) -> Result<Option<CachedBalance>> {
        let now = Instant::now();
        let fresh = self
            .entries
            .get(wallet_id)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone());

        match fresh {
            Some(entry) => {
                self.counters.record_hit();
                Ok(Some(entry))
            }
            None => {
                self.entries.remove_if(wallet_id, |_, entry| entry.1 <= now);
                self.counters.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, wallet_id: &WalletId, balance: i64, ttl: Duration) -> Result<()> {
        let entry = CachedBalance {
            wallet_id: wallet_id.clone(),
            balance,
            refreshed_at: Utc::now(),
        };
        self.entries
            .insert(wallet_id.clone(), (entry, Instant::now() + ttl));
        self.counters.record_set();
        Ok(())
    }

    async fn delete(&self, wallet_id: &WalletId) -> Result<()> {
        self.entries.remove(wallet_id);
        self.counters.record_delete();
        Ok(())
    }
}

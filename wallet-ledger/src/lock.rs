//! Per-wallet mutual exclusion for reconciliation
//!
//! `try_acquire` has set-if-absent semantics with an expiry. There is no
//! queueing: `Ok(None)` means somebody else holds the key right now, which
//! is an expected outcome rather than an error.
//!
//! Every lease carries a random token. Release only removes the key while
//! it still holds that token, so a holder whose lease already expired
//! cannot release the lock of whoever acquired it next.

use crate::metrics;
use crate::{Result, WalletError};
use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Compare-and-delete: only the token owner may release
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A held lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub token: String,
}

impl LockLease {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            token: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Set-if-absent with expiry. `Some` when the lock was taken.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>>;

    /// Release a lease; a no-op if it already expired or was taken over
    async fn release(&self, lease: LockLease) -> Result<()>;
}

/// Result of [`run_exclusive`]
#[derive(Debug)]
pub enum Exclusive<T> {
    /// The lock was held for the whole body
    Ran(T),
    /// Someone else holds the lock
    Contended,
}

/// Run `body` while holding `key`, releasing the lease afterwards no
/// matter how the body ends (including a panic, which is resumed after
/// the release).
pub async fn run_exclusive<L, F, T>(
    lock: &L,
    key: &str,
    ttl: Duration,
    body: F,
) -> Result<Exclusive<T>>
where
    L: LockManager + ?Sized,
    F: Future<Output = T>,
{
    let lease = match lock.try_acquire(key, ttl).await? {
        Some(lease) => lease,
        None => {
            metrics::LOCK_CONTENDED.inc();
            return Ok(Exclusive::Contended);
        }
    };

    let outcome = AssertUnwindSafe(body).catch_unwind().await;

    if let Err(e) = lock.release(lease).await {
        warn!(key = %key, error = %e, "Failed to release lock; it will expire on its own");
    }

    match outcome {
        Ok(value) => Ok(Exclusive::Ran(value)),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Redis `SET key token NX PX ttl` lock
#[derive(Clone)]
pub struct RedisLockManager {
    redis: ConnectionManager,
    release_script: Script,
}

impl RedisLockManager {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let lease = LockLease::new(key);
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let reply: Option<String> = redis::cmd("SET")
            .arg(&lease.key)
            .arg(&lease.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut self.redis.clone())
            .await
            .map_err(|e| WalletError::Lock(e.to_string()))?;

        Ok(reply.map(|_| lease))
    }

    async fn release(&self, lease: LockLease) -> Result<()> {
        let removed: i64 = self
            .release_script
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut self.redis.clone())
            .await
            .map_err(|e| WalletError::Lock(e.to_string()))?;

        if removed == 0 {
            debug!(key = %lease.key, "Lock expired or was taken over before release");
        }
        Ok(())
    }
}

/// In-process lock table for single-instance deployments
#[derive(Default)]
pub struct LocalLockManager {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held by an unexpired lease
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .get(key)
            .map(|(_, expires_at)| *expires_at > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockManager for LocalLockManager {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let now = Instant::now();
        let mut held = self.held.lock();

        if let Some((_, expires_at)) = held.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let lease = LockLease::new(key);
        held.insert(key.to_string(), (lease.token.clone(), now + ttl));
        Ok(Some(lease))
    }

    async fn release(&self, lease: LockLease) -> Result<()> {
        let mut held = self.held.lock();
        let owned = matches!(held.get(&lease.key), Some((token, _)) if *token == lease.token);
        if owned {
            held.remove(&lease.key);
        } else {
            debug!(key = %lease.key, "Lock expired or was taken over before release");
        }
        Ok(())
    }
}

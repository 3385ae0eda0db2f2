//! Balance reconciler
//!
//! One run recomputes a wallet's balance by replaying its entire ledger
//! history and republishes it to the snapshot row and the cache, while
//! holding the wallet's lock. Full replay rather than incremental update
//! means any missed or out-of-order run is repaired by the next one.
//!
//! Nothing here returns an error to callers: lock contention, lock backend
//! failures, store failures and cache failures are logged and turned into
//! a [`ReconcileOutcome`]. Staleness persists until the next trigger.

use crate::cache::BalanceCache;
use crate::config::Config;
use crate::lock::{run_exclusive, Exclusive, LockManager};
use crate::metrics;
use crate::store::LedgerStore;
use crate::types::{replay_balance, WalletId};
use crate::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Bounded random delay applied before a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    pub min: Duration,
    pub max: Duration,
}

impl Jitter {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Uniform sample in `[min, max]`
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }
}

/// Timing and naming knobs for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub jitter: Jitter,
    pub lock_ttl: Duration,
    pub lock_key_prefix: String,
    pub cache_ttl: Duration,
}

impl ReconcilerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jitter: Jitter {
                min: Duration::from_millis(config.reconciler.jitter_min_ms),
                max: Duration::from_millis(config.reconciler.jitter_max_ms),
            },
            lock_ttl: config.lock.ttl(),
            lock_key_prefix: config.lock.key_prefix.clone(),
            cache_ttl: config.cache.balance_ttl(),
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What a single run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Recomputed and published under the lock
    Published { balance: i64 },
    /// Another run holds the lock; nothing done
    Contended,
    /// Lock backend, recompute or snapshot write failed; nothing published
    Failed { reason: String },
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Published { .. } => "published",
            ReconcileOutcome::Contended => "contended",
            ReconcileOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    lock: Arc<dyn LockManager>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn BalanceCache>,
        lock: Arc<dyn LockManager>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            cache,
            lock,
            settings,
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Lock key for a wallet
    pub fn lock_key(&self, wallet_id: &WalletId) -> String {
        format!("{}:{}", self.settings.lock_key_prefix, wallet_id)
    }

    /// One reconciliation run. Jitter is applied by the caller.
    pub async fn reconcile(&self, wallet_id: &WalletId) -> ReconcileOutcome {
        let key = self.lock_key(wallet_id);
        let started = Instant::now();

        let exclusive = run_exclusive(
            self.lock.as_ref(),
            &key,
            self.settings.lock_ttl,
            self.recompute_and_publish(wallet_id),
        )
        .await;

        let outcome = match exclusive {
            Ok(Exclusive::Ran(Ok(balance))) => {
                metrics::RECONCILE_DURATION.observe(started.elapsed().as_secs_f64());
                info!(wallet_id = %wallet_id, balance, "Reconciled wallet balance");
                ReconcileOutcome::Published { balance }
            }
            Ok(Exclusive::Ran(Err(e))) => {
                error!(wallet_id = %wallet_id, error = %e, "Reconciliation failed");
                ReconcileOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Ok(Exclusive::Contended) => {
                debug!(wallet_id = %wallet_id, "Reconciliation already running elsewhere; skipping");
                ReconcileOutcome::Contended
            }
            Err(e) => {
                warn!(wallet_id = %wallet_id, error = %e, "Failed to acquire reconciliation lock");
                ReconcileOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        metrics::RECONCILE_RUNS
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    /// Replay, write the snapshot, refresh the cache. Must run under the lock.
    async fn recompute_and_publish(&self, wallet_id: &WalletId) -> Result<i64> {
        let history = self.store.list_transactions(wallet_id).await?;
        let balance = replay_balance(&history)?;

        self.store.update_balance_snapshot(wallet_id, balance).await?;

        if let Err(e) = self
            .cache
            .set(wallet_id, balance, self.settings.cache_ttl)
            .await
        {
            warn!(wallet_id = %wallet_id, error = %e, "Failed to refresh cached balance");
            if let Err(e) = self.cache.delete(wallet_id).await {
                warn!(wallet_id = %wallet_id, error = %e, "Failed to evict stale cached balance");
            }
        }

        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBalanceCache;
    use crate::lock::LocalLockManager;
    use crate::store::{FundsCheck, InMemoryLedgerStore};
    use crate::types::{OwnerId, Transaction, TransactionType, Wallet};
    use chrono::Utc;

    fn settings() -> ReconcilerSettings {
        ReconcilerSettings {
            jitter: Jitter::none(),
            ..ReconcilerSettings::default()
        }
    }

    async fn seeded() -> (
        Arc<InMemoryLedgerStore>,
        Arc<InMemoryBalanceCache>,
        Arc<LocalLockManager>,
    ) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let mut wallet = Wallet::provisioned(WalletId::new("w1"), OwnerId::new("c1"));
        wallet.enable(Utc::now()).unwrap();
        store.upsert_wallet(&wallet).await.unwrap();

        for (kind, amount, reference) in [
            (TransactionType::Deposit, 100, "r1"),
            (TransactionType::Withdrawal, 30, "r2"),
            (TransactionType::Deposit, 50, "r3"),
        ] {
            let tx = Transaction::new(WalletId::new("w1"), kind, amount, reference);
            store.append_transaction(&tx, FundsCheck::Skip).await.unwrap();
        }

        (
            store,
            Arc::new(InMemoryBalanceCache::new()),
            Arc::new(LocalLockManager::new()),
        )
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(Jitter::none().sample(), Duration::ZERO);

        let jitter = Jitter {
            min: Duration::from_millis(10),
            max: Duration::from_millis(20),
        };
        for _ in 0..100 {
            let delay = jitter.sample();
            assert!(delay >= jitter.min && delay <= jitter.max);
        }
    }

    #[tokio::test]
    async fn test_reconcile_publishes_snapshot_and_cache() {
        let (store, cache, lock) = seeded().await;
        let reconciler = Reconciler::new(store.clone(), cache.clone(), lock.clone(), settings());
        let wallet_id = WalletId::new("w1");

        let outcome = reconciler.reconcile(&wallet_id).await;
        assert_eq!(outcome, ReconcileOutcome::Published { balance: 120 });

        assert_eq!(store.get_wallet(&wallet_id).await.unwrap().balance, 120);
        assert_eq!(cache.get(&wallet_id).await.unwrap().unwrap().balance, 120);
        assert!(!lock.is_held(&reconciler.lock_key(&wallet_id)));
    }

    #[tokio::test]
    async fn test_reconcile_skips_when_lock_held() {
        let (store, cache, lock) = seeded().await;
        let reconciler = Reconciler::new(store.clone(), cache, lock.clone(), settings());
        let wallet_id = WalletId::new("w1");

        let _held = lock
            .try_acquire(&reconciler.lock_key(&wallet_id), Duration::from_secs(15))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reconciler.reconcile(&wallet_id).await, ReconcileOutcome::Contended);
        assert_eq!(store.get_wallet(&wallet_id).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_reconcile_failure_releases_lock() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let lock = Arc::new(LocalLockManager::new());
        let reconciler = Reconciler::new(
            store,
            Arc::new(InMemoryBalanceCache::new()),
            lock.clone(),
            settings(),
        );
        let wallet_id = WalletId::new("missing");

        let outcome = reconciler.reconcile(&wallet_id).await;
        assert!(matches!(outcome, ReconcileOutcome::Failed { .. }));
        assert!(!lock.is_held(&reconciler.lock_key(&wallet_id)));
    }

    #[tokio::test]
    async fn test_lock_key_format() {
        let (store, cache, lock) = seeded().await;
        let reconciler = Reconciler::new(store, cache, lock, settings());
        assert_eq!(reconciler.lock_key(&WalletId::new("w1")), "lock:wallet:w1");
    }
}

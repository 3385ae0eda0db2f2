//! Wallet ledger server binary
//!
//! Wires the ledger store, cache, lock and reconciliation scheduler
//! together and runs until interrupted. The transport in front of
//! [`WalletService`] is provided by the embedding deployment.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wallet_ledger::cache::RedisBalanceCache;
use wallet_ledger::config::LockBackend;
use wallet_ledger::identity::PgIdentityResolver;
use wallet_ledger::lock::{LocalLockManager, LockManager, RedisLockManager};
use wallet_ledger::reconciler::ReconcilerSettings;
use wallet_ledger::service::ServiceSettings;
use wallet_ledger::store::PgLedgerStore;
use wallet_ledger::{metrics, spawn_reconcile_scheduler, telemetry};
use wallet_ledger::{Config, Reconciler, WalletService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    telemetry::init(&config.log)?;
    info!("Starting wallet ledger server");

    // Ledger store
    let store = Arc::new(
        PgLedgerStore::connect(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await?,
    );
    store.migrate().await?;
    info!("Connected to PostgreSQL");

    // Cache and lock
    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis = redis::aio::ConnectionManager::new(redis_client).await?;
    info!("Connected to Redis");

    let cache = Arc::new(RedisBalanceCache::new(
        redis.clone(),
        config.cache.key_prefix.clone(),
    ));
    let lock: Arc<dyn LockManager> = match config.lock.backend {
        LockBackend::Redis => Arc::new(RedisLockManager::new(redis)),
        LockBackend::Local => Arc::new(LocalLockManager::new()),
    };

    // Reconciliation
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        cache.clone(),
        lock,
        ReconcilerSettings::from_config(&config),
    ));
    let scheduler = spawn_reconcile_scheduler(reconciler, config.reconciler.queue_capacity);

    let _service = WalletService::new(
        store.clone(),
        cache.clone(),
        Arc::new(scheduler.clone()),
        Arc::new(PgIdentityResolver::new(store.pool().clone())),
        ServiceSettings::from_config(&config),
    );

    info!(
        lock_backend = ?config.lock.backend,
        jitter_max_ms = config.reconciler.jitter_max_ms,
        serialize_withdrawals = config.mutation.serialize_withdrawals,
        "Wallet ledger ready"
    );

    tokio::signal::ctrl_c().await?;

    info!("Shutting down wallet ledger server");
    let tally = scheduler.shutdown().await?;
    info!(
        published = tally.published,
        contended = tally.contended,
        failed = tally.failed,
        cancelled = tally.cancelled,
        "Reconcile scheduler drained"
    );

    let cache_stats = cache.metrics();
    info!(
        hits = cache_stats.hits,
        misses = cache_stats.misses,
        hit_rate = cache_stats.hit_rate(),
        "Balance cache statistics"
    );

    if let Ok(exposition) = metrics::render() {
        tracing::debug!("{}", exposition);
    }

    Ok(())
}

//! Shared harness: the full core wired over in-process backings

#![allow(dead_code)]

use std::sync::Arc;
use wallet_ledger::cache::{BalanceCache, InMemoryBalanceCache};
use wallet_ledger::identity::StaticIdentityResolver;
use wallet_ledger::lock::{LocalLockManager, LockManager};
use wallet_ledger::reconciler::{Jitter, ReconcilerSettings};
use wallet_ledger::service::ServiceSettings;
use wallet_ledger::store::{InMemoryLedgerStore, LedgerStore};
use wallet_ledger::{
    spawn_reconcile_scheduler, OwnerId, ReconcileHandle, ReconcileOutcome, Reconciler,
    WalletId, WalletService,
};

pub struct Harness {
    pub store: Arc<InMemoryLedgerStore>,
    pub cache: Arc<InMemoryBalanceCache>,
    pub reconciler: Arc<Reconciler>,
    pub scheduler: ReconcileHandle,
    pub service: WalletService,
}

impl Harness {
    /// Zero jitter, serialized withdrawals
    pub fn new() -> Self {
        Self::with_settings(ServiceSettings::default())
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cache = Arc::new(InMemoryBalanceCache::new());
        Self::assemble(store, cache.clone(), cache, Arc::new(LocalLockManager::new()), settings)
    }

    /// Wire arbitrary collaborators around an in-memory store
    pub fn assemble(
        store: Arc<InMemoryLedgerStore>,
        cache: Arc<InMemoryBalanceCache>,
        service_cache: Arc<dyn BalanceCache>,
        lock: Arc<dyn LockManager>,
        settings: ServiceSettings,
    ) -> Self {
        Self::assemble_with_store(store.clone(), store, cache, service_cache, lock, settings)
    }

    pub fn assemble_with_store(
        store: Arc<InMemoryLedgerStore>,
        reconciler_store: Arc<dyn LedgerStore>,
        cache: Arc<InMemoryBalanceCache>,
        service_cache: Arc<dyn BalanceCache>,
        lock: Arc<dyn LockManager>,
        settings: ServiceSettings,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            reconciler_store,
            service_cache.clone(),
            lock,
            ReconcilerSettings {
                jitter: Jitter::none(),
                ..ReconcilerSettings::default()
            },
        ));
        let scheduler = spawn_reconcile_scheduler(reconciler.clone(), 64);

        let service = WalletService::new(
            store.clone(),
            service_cache,
            Arc::new(scheduler.clone()),
            Arc::new(StaticIdentityResolver::new()),
            settings,
        );

        Self {
            store,
            cache,
            reconciler,
            scheduler,
            service,
        }
    }

    pub async fn enabled_wallet(&self, owner: &str) -> WalletId {
        self.service
            .enable_wallet(&OwnerId::new(owner))
            .await
            .unwrap()
            .id
    }

    /// Wait for scheduled runs, then complete one more run and return
    /// what it published.
    pub async fn settle(&self, wallet_id: &WalletId) -> i64 {
        self.scheduler.flush().await.unwrap();
        match self.reconciler.reconcile(wallet_id).await {
            ReconcileOutcome::Published { balance } => balance,
            other => panic!("reconcile did not publish: {:?}", other),
        }
    }

    pub async fn snapshot_balance(&self, wallet_id: &WalletId) -> i64 {
        self.store.get_wallet(wallet_id).await.unwrap().balance
    }
}

//! Wallet service: mutations, reads and wallet lifecycle
//!
//! Deposits and withdrawals are validated, appended to the ledger store and
//! answered synchronously. Reconciliation is requested afterwards through a
//! [`ReconcileTrigger`] and never awaited by the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wallet_ledger::cache::InMemoryBalanceCache;
//! use wallet_ledger::identity::StaticIdentityResolver;
//! use wallet_ledger::lock::LocalLockManager;
//! use wallet_ledger::reconciler::{Reconciler, ReconcilerSettings};
//! use wallet_ledger::scheduler::spawn_reconcile_scheduler;
//! use wallet_ledger::service::{ServiceSettings, WalletService};
//! use wallet_ledger::store::InMemoryLedgerStore;
//! use wallet_ledger::types::OwnerId;
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let store = Arc::new(InMemoryLedgerStore::new());
//!     let cache = Arc::new(InMemoryBalanceCache::new());
//!     let reconciler = Arc::new(Reconciler::new(
//!         store.clone(),
//!         cache.clone(),
//!         Arc::new(LocalLockManager::new()),
//!         ReconcilerSettings::default(),
//!     ));
//!     let scheduler = spawn_reconcile_scheduler(reconciler, 1024);
//!
//!     let service = WalletService::new(
//!         store,
//!         cache,
//!         Arc::new(scheduler.clone()),
//!         Arc::new(StaticIdentityResolver::new()),
//!         ServiceSettings::default(),
//!     );
//!
//!     let wallet = service.enable_wallet(&OwnerId::new("customer-1")).await?;
//!     service.deposit(&wallet.id, 100, "r1").await?;
//!
//!     scheduler.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::cache::BalanceCache;
use crate::config::Config;
use crate::identity::IdentityResolver;
use crate::metrics;
use crate::scheduler::ReconcileTrigger;
use crate::store::{FundsCheck, LedgerStore};
use crate::types::{
    BalanceSource, BalanceView, OwnerId, Transaction, TransactionType, Wallet, WalletId,
    WalletStatus,
};
use crate::{Result, WalletError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mutation and read path knobs
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Check applied to withdrawals inside the atomic append
    pub withdrawal_funds_check: FundsCheck,

    /// TTL for cache entries back-filled by reads
    pub cache_ttl: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        let withdrawal_funds_check = if config.mutation.serialize_withdrawals {
            FundsCheck::LedgerDerived
        } else {
            FundsCheck::Skip
        };

        Self {
            withdrawal_funds_check,
            cache_ttl: config.cache.balance_ttl(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Entry point for everything a wallet owner can do
pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    trigger: Arc<dyn ReconcileTrigger>,
    identity: Arc<dyn IdentityResolver>,
    settings: ServiceSettings,
}

impl WalletService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn BalanceCache>,
        trigger: Arc<dyn ReconcileTrigger>,
        identity: Arc<dyn IdentityResolver>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            cache,
            trigger,
            identity,
            settings,
        }
    }

    /// Record a deposit
    pub async fn deposit(
        &self,
        wallet_id: &WalletId,
        amount: i64,
        reference_id: &str,
    ) -> Result<Transaction> {
        self.mutate(wallet_id, TransactionType::Deposit, amount, reference_id)
            .await
    }

    /// Record a withdrawal
    pub async fn withdraw(
        &self,
        wallet_id: &WalletId,
        amount: i64,
        reference_id: &str,
    ) -> Result<Transaction> {
        self.mutate(wallet_id, TransactionType::Withdrawal, amount, reference_id)
            .await
    }

    async fn mutate(
        &self,
        wallet_id: &WalletId,
        kind: TransactionType,
        amount: i64,
        reference_id: &str,
    ) -> Result<Transaction> {
        let result = self.append(wallet_id, kind, amount, reference_id).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.error_type(),
        };
        metrics::MUTATIONS
            .with_label_values(&[kind.as_str(), outcome])
            .inc();

        match &result {
            Ok(tx) => {
                info!(
                    wallet_id = %wallet_id,
                    transaction_id = %tx.id,
                    kind = %kind,
                    amount,
                    "Transaction appended"
                );
                // Only after the append is durable
                self.trigger.schedule(wallet_id);
            }
            Err(e) if e.is_client_error() => {
                debug!(wallet_id = %wallet_id, kind = %kind, error = %e, "Mutation rejected");
            }
            Err(e) => {
                warn!(wallet_id = %wallet_id, kind = %kind, error = %e, "Mutation failed");
            }
        }

        result
    }

    async fn append(
        &self,
        wallet_id: &WalletId,
        kind: TransactionType,
        amount: i64,
        reference_id: &str,
    ) -> Result<Transaction> {
        validate_mutation(wallet_id, amount, reference_id)?;

        let wallet = self.store.get_wallet(wallet_id).await?;
        if !wallet.is_enabled() {
            return Err(WalletError::WalletDisabled(wallet_id.to_string()));
        }

        if self
            .store
            .find_transaction_by_reference(reference_id)
            .await?
            .is_some()
        {
            return Err(WalletError::DuplicateReference(reference_id.to_string()));
        }

        let funds = match kind {
            TransactionType::Deposit => FundsCheck::Skip,
            TransactionType::Withdrawal => {
                let (available, _) = self.known_balance(&wallet).await;
                if amount > available {
                    return Err(WalletError::InsufficientBalance {
                        required: amount,
                        available,
                    });
                }
                self.settings.withdrawal_funds_check
            }
        };

        let tx = Transaction::new(wallet_id.clone(), kind, amount, reference_id);
        self.store.append_transaction(&tx, funds).await?;
        Ok(tx)
    }

    /// Cache if fresh, otherwise the snapshot row. Cache failures fall back.
    async fn known_balance(&self, wallet: &Wallet) -> (i64, BalanceSource) {
        match self.cache.get(&wallet.id).await {
            Ok(Some(cached)) => (cached.balance, BalanceSource::Cache),
            Ok(None) => (wallet.balance, BalanceSource::Snapshot),
            Err(e) => {
                warn!(wallet_id = %wallet.id, error = %e, "Balance cache unavailable; using snapshot");
                (wallet.balance, BalanceSource::Snapshot)
            }
        }
    }

    /// Best-known balance of an enabled wallet
    pub async fn view_balance(&self, wallet_id: &WalletId) -> Result<BalanceView> {
        let wallet = self.enabled_wallet(wallet_id).await?;
        let (balance, source) = self.known_balance(&wallet).await;

        if source == BalanceSource::Snapshot {
            if let Err(e) = self
                .cache
                .set(wallet_id, balance, self.settings.cache_ttl)
                .await
            {
                warn!(wallet_id = %wallet_id, error = %e, "Failed to back-fill balance cache");
            }
        }

        Ok(BalanceView {
            wallet,
            balance,
            source,
        })
    }

    /// Full history of an enabled wallet in replay order
    pub async fn list_transactions(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>> {
        self.enabled_wallet(wallet_id).await?;
        self.store.list_transactions(wallet_id).await
    }

    /// The owner's wallet, created disabled with zero balance if absent
    pub async fn provision_wallet(&self, owner: &OwnerId) -> Result<Wallet> {
        match self.store.get_wallet_by_owner(owner).await {
            Ok(wallet) => Ok(wallet),
            Err(WalletError::NotFound(_)) => {
                let wallet = Wallet::provisioned(WalletId::generate(), owner.clone());
                self.store.upsert_wallet(&wallet).await?;
                info!(wallet_id = %wallet.id, owner = %owner, "Wallet provisioned");
                Ok(wallet)
            }
            Err(e) => Err(e),
        }
    }

    /// `disabled -> enabled`, provisioning the wallet first if needed
    pub async fn enable_wallet(&self, owner: &OwnerId) -> Result<Wallet> {
        let mut wallet = self.provision_wallet(owner).await?;
        let at = Utc::now();
        wallet.enable(at)?;

        self.store
            .update_status(&wallet.id, WalletStatus::Enabled, at)
            .await?;
        info!(wallet_id = %wallet.id, "Wallet enabled");
        Ok(wallet)
    }

    /// `enabled -> disabled`
    pub async fn disable_wallet(&self, owner: &OwnerId) -> Result<Wallet> {
        let mut wallet = self.store.get_wallet_by_owner(owner).await?;
        let at = Utc::now();
        wallet.disable(at)?;

        self.store
            .update_status(&wallet.id, WalletStatus::Disabled, at)
            .await?;
        info!(wallet_id = %wallet.id, "Wallet disabled");
        Ok(wallet)
    }

    /// Resolve a bearer credential to its owner's wallet
    pub async fn wallet_for_credential(&self, credential: &str) -> Result<Wallet> {
        let owner = self.identity.resolve(credential).await?;
        self.store.get_wallet_by_owner(&owner).await
    }

    async fn enabled_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        let wallet = self.store.get_wallet(wallet_id).await?;
        if !wallet.is_enabled() {
            return Err(WalletError::WalletDisabled(wallet_id.to_string()));
        }
        Ok(wallet)
    }
}

fn validate_mutation(wallet_id: &WalletId, amount: i64, reference_id: &str) -> Result<()> {
    if wallet_id.as_str().trim().is_empty() {
        return Err(WalletError::Validation("wallet_id is required".to_string()));
    }
    if amount <= 0 {
        return Err(WalletError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if reference_id.trim().is_empty() {
        return Err(WalletError::Validation("reference_id is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBalanceCache;
    use crate::identity::StaticIdentityResolver;
    use crate::store::InMemoryLedgerStore;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTrigger {
        scheduled: Mutex<Vec<WalletId>>,
    }

    impl ReconcileTrigger for RecordingTrigger {
        fn schedule(&self, wallet_id: &WalletId) {
            self.scheduled.lock().push(wallet_id.clone());
        }
    }

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        cache: Arc<InMemoryBalanceCache>,
        trigger: Arc<RecordingTrigger>,
        service: WalletService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cache = Arc::new(InMemoryBalanceCache::new());
        let trigger = Arc::new(RecordingTrigger::default());
        let identity = Arc::new(StaticIdentityResolver::new());
        identity.insert("tok-1", OwnerId::new("c1"));

        let service = WalletService::new(
            store.clone(),
            cache.clone(),
            trigger.clone(),
            identity,
            ServiceSettings::default(),
        );

        Fixture {
            store,
            cache,
            trigger,
            service,
        }
    }

    #[test]
    fn test_validate_mutation() {
        let w = WalletId::new("w1");
        assert!(validate_mutation(&w, 1, "r").is_ok());
        assert!(matches!(validate_mutation(&w, 0, "r"), Err(WalletError::Validation(_))));
        assert!(matches!(validate_mutation(&w, -5, "r"), Err(WalletError::Validation(_))));
        assert!(matches!(validate_mutation(&w, 1, "  "), Err(WalletError::Validation(_))));
        assert!(matches!(
            validate_mutation(&WalletId::new(""), 1, "r"),
            Err(WalletError::Validation(_))
        ));
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        assert_eq!(
            ServiceSettings::from_config(&config).withdrawal_funds_check,
            FundsCheck::LedgerDerived
        );

        config.mutation.serialize_withdrawals = false;
        assert_eq!(
            ServiceSettings::from_config(&config).withdrawal_funds_check,
            FundsCheck::Skip
        );
    }

    #[tokio::test]
    async fn test_deposit_appends_and_schedules() {
        let f = fixture();
        let wallet = f.service.enable_wallet(&OwnerId::new("c1")).await.unwrap();

        let tx = f.service.deposit(&wallet.id, 100, "r1").await.unwrap();
        assert_eq!(tx.kind, TransactionType::Deposit);
        assert_eq!(tx.amount, 100);
        assert_eq!(tx.reference_id, "r1");

        assert_eq!(f.store.transaction_count(), 1);
        assert_eq!(f.trigger.scheduled.lock().as_slice(), &[wallet.id.clone()]);
    }

    #[tokio::test]
    async fn test_rejections_do_not_schedule() {
        let f = fixture();
        let wallet = f.service.enable_wallet(&OwnerId::new("c1")).await.unwrap();

        assert!(matches!(
            f.service.deposit(&wallet.id, 0, "r1").await,
            Err(WalletError::Validation(_))
        ));
        assert!(matches!(
            f.service.withdraw(&wallet.id, 10, "r2").await,
            Err(WalletError::InsufficientBalance {
                required: 10,
                available: 0
            })
        ));
        assert!(matches!(
            f.service.deposit(&WalletId::new("nope"), 10, "r3").await,
            Err(WalletError::NotFound(_))
        ));

        assert_eq!(f.store.transaction_count(), 0);
        assert!(f.trigger.scheduled.lock().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_checks_cache_before_snapshot() {
        let f = fixture();
        let wallet = f.service.enable_wallet(&OwnerId::new("c1")).await.unwrap();
        f.service.deposit(&wallet.id, 100, "r1").await.unwrap();

        // Snapshot still says 0, but a fresh cache entry says 100
        f.cache
            .set(&wallet.id, 100, Duration::from_secs(15))
            .await
            .unwrap();

        let tx = f.service.withdraw(&wallet.id, 60, "r2").await.unwrap();
        assert_eq!(tx.kind, TransactionType::Withdrawal);
    }

    #[tokio::test]
    async fn test_serialized_withdrawal_rejects_stale_advisory_balance() {
        let f = fixture();
        let wallet = f.service.enable_wallet(&OwnerId::new("c1")).await.unwrap();
        f.service.deposit(&wallet.id, 100, "r1").await.unwrap();
        f.cache
            .set(&wallet.id, 100, Duration::from_secs(15))
            .await
            .unwrap();

        f.service.withdraw(&wallet.id, 80, "r2").await.unwrap();

        // The cache still claims 100; the ledger knows only 20 is left
        assert!(matches!(
            f.service.withdraw(&wallet.id, 80, "r3").await,
            Err(WalletError::InsufficientBalance {
                required: 80,
                available: 20
            })
        ));
        assert_eq!(f.store.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_view_balance_backfills_cache() {
        let f = fixture();
        let wallet = f.service.enable_wallet(&OwnerId::new("c1")).await.unwrap();
        f.store.update_balance_snapshot(&wallet.id, 42).await.unwrap();

        let first = f.service.view_balance(&wallet.id).await.unwrap();
        assert_eq!(first.balance, 42);
        assert_eq!(first.source, BalanceSource::Snapshot);

        let second = f.service.view_balance(&wallet.id).await.unwrap();
        assert_eq!(second.balance, 42);
        assert_eq!(second.source, BalanceSource::Cache);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let f = fixture();
        let owner = OwnerId::new("c1");

        let provisioned = f.service.provision_wallet(&owner).await.unwrap();
        assert_eq!(provisioned.status, WalletStatus::Disabled);
        assert_eq!(provisioned.balance, 0);
        assert_eq!(f.service.provision_wallet(&owner).await.unwrap().id, provisioned.id);

        let enabled = f.service.enable_wallet(&owner).await.unwrap();
        assert_eq!(enabled.id, provisioned.id);
        assert!(enabled.enabled_at.is_some());
        assert!(matches!(
            f.service.enable_wallet(&owner).await,
            Err(WalletError::InvalidStatusTransition(_))
        ));

        let disabled = f.service.disable_wallet(&owner).await.unwrap();
        assert_eq!(disabled.status, WalletStatus::Disabled);
        assert!(matches!(
            f.service.disable_wallet(&owner).await,
            Err(WalletError::InvalidStatusTransition(_))
        ));

        assert!(matches!(
            f.service.view_balance(&provisioned.id).await,
            Err(WalletError::WalletDisabled(_))
        ));
        assert!(matches!(
            f.service.list_transactions(&provisioned.id).await,
            Err(WalletError::WalletDisabled(_))
        ));
    }

    #[tokio::test]
    async fn test_wallet_for_credential() {
        let f = fixture();
        let wallet = f.service.provision_wallet(&OwnerId::new("c1")).await.unwrap();

        assert_eq!(f.service.wallet_for_credential("tok-1").await.unwrap().id, wallet.id);
        assert!(matches!(
            f.service.wallet_for_credential("forged").await,
            Err(WalletError::InvalidCredential)
        ));
    }
}

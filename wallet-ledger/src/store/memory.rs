//! In-memory ledger store
//!
//! Single-process backing used by tests and local runs. One `RwLock`
//! guards all tables so an append's admission checks and its insert are
//! a single critical section, the same guarantee the Postgres store gets
//! from a row lock plus the unique index.

use super::{already_in, check_admission, FundsCheck, LedgerStore};
use crate::types::{replay_balance, OwnerId, Transaction, Wallet, WalletId, WalletStatus};
use crate::{Result, WalletError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    wallets: HashMap<WalletId, Wallet>,
    owners: HashMap<OwnerId, WalletId>,
    // Kept in replay order per wallet.
    transactions: HashMap<WalletId, BTreeMap<(DateTime<Utc>, Uuid), Transaction>>,
    references: HashMap<String, (WalletId, (DateTime<Utc>, Uuid))>,
}

/// In-memory [`LedgerStore`]
#[derive(Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of appended transactions across all wallets
    pub fn transaction_count(&self) -> usize {
        self.tables
            .read()
            .transactions
            .values()
            .map(BTreeMap::len)
            .sum()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append_transaction(&self, tx: &Transaction, funds: FundsCheck) -> Result<()> {
        let mut tables = self.tables.write();

        if tables.references.contains_key(&tx.reference_id) {
            return Err(WalletError::DuplicateReference(tx.reference_id.clone()));
        }

        let wallet = tables
            .wallets
            .get(&tx.wallet_id)
            .ok_or_else(|| WalletError::NotFound(format!("wallet {}", tx.wallet_id)))?;
        if !wallet.is_enabled() {
            return Err(WalletError::WalletDisabled(tx.wallet_id.to_string()));
        }

        let available = match tables.transactions.get(&tx.wallet_id) {
            Some(history) => replay_balance(history.values())?,
            None => 0,
        };
        check_admission(available, tx, funds)?;

        let key = tx.replay_key();
        tables
            .references
            .insert(tx.reference_id.clone(), (tx.wallet_id.clone(), key));
        tables
            .transactions
            .entry(tx.wallet_id.clone())
            .or_default()
            .insert(key, tx.clone());

        Ok(())
    }

    async fn find_transaction_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<Transaction>> {
        let tables = self.tables.read();
        Ok(tables.references.get(reference_id).and_then(|(wallet_id, key)| {
            tables
                .transactions
                .get(wallet_id)
                .and_then(|history| history.get(key))
                .cloned()
        }))
    }

    async fn list_transactions(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>> {
        let tables = self.tables.read();
        Ok(tables
            .transactions
            .get(wallet_id)
            .map(|history| history.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_wallet_by_owner(&self, owner: &OwnerId) -> Result<Wallet> {
        let tables = self.tables.read();
        tables
            .owners
            .get(owner)
            .and_then(|id| tables.wallets.get(id))
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("wallet for owner {}", owner)))
    }

    async fn get_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        self.tables
            .read()
            .wallets
            .get(wallet_id)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("wallet {}", wallet_id)))
    }

    async fn upsert_wallet(&self, wallet: &Wallet) -> Result<()> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.owners.get(&wallet.owned_by) {
            if existing != &wallet.id {
                return Err(WalletError::Storage(format!(
                    "owner {} already has wallet {}",
                    wallet.owned_by, existing
                )));
            }
        }
        tables
            .owners
            .insert(wallet.owned_by.clone(), wallet.id.clone());
        tables.wallets.insert(wallet.id.clone(), wallet.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        wallet_id: &WalletId,
        status: WalletStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        let wallet = tables
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| WalletError::NotFound(format!("wallet {}", wallet_id)))?;

        if wallet.status == status {
            return Err(already_in(status));
        }

        wallet.status = status;
        match status {
            WalletStatus::Enabled => wallet.enabled_at = Some(at),
            WalletStatus::Disabled => wallet.disabled_at = Some(at),
        }
        Ok(())
    }

    async fn update_balance_snapshot(&self, wallet_id: &WalletId, balance: i64) -> Result<()> {
        let mut tables = self.tables.write();
        let wallet = tables
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| WalletError::NotFound(format!("wallet {}", wallet_id)))?;
        wallet.balance = balance;
        Ok(())
    }
}

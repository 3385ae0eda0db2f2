//! Ledger store: the durable, append-only source of truth
//!
//! Two tables: `transactions` (append-only, read-many) and `wallets`
//! (one snapshot row per wallet, mutated by status transitions and the
//! reconciler). Every operation is atomic with respect to a single row;
//! `append_transaction` additionally makes its admission checks atomic
//! with the insert.

pub mod memory;
pub mod postgres;

use crate::types::{OwnerId, Transaction, Wallet, WalletId, WalletStatus};
use crate::{Result, WalletError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Balance check performed inside the atomic append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundsCheck {
    /// No balance check (deposits, or unserialized withdrawals)
    Skip,
    /// Reject if the ledger-derived balance is below the amount
    LedgerDerived,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Durably append a transaction.
    ///
    /// Atomically with the insert, rejects with `DuplicateReference` if the
    /// reference ID exists anywhere in the ledger, `NotFound` if the wallet
    /// does not exist, `WalletDisabled` if it is disabled and, under
    /// [`FundsCheck::LedgerDerived`], `InsufficientBalance` if the sum of the
    /// wallet's history is below the amount. Any transaction that would take
    /// the ledger-derived balance outside `i64` is rejected with `Validation`.
    async fn append_transaction(&self, tx: &Transaction, funds: FundsCheck) -> Result<()>;

    /// Look up a transaction by its idempotency key
    async fn find_transaction_by_reference(&self, reference_id: &str)
        -> Result<Option<Transaction>>;

    /// All transactions of a wallet ordered by `(transacted_at, id)`
    async fn list_transactions(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>>;

    /// Fetch by owner; `NotFound` if absent
    async fn get_wallet_by_owner(&self, owner: &OwnerId) -> Result<Wallet>;

    /// Fetch by ID; `NotFound` if absent
    async fn get_wallet(&self, wallet_id: &WalletId) -> Result<Wallet>;

    /// Insert or replace a wallet row
    async fn upsert_wallet(&self, wallet: &Wallet) -> Result<()>;

    /// Record a status transition. `at` lands in `enabled_at` or
    /// `disabled_at` depending on the new status. Rejects with
    /// `InvalidStatusTransition` if the wallet already has that status.
    async fn update_status(
        &self,
        wallet_id: &WalletId,
        status: WalletStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Publish a recomputed balance to the snapshot row
    async fn update_balance_snapshot(&self, wallet_id: &WalletId, balance: i64) -> Result<()>;
}

/// Admission rules evaluated against the ledger-derived balance. Callers
/// must hold whatever serializes appends to the wallet.
pub(crate) fn check_admission(available: i64, tx: &Transaction, funds: FundsCheck) -> Result<()> {
    if funds == FundsCheck::LedgerDerived && available < tx.amount {
        return Err(WalletError::InsufficientBalance {
            required: tx.amount,
            available,
        });
    }

    if available.checked_add(tx.signed_amount()).is_none() {
        return Err(WalletError::Validation(format!(
            "amount {} would overflow the balance of wallet {}",
            tx.amount, tx.wallet_id
        )));
    }

    Ok(())
}

/// Error for a transition into the status the wallet already has
pub(crate) fn already_in(status: WalletStatus) -> WalletError {
    WalletError::InvalidStatusTransition(format!("Already {}", status))
}

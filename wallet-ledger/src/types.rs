//! Core types for the wallet ledger
//!
//! All amounts are signed 64-bit integers in minor currency units.
//! Transactions are immutable once appended; wallet rows carry only
//! lifecycle state and the last published balance snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque wallet identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    /// Create new wallet ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random wallet ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque owner (customer) identifier, as produced by identity resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create new owner ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wallet lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    /// Initial state; mutations are rejected
    Disabled,
    /// Deposits and withdrawals are accepted
    Enabled,
}

impl WalletStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Disabled => "disabled",
            WalletStatus::Enabled => "enabled",
        }
    }
}

impl FromStr for WalletStatus {
    type Err = crate::WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(WalletStatus::Disabled),
            "enabled" => Ok(WalletStatus::Enabled),
            other => Err(crate::WalletError::Serialization(format!(
                "unknown wallet status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wallet snapshot row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub id: WalletId,

    /// Owning customer
    pub owned_by: OwnerId,

    /// Lifecycle status
    pub status: WalletStatus,

    /// Last time the wallet was enabled
    pub enabled_at: Option<DateTime<Utc>>,

    /// Last time the wallet was disabled
    pub disabled_at: Option<DateTime<Utc>>,

    /// Last published balance (minor units). Written by the reconciler only.
    pub balance: i64,
}

impl Wallet {
    /// A freshly provisioned wallet: disabled, zero balance
    pub fn provisioned(id: WalletId, owned_by: OwnerId) -> Self {
        Self {
            id,
            owned_by,
            status: WalletStatus::Disabled,
            enabled_at: None,
            disabled_at: None,
            balance: 0,
        }
    }

    /// Whether mutations are currently accepted
    pub fn is_enabled(&self) -> bool {
        self.status == WalletStatus::Enabled
    }

    /// Apply the `disabled -> enabled` transition
    pub fn enable(&mut self, at: DateTime<Utc>) -> crate::Result<()> {
        if self.status == WalletStatus::Enabled {
            return Err(crate::WalletError::InvalidStatusTransition(
                "Already enabled".to_string(),
            ));
        }
        self.status = WalletStatus::Enabled;
        self.enabled_at = Some(at);
        Ok(())
    }

    /// Apply the `enabled -> disabled` transition
    pub fn disable(&mut self, at: DateTime<Utc>) -> crate::Result<()> {
        if self.status == WalletStatus::Disabled {
            return Err(crate::WalletError::InvalidStatusTransition(
                "Already disabled".to_string(),
            ));
        }
        self.status = WalletStatus::Disabled;
        self.disabled_at = Some(at);
        Ok(())
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Credit
    Deposit,
    /// Debit
    Withdrawal,
}

impl TransactionType {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }
}

impl FromStr for TransactionType {
    type Err = crate::WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            other => Err(crate::WalletError::Serialization(format!(
                "unknown transaction type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction status. Failed attempts are never persisted, so every
/// appended row is `Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Durably appended
    Success,
}

impl TransactionStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = crate::WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TransactionStatus::Success),
            other => Err(crate::WalletError::Serialization(format!(
                "unknown transaction status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Wallet this transaction belongs to
    pub wallet_id: WalletId,

    /// Deposit or withdrawal
    #[serde(rename = "type")]
    pub kind: TransactionType,

    /// Always `success` once appended
    pub status: TransactionStatus,

    /// Strictly positive amount (minor units)
    pub amount: i64,

    /// Client-supplied idempotency key, unique across the whole ledger
    pub reference_id: String,

    /// Server-assigned append timestamp
    pub transacted_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a new transaction stamped with the current server time
    pub fn new(
        wallet_id: WalletId,
        kind: TransactionType,
        amount: i64,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            wallet_id,
            kind,
            status: TransactionStatus::Success,
            amount,
            reference_id: reference_id.into(),
            transacted_at: Utc::now(),
        }
    }

    /// Signed effect on the balance
    pub fn signed_amount(&self) -> i64 {
        match self.kind {
            TransactionType::Deposit => self.amount,
            TransactionType::Withdrawal => -self.amount,
        }
    }

    /// Ordering key used for replay: transacted-at, ties broken by ID
    pub fn replay_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.transacted_at, self.id)
    }
}

/// Replay a wallet's history into its balance.
///
/// Returns `InvariantViolation` if the running sum overflows `i64`.
pub fn replay_balance<'a, I>(transactions: I) -> crate::Result<i64>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    transactions.into_iter().try_fold(0i64, |balance, tx| {
        balance.checked_add(tx.signed_amount()).ok_or_else(|| {
            crate::WalletError::InvariantViolation(format!(
                "balance overflow replaying transaction {}",
                tx.id
            ))
        })
    })
}

/// Where a balance read was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSource {
    /// Fresh cache entry
    Cache,
    /// Ledger store snapshot row
    Snapshot,
}

/// Result of a balance read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    /// Wallet as stored
    pub wallet: Wallet,

    /// Best-known balance
    pub balance: i64,

    /// Which layer answered
    pub source: BalanceSource,
}

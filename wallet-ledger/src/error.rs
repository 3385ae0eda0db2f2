//! Error types for the wallet ledger

use thiserror::Error;

/// Result type for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;

/// Wallet errors
#[derive(Error, Debug)]
pub enum WalletError {
    /// Request rejected before any durable write (bad amount, missing field)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Reference ID already exists somewhere in the ledger
    #[error("Duplicate reference_id: {0}")]
    DuplicateReference(String),

    /// Wallet is disabled
    #[error("Wallet disabled: {0}")]
    WalletDisabled(String),

    /// Withdrawal exceeds the known balance
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Requested amount
        required: i64,
        /// Balance the check was evaluated against
        available: i64,
    },

    /// Wallet (or other row) not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Status transition not allowed from the current state
    #[error("Invalid status transition: {0}")]
    InvalidStatusTransition(String),

    /// Bearer credential did not resolve to an owner
    #[error("Invalid credential")]
    InvalidCredential,

    /// Ledger store unavailable or write failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cache backend failure (never surfaced to callers)
    #[error("Cache error: {0}")]
    Cache(String),

    /// Lock backend failure (never surfaced to callers)
    #[error("Lock error: {0}")]
    Lock(String),

    /// Invariant violation (balance overflow, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Row or payload could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Reconciliation scheduler unavailable
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WalletError {
    /// Whether the failure is the caller's fault (4xx) rather than ours (5xx)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WalletError::Validation(_)
                | WalletError::DuplicateReference(_)
                | WalletError::WalletDisabled(_)
                | WalletError::InsufficientBalance { .. }
                | WalletError::NotFound(_)
                | WalletError::InvalidStatusTransition(_)
                | WalletError::InvalidCredential
        )
    }

    /// Stable machine-readable error kind
    pub fn error_type(&self) -> &'static str {
        match self {
            WalletError::Validation(_) => "validation_error",
            WalletError::DuplicateReference(_) => "duplicate_reference",
            WalletError::WalletDisabled(_) => "wallet_disabled",
            WalletError::InsufficientBalance { .. } => "insufficient_balance",
            WalletError::NotFound(_) => "not_found",
            WalletError::InvalidStatusTransition(_) => "invalid_status",
            WalletError::InvalidCredential => "invalid_credential",
            WalletError::Storage(_) => "storage_error",
            WalletError::Cache(_) => "cache_error",
            WalletError::Lock(_) => "lock_error",
            WalletError::InvariantViolation(_) => "invariant_violation",
            WalletError::Serialization(_) => "serialization_error",
            WalletError::Concurrency(_) => "concurrency_error",
            WalletError::Config(_) => "config_error",
        }
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => WalletError::NotFound("row not found".to_string()),
            other => WalletError::Storage(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for WalletError {
    fn from(err: redis::RedisError) -> Self {
        WalletError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for WalletError {
    fn from(err: config::ConfigError) -> Self {
        WalletError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(WalletError::Validation("amount".into()).is_client_error());
        assert!(WalletError::DuplicateReference("r1".into()).is_client_error());
        assert!(WalletError::InsufficientBalance {
            required: 150,
            available: 100
        }
        .is_client_error());
        assert!(!WalletError::Storage("down".into()).is_client_error());
        assert!(!WalletError::Cache("down".into()).is_client_error());
    }

    #[test]
    fn test_error_display() {
        let err = WalletError::InsufficientBalance {
            required: 150,
            available: 100,
        };
        assert_eq!(err.to_string(), "Insufficient balance: required 150, available 100");
        assert_eq!(err.error_type(), "insufficient_balance");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: WalletError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, WalletError::NotFound(_)));
    }
}

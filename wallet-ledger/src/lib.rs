//! Mini Wallet Ledger
//!
//! Per-wallet balances kept correct under concurrent deposits and
//! withdrawals, served from a volatile cache in front of a durable,
//! append-only transaction ledger.
//!
//! # Architecture
//!
//! - **Ledger store**: append-only transactions plus one snapshot row per wallet; source of truth
//! - **Wallet service**: validates and appends mutations, answers synchronously
//! - **Reconciler**: replays a wallet's full history and republishes the balance under a per-wallet lock
//! - **Scheduler**: bounded queue decoupling reconciliation from the request path
//! - **Cache**: TTL-bounded, best-effort, never authoritative
//!
//! # Invariants
//!
//! - Balance convergence: once appends settle and one run completes,
//!   balance == Σ(deposits) − Σ(withdrawals)
//! - Reference IDs are unique across the whole ledger
//! - Nothing is appended for a disabled wallet
//! - At most one run recomputes and publishes a given wallet at a time

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod lock;
pub mod metrics;
pub mod reconciler;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Result, WalletError};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use scheduler::{spawn_reconcile_scheduler, ReconcileHandle, ReconcileTrigger};
pub use service::WalletService;
pub use types::{
    BalanceSource, BalanceView, OwnerId, Transaction, TransactionStatus, TransactionType, Wallet,
    WalletId, WalletStatus,
};

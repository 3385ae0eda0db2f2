//! Postgres ledger store
//!
//! Duplicate references are rejected by the unique index on
//! `transactions.reference_id`. Appends to the same wallet are serialized
//! by `SELECT ... FOR UPDATE` on the wallet row, which is what makes the
//! enabled check and the balance checks atomic with the insert. Status
//! updates are conditional on the current status, so two concurrent
//! enables cannot both succeed.

use super::{already_in, check_admission, FundsCheck, LedgerStore};
use crate::types::{OwnerId, Transaction, Wallet, WalletId, WalletStatus};
use crate::{Result, WalletError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

/// Schema applied by [`PgLedgerStore::migrate`]
pub const SCHEMA: &str = include_str!("../../migrations/0001_wallet_ledger.sql");

/// Postgres `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, FromRow)]
struct WalletRow {
    id: String,
    owned_by: String,
    status: String,
    enabled_at: Option<DateTime<Utc>>,
    disabled_at: Option<DateTime<Utc>>,
    balance: i64,
}

impl TryFrom<WalletRow> for Wallet {
    type Error = WalletError;

    fn try_from(row: WalletRow) -> Result<Self> {
        Ok(Wallet {
            id: WalletId::new(row.id),
            owned_by: OwnerId::new(row.owned_by),
            status: row.status.parse()?,
            enabled_at: row.enabled_at,
            disabled_at: row.disabled_at,
            balance: row.balance,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    wallet_id: String,
    #[sqlx(rename = "type")]
    kind: String,
    status: String,
    amount: i64,
    reference_id: String,
    transacted_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = WalletError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Transaction {
            id: row.id,
            wallet_id: WalletId::new(row.wallet_id),
            kind: row.kind.parse()?,
            status: row.status.parse()?,
            amount: row.amount,
            reference_id: row.reference_id,
            transacted_at: row.transacted_at,
        })
    }
}

/// Postgres-backed [`LedgerStore`]
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Connect a new pool
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        for statement in schema_statements(SCHEMA) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        tracing::info!("Ledger schema is up to date");
        Ok(())
    }
}

/// Split a SQL script into executable statements, dropping comments
fn schema_statements(script: &str) -> Vec<String> {
    script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn append_transaction(&self, tx: &Transaction, funds: FundsCheck) -> Result<()> {
        let mut db_tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM wallets WHERE id = $1 FOR UPDATE")
                .bind(tx.wallet_id.as_str())
                .fetch_optional(&mut *db_tx)
                .await?;

        let status: WalletStatus = status
            .ok_or_else(|| WalletError::NotFound(format!("wallet {}", tx.wallet_id)))?
            .parse()?;
        if status != WalletStatus::Enabled {
            return Err(WalletError::WalletDisabled(tx.wallet_id.to_string()));
        }

        // Every earlier append passed the same check, so the sum fits in BIGINT
        let available: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(CASE WHEN type = 'deposit' THEN amount ELSE -amount END), 0)::BIGINT
            FROM transactions
            WHERE wallet_id = $1
            "#,
        )
        .bind(tx.wallet_id.as_str())
        .fetch_one(&mut *db_tx)
        .await?;
        check_admission(available, tx, funds)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions (id, wallet_id, type, status, amount, reference_id, transacted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(tx.id)
        .bind(tx.wallet_id.as_str())
        .bind(tx.kind.as_str())
        .bind(tx.status.as_str())
        .bind(tx.amount)
        .bind(&tx.reference_id)
        .bind(tx.transacted_at)
        .execute(&mut *db_tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(WalletError::DuplicateReference(tx.reference_id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        db_tx.commit().await?;
        Ok(())
    }

    async fn find_transaction_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, wallet_id, type, status, amount, reference_id, transacted_at
            FROM transactions
            WHERE reference_id = $1
            "#,
        )
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn list_transactions(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, wallet_id, type, status, amount, reference_id, transacted_at
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY transacted_at, id
            "#,
        )
        .bind(wallet_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn get_wallet_by_owner(&self, owner: &OwnerId) -> Result<Wallet> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT id, owned_by, status, enabled_at, disabled_at, balance
            FROM wallets
            WHERE owned_by = $1
            "#,
        )
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| WalletError::NotFound(format!("wallet for owner {}", owner)))?
            .try_into()
    }

    async fn get_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT id, owned_by, status, enabled_at, disabled_at, balance
            FROM wallets
            WHERE id = $1
            "#,
        )
        .bind(wallet_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| WalletError::NotFound(format!("wallet {}", wallet_id)))?
            .try_into()
    }

    async fn upsert_wallet(&self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, owned_by, status, enabled_at, disabled_at, balance)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET owned_by = EXCLUDED.owned_by,
                status = EXCLUDED.status,
                enabled_at = EXCLUDED.enabled_at,
                disabled_at = EXCLUDED.disabled_at,
                balance = EXCLUDED.balance
            "#,
        )
        .bind(wallet.id.as_str())
        .bind(wallet.owned_by.as_str())
        .bind(wallet.status.as_str())
        .bind(wallet.enabled_at)
        .bind(wallet.disabled_at)
        .bind(wallet.balance)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status(
        &self,
        wallet_id: &WalletId,
        status: WalletStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let query = match status {
            WalletStatus::Enabled => {
                "UPDATE wallets SET status = $1, enabled_at = $2 WHERE id = $3 AND status <> $1"
            }
            WalletStatus::Disabled => {
                "UPDATE wallets SET status = $1, disabled_at = $2 WHERE id = $3 AND status <> $1"
            }
        };

        let result = sqlx::query(query)
            .bind(status.as_str())
            .bind(at)
            .bind(wallet_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            // Either no such wallet or it already has this status
            self.get_wallet(wallet_id).await?;
            return Err(already_in(status));
        }
        Ok(())
    }

    async fn update_balance_snapshot(&self, wallet_id: &WalletId, balance: i64) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(wallet_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(WalletError::NotFound(format!("wallet {}", wallet_id)));
        }
        Ok(())
    }
}

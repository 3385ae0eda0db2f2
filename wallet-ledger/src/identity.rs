//! Identity resolution: bearer credential -> owner
//!
//! Token issuance lives outside this crate; only the lookup is modelled.

use crate::types::OwnerId;
use crate::{Result, WalletError};
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a credential, failing with `InvalidCredential`
    async fn resolve(&self, credential: &str) -> Result<OwnerId>;
}

/// Looks credentials up in the `customer_tokens` table
#[derive(Clone)]
pub struct PgIdentityResolver {
    pool: PgPool,
}

impl PgIdentityResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityResolver for PgIdentityResolver {
    async fn resolve(&self, credential: &str) -> Result<OwnerId> {
        let owner: Option<String> =
            sqlx::query_scalar("SELECT customer_xid FROM customer_tokens WHERE token = $1")
                .bind(credential)
                .fetch_optional(&self.pool)
                .await?;

        owner.map(OwnerId::new).ok_or(WalletError::InvalidCredential)
    }
}

/// Fixed credential table, for tests and local runs
#[derive(Default)]
pub struct StaticIdentityResolver {
    tokens: DashMap<String, OwnerId>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: impl Into<String>, owner: OwnerId) {
        self.tokens.insert(credential.into(), owner);
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, credential: &str) -> Result<OwnerId> {
        self.tokens
            .get(credential)
            .map(|owner| owner.clone())
            .ok_or(WalletError::InvalidCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticIdentityResolver::new();
        resolver.insert("tok-1", OwnerId::new("c1"));

        assert_eq!(resolver.resolve("tok-1").await.unwrap(), OwnerId::new("c1"));
        assert!(matches!(
            resolver.resolve("forged").await,
            Err(WalletError::InvalidCredential)
        ));
    }
}

// Copyright (c) 2026 Isprava Engineering
//! PostgreSQL-backed [`AclConfigStore`] (`spec.md` SS4.7): a single-row
//! JSONB document, matching spec.md SS3's "Global config is stored in the
//! document store".

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::acl::{AclConfig, AclConfigStore, AclStoreError};
use crate::domain::circuit_breaker::{CircuitBreaker, CircuitError};

pub struct PostgresAclConfigStore {
    pool: PgPool,
    breaker: Arc<CircuitBreaker>,
}

impl PostgresAclConfigStore {
    pub fn new(pool: PgPool, breaker: Arc<CircuitBreaker>) -> Self {
        Self { pool, breaker }
    }

    /// Seed the config row from `seed` iff no row exists yet, so a fresh
    /// deployment starts from `ACL_SEED_PATH` but a running one is never
    /// clobbered by a redeploy (`SPEC_FULL.md` SS10.1).
    pub async fn seed_if_empty(&self, seed: AclConfig) -> Result<(), AclStoreError> {
        let existing = self
            .breaker
            .execute(|| async move {
                sqlx::query(r#"SELECT 1 FROM acl_config WHERE id = true"#).fetch_optional(&self.pool).await
            })
            .await
            .map_err(circuit_err)?;

        if existing.is_none() {
            self.save(&seed).await?;
        }
        Ok(())
    }
}

/// `spec.md` SS4.1: the `database` breaker wraps every Postgres call.
fn circuit_err(e: CircuitError<sqlx::Error>) -> AclStoreError {
    match e {
        CircuitError::Open => AclStoreError::Storage("database circuit open".to_string()),
        CircuitError::Inner(err) => AclStoreError::Storage(err.to_string()),
    }
}

#[async_trait]
impl AclConfigStore for PostgresAclConfigStore {
    async fn load(&self) -> Result<AclConfig, AclStoreError> {
        let row = self
            .breaker
            .execute(|| async move {
                sqlx::query(r#"SELECT config FROM acl_config WHERE id = true"#).fetch_optional(&self.pool).await
            })
            .await
            .map_err(circuit_err)?;

        match row {
            Some(row) => {
                let value: serde_json::Value = row.get("config");
                serde_json::from_value(value)
                    .map_err(|e| AclStoreError::Storage(format!("corrupt acl config: {e}")))
            }
            None => Ok(AclConfig::default()),
        }
    }

    async fn save(&self, config: &AclConfig) -> Result<(), AclStoreError> {
        let value = serde_json::to_value(config)
            .map_err(|e| AclStoreError::Storage(format!("failed to serialize acl config: {e}")))?;

        self.breaker
            .execute(|| async move {
                sqlx::query(
                    r#"
                    INSERT INTO acl_config (id, config) VALUES (true, $1)
                    ON CONFLICT (id) DO UPDATE SET config = EXCLUDED.config
                    "#,
                )
                .bind(value)
                .execute(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(())
    }
}

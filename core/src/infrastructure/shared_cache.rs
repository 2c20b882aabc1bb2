// Copyright (c) 2026 Isprava Engineering
//! Shared cache adapters (`spec.md` SS4.2): a Postgres-backed store over
//! the `kv_cache` table, an in-process `DashMap` fallback, and a wrapper
//! that transparently switches between them.
//!
//! No redis/memcached crate appears anywhere in the reference corpus, so
//! the shared cache is resolved onto the same Postgres pool already used
//! for relational and document data (see `DESIGN.md`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::warn;

use crate::domain::cache::{CacheError, SharedCache};

pub struct PostgresCache {
    pool: PgPool,
}

impl PostgresCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SharedCache for PostgresCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let row = sqlx::query(
            r#"SELECT value FROM kv_cache WHERE namespace = $1 AND key = $2 AND expires_at > now()"#,
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        match row {
            Some(row) => {
                let value: Value =
                    row.try_get("value").map_err(|e| CacheError::Unavailable(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());

        sqlx::query(
            r#"
            INSERT INTO kv_cache (namespace, key, value, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (namespace, key)
            DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        Ok(())
    }
}

struct Entry {
    value: Value,
    expires_at: chrono::DateTime<Utc>,
}

/// Process-local fallback, keyed by `"{namespace}:{key}"`.
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedCache for InMemoryCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let composite = Self::composite_key(namespace, key);
        match self.entries.get(&composite) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.entries.remove(&composite);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        self.entries.insert(Self::composite_key(namespace, key), Entry { value, expires_at });
        Ok(())
    }
}

/// Tries `primary` first; on [`CacheError::Unavailable`] falls back to
/// `fallback` and logs once per call, per `spec.md` SS4.2's "transparent
/// fallback" requirement. Writes go to both so a later primary recovery
/// sees entries written during the outage.
pub struct FallbackCache {
    primary: Arc<dyn SharedCache>,
    fallback: Arc<InMemoryCache>,
}

impl FallbackCache {
    pub fn new(primary: Arc<dyn SharedCache>, fallback: Arc<InMemoryCache>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SharedCache for FallbackCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let result = match self.primary.get(namespace, key).await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, namespace, key, "shared cache primary unavailable, reading fallback");
                self.fallback.get(namespace, key).await
            }
        };
        if let Ok(value) = &result {
            crate::metrics::record_cache_result(value.is_some());
        }
        result
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let fallback_result = self.fallback.set(namespace, key, value.clone(), ttl).await;
        match self.primary.set(namespace, key, value, ttl).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, namespace, key, "shared cache primary unavailable, wrote fallback only");
                fallback_result
            }
        }
    }
}

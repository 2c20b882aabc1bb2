// Copyright (c) 2026 Isprava Engineering
//! Shared cache domain interface (`spec.md` SS4.2).
//!
//! A typed key/value layer over a fast shared store. Values are
//! self-describing JSON so the trait stays storage-agnostic; concrete
//! infrastructure adapters (`infrastructure::shared_cache`) serialize
//! callers' types at the edge.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A namespaced key/value cache with per-entry TTL.
///
/// Implementations MUST fall back transparently to a process-local store
/// when the backing store is unreachable (`spec.md` SS4.2) — callers never
/// see [`CacheError::Unavailable`] from a well-formed implementation; it
/// exists only to let a fallback wrapper detect the condition worth
/// logging.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError>;
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}

/// Convenience helpers for typed access, layered over the raw `Value` trait.
#[async_trait]
pub trait SharedCacheExt: SharedCache {
    async fn get_typed<T: serde::de::DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get(namespace, key).await? {
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set_typed<T: serde::Serialize + Sync>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let v = serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(namespace, key, v, ttl).await
    }
}

impl<T: SharedCache + ?Sized> SharedCacheExt for T {}

// Copyright (c) 2026 Isprava Engineering
//! User and auth-session domain types (`spec.md` SS3).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A staff user, read-only from the relational store (`spec.md` SS3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    /// Always lower-cased; the canonical identity used for ACL checks.
    pub email: String,
    pub display_name: String,
    pub acl_tags: Vec<String>,
    pub active: bool,
    pub admin: bool,
}

impl User {
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.acl_tags.contains(t))
    }
}

/// Sliding-TTL auth session (`spec.md` SS3: "every validation refreshes
/// expires_at").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

pub const AUTH_SESSION_TTL_HOURS: i64 = 24;

impl AuthSession {
    pub fn new(token: String, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            token,
            user_id,
            created_at: now,
            expires_at: now + Duration::hours(AUTH_SESSION_TTL_HOURS),
            last_accessed_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Slide the session's expiry forward from `now`, as every successful
    /// validation must (`spec.md` SS3).
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.expires_at = now + Duration::hours(AUTH_SESSION_TTL_HOURS);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UserRepositoryError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Read-only relational store of staff identity (`spec.md` SS3: "Read-only
/// from relational store"). Also the home for auth-session persistence
/// since both are relational, not append-only JSONB like chat transcripts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError>;
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, UserRepositoryError>;

    async fn create_auth_session(&self, session: &AuthSession) -> Result<(), UserRepositoryError>;
    async fn find_auth_session(
        &self,
        token: &str,
    ) -> Result<Option<AuthSession>, UserRepositoryError>;
    async fn touch_auth_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        last_accessed_at: DateTime<Utc>,
    ) -> Result<(), UserRepositoryError>;
    async fn delete_auth_session(&self, token: &str) -> Result<(), UserRepositoryError>;
}

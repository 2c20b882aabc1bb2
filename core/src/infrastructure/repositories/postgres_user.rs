// Copyright (c) 2026 Isprava Engineering
//! PostgreSQL-backed [`UserRepository`] (`spec.md` SS3): read-only staff
//! identity plus auth-session persistence. Bearer tokens are stored as
//! their SHA-256 digest, never in cleartext, so a leaked database dump
//! doesn't hand out live sessions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::domain::user::{AuthSession, User, UserRepository, UserRepositoryError};

pub struct PostgresUserRepository {
    pool: PgPool,
    breaker: Arc<CircuitBreaker>,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool, breaker: Arc<CircuitBreaker>) -> Self {
        Self { pool, breaker }
    }
}

fn db_err(e: sqlx::Error) -> UserRepositoryError {
    UserRepositoryError::Storage(e.to_string())
}

/// `spec.md` SS4.1: the `database` breaker wraps every Postgres call.
fn circuit_err(e: CircuitError<sqlx::Error>) -> UserRepositoryError {
    match e {
        CircuitError::Open => UserRepositoryError::Storage("database circuit open".to_string()),
        CircuitError::Inner(err) => db_err(err),
    }
}

fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        let email = email.to_lowercase();
        let row = self
            .breaker
            .execute(|| async move {
                sqlx::query(
                    r#"SELECT user_id, email, display_name, acl_tags, active, admin FROM users WHERE email = $1"#,
                )
                .bind(email)
                .fetch_optional(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(row.map(user_from_row))
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, UserRepositoryError> {
        let row = self
            .breaker
            .execute(|| async move {
                sqlx::query(
                    r#"SELECT user_id, email, display_name, acl_tags, active, admin FROM users WHERE user_id = $1"#,
                )
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(row.map(user_from_row))
    }

    async fn create_auth_session(&self, session: &AuthSession) -> Result<(), UserRepositoryError> {
        self.breaker
            .execute(|| async move {
                sqlx::query(
                    r#"
                    INSERT INTO auth_sessions (token, user_id, created_at, expires_at, last_accessed_at)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(hash_token(&session.token))
                .bind(&session.user_id)
                .bind(session.created_at)
                .bind(session.expires_at)
                .bind(session.last_accessed_at)
                .execute(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(())
    }

    async fn find_auth_session(
        &self,
        token: &str,
    ) -> Result<Option<AuthSession>, UserRepositoryError> {
        let hashed = hash_token(token);
        let row = self
            .breaker
            .execute(|| async move {
                sqlx::query(
                    r#"SELECT user_id, created_at, expires_at, last_accessed_at FROM auth_sessions WHERE token = $1"#,
                )
                .bind(hashed)
                .fetch_optional(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(row.map(|row| AuthSession {
            token: token.to_string(),
            user_id: row.get("user_id"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            last_accessed_at: row.get("last_accessed_at"),
        }))
    }

    async fn touch_auth_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        last_accessed_at: DateTime<Utc>,
    ) -> Result<(), UserRepositoryError> {
        let hashed = hash_token(token);
        self.breaker
            .execute(|| async move {
                sqlx::query(
                    r#"UPDATE auth_sessions SET expires_at = $1, last_accessed_at = $2 WHERE token = $3"#,
                )
                .bind(expires_at)
                .bind(last_accessed_at)
                .bind(hashed)
                .execute(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(())
    }

    async fn delete_auth_session(&self, token: &str) -> Result<(), UserRepositoryError> {
        let hashed = hash_token(token);
        self.breaker
            .execute(|| async move {
                sqlx::query(r#"DELETE FROM auth_sessions WHERE token = $1"#)
                    .bind(hashed)
                    .execute(&self.pool)
                    .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(())
    }
}

fn user_from_row(row: sqlx::postgres::PgRow) -> User {
    User {
        user_id: row.get("user_id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        acl_tags: row.get("acl_tags"),
        active: row.get("active"),
        admin: row.get("admin"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_deterministic_and_not_the_raw_token() {
        let a = hash_token("secret-token");
        let b = hash_token("secret-token");
        assert_eq!(a, b);
        assert_ne!(a, "secret-token");
        assert_eq!(a.len(), 64);
    }
}

// Copyright (c) 2026 Isprava Engineering
//! Auth-session lifecycle (`spec.md` SS3, SS6 `/api/auth/*`).
//!
//! The OAuth protocol itself is a spec.md Non-goal ("authentication
//! protocol"); this service only covers what the agent runtime consumes:
//! exchanging an already-validated identity for an opaque bearer token,
//! validating that token with sliding expiry, and invalidating it on
//! logout.

use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use tracing::warn;

use crate::domain::user::{AuthSession, User, UserRepository, UserRepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("not staff or inactive")]
    NotStaffOrInactive,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<UserRepositoryError> for AuthError {
    fn from(err: UserRepositoryError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Exchange a profile email for `{token, user}` (`spec.md` SS6:
    /// "403 if the email is not found in the staff table or is
    /// inactive").
    pub async fn exchange(&self, email: &str) -> Result<(AuthSession, User), AuthError> {
        let email = email.to_lowercase();
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .filter(|u| u.active)
            .ok_or(AuthError::NotStaffOrInactive)?;

        let token = generate_token();
        let session = AuthSession::new(token, user.user_id.clone());
        self.users.create_auth_session(&session).await?;
        Ok((session, user))
    }

    /// Validate `token`, sliding its expiry forward on success (`spec.md`
    /// SS3: "every validation refreshes expires_at").
    pub async fn validate(&self, token: &str) -> Result<User, AuthError> {
        let mut session = self
            .users
            .find_auth_session(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let now = Utc::now();
        if session.is_expired(now) {
            return Err(AuthError::InvalidToken);
        }

        session.touch(now);
        if let Err(err) = self
            .users
            .touch_auth_session(token, session.expires_at, session.last_accessed_at)
            .await
        {
            warn!(error = %err, "failed to persist sliding auth session expiry");
        }

        self.users
            .find_by_id(&session.user_id)
            .await?
            .filter(|u| u.active)
            .ok_or(AuthError::NotStaffOrInactive)
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.users.delete_auth_session(token).await?;
        Ok(())
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

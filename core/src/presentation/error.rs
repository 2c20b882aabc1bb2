// Copyright (c) 2026 Isprava Engineering
//! Uniform HTTP error mapping: every internal error funnels through
//! `ApiError` on its way out of a handler, producing `{"error": "<msg>"}`
//! with the status codes §6/§7 of the external-interfaces contract
//! enumerate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::application::agent_loop::AgentLoopError;
use crate::application::auth_service::AuthError;
use crate::domain::acl::AclStoreError;
use crate::domain::session::SessionStoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid token")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("rate limited")]
    RateLimited,
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if matches!(self, ApiError::RateLimited) {
            // `spec.md` SS8 scenario 6: the 429 itself carries the
            // standard rate-limit header at zero remaining.
            response.headers_mut().insert("RateLimit-Remaining", "0".parse().unwrap());
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotStaffOrInactive => ApiError::Forbidden(err.to_string()),
            AuthError::InvalidToken => ApiError::Unauthorized,
            AuthError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound => ApiError::NotFound("session not found".to_string()),
            SessionStoreError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<AclStoreError> for ApiError {
    fn from(err: AclStoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<AgentLoopError> for ApiError {
    fn from(err: AgentLoopError) -> Self {
        match err {
            AgentLoopError::CircuitOpen => ApiError::Internal("service busy".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

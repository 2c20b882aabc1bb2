// Copyright (c) 2026 Isprava Engineering
//! Chat session and message domain types (`spec.md` SS3, SS4.5).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub title: Option<String>,
    pub vertical: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(user_id: String, title: Option<String>, vertical: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            title,
            vertical,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Truncate `text` to `spec.md`'s 60-char title budget, appending an
/// ellipsis only when truncation actually occurred.
pub fn bootstrap_title(text: &str) -> String {
    let trimmed = text.trim();
    let char_count = trimmed.chars().count();
    if char_count <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{truncated}...")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolUse,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_use_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(session_id: Uuid, content: impl Into<String>) -> Self {
        Self::plain(session_id, Role::User, content)
    }

    pub fn assistant(session_id: Uuid, content: impl Into<String>) -> Self {
        Self::plain(session_id, Role::Assistant, content)
    }

    fn plain(session_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            session_id,
            role,
            content: content.into(),
            tool_name: None,
            tool_input: None,
            tool_use_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn tool_use(
        session_id: Uuid,
        tool_name: impl Into<String>,
        tool_input: Value,
        tool_use_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            role: Role::ToolUse,
            content: String::new(),
            tool_name: Some(tool_name.into()),
            tool_input: Some(tool_input),
            tool_use_id: Some(tool_use_id.into()),
            created_at: Utc::now(),
        }
    }

    pub fn tool_result(
        session_id: Uuid,
        tool_name: impl Into<String>,
        result_text: impl Into<String>,
        tool_use_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            role: Role::ToolResult,
            content: result_text.into(),
            tool_name: Some(tool_name.into()),
            tool_input: None,
            tool_use_id: Some(tool_use_id.into()),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Append-only conversation log and session metadata (`spec.md` SS4.5).
///
/// Implementations MUST be crash-safe between `append_message` calls so
/// that partial transcripts remain valid.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        user_id: &str,
        title: Option<String>,
        vertical: Option<String>,
    ) -> Result<ChatSession, SessionStoreError>;

    /// Returns `None` (not an error) when `session_id` belongs to a
    /// different user, per `spec.md` SS8: "`getSession(id, user_id)`
    /// returns nothing when the session's owner != user_id".
    async fn get_session(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ChatSession>, SessionStoreError>;

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>, SessionStoreError>;

    async fn delete_session(&self, session_id: Uuid, user_id: &str) -> Result<(), SessionStoreError>;

    async fn append_message(&self, message: Message) -> Result<(), SessionStoreError>;

    async fn get_messages(
        &self,
        session_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, SessionStoreError>;

    async fn update_session_title(
        &self,
        session_id: Uuid,
        title: &str,
    ) -> Result<(), SessionStoreError>;
}

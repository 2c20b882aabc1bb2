// Copyright (c) 2026 Isprava Engineering
//! PostgreSQL-backed [`SessionStore`] (`spec.md` SS4.5), grounded on the
//! teacher's `infrastructure/repositories/postgres_agent.rs`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::domain::session::{ChatSession, Message, Role, SessionStore, SessionStoreError};

pub struct PostgresSessionStore {
    pool: PgPool,
    breaker: Arc<CircuitBreaker>,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool, breaker: Arc<CircuitBreaker>) -> Self {
        Self { pool, breaker }
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::ToolUse => "tool_use",
        Role::ToolResult => "tool_result",
    }
}

fn role_from_str(raw: &str) -> Role {
    match raw {
        "assistant" => Role::Assistant,
        "tool_use" => Role::ToolUse,
        "tool_result" => Role::ToolResult,
        _ => Role::User,
    }
}

fn db_err(e: sqlx::Error) -> SessionStoreError {
    SessionStoreError::Storage(e.to_string())
}

/// `spec.md` SS4.1: the `database` breaker wraps every Postgres call.
fn circuit_err(e: CircuitError<sqlx::Error>) -> SessionStoreError {
    match e {
        CircuitError::Open => SessionStoreError::Storage("database circuit open".to_string()),
        CircuitError::Inner(err) => db_err(err),
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn create_session(
        &self,
        user_id: &str,
        title: Option<String>,
        vertical: Option<String>,
    ) -> Result<ChatSession, SessionStoreError> {
        let session = ChatSession::new(user_id.to_string(), title, vertical);

        self.breaker
            .execute(|| async move {
                sqlx::query(
                    r#"
                    INSERT INTO chat_sessions (session_id, user_id, title, vertical, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(session.session_id)
                .bind(&session.user_id)
                .bind(&session.title)
                .bind(&session.vertical)
                .bind(session.created_at)
                .bind(session.updated_at)
                .execute(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(session)
    }

    async fn get_session(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ChatSession>, SessionStoreError> {
        let row = self
            .breaker
            .execute(|| async move {
                sqlx::query(
                    r#"
                    SELECT session_id, user_id, title, vertical, created_at, updated_at
                    FROM chat_sessions
                    WHERE session_id = $1 AND user_id = $2
                    "#,
                )
                .bind(session_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(row.map(|row| ChatSession {
            session_id: row.get("session_id"),
            user_id: row.get("user_id"),
            title: row.get("title"),
            vertical: row.get("vertical"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>, SessionStoreError> {
        let rows = self
            .breaker
            .execute(|| async move {
                sqlx::query(
                    r#"
                    SELECT session_id, user_id, title, vertical, created_at, updated_at
                    FROM chat_sessions
                    WHERE user_id = $1
                    ORDER BY updated_at DESC
                    "#,
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(rows
            .into_iter()
            .map(|row| ChatSession {
                session_id: row.get("session_id"),
                user_id: row.get("user_id"),
                title: row.get("title"),
                vertical: row.get("vertical"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    async fn delete_session(&self, session_id: Uuid, user_id: &str) -> Result<(), SessionStoreError> {
        let result = self
            .breaker
            .execute(|| async move {
                sqlx::query(r#"DELETE FROM chat_sessions WHERE session_id = $1 AND user_id = $2"#)
                    .bind(session_id)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await
            })
            .await
            .map_err(circuit_err)?;

        if result.rows_affected() == 0 {
            return Err(SessionStoreError::NotFound);
        }
        Ok(())
    }

    async fn append_message(&self, message: Message) -> Result<(), SessionStoreError> {
        self.breaker
            .execute(|| async move {
                sqlx::query(
                    r#"
                    INSERT INTO messages (session_id, role, content, tool_name, tool_input, tool_use_id, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(message.session_id)
                .bind(role_to_str(message.role))
                .bind(&message.content)
                .bind(&message.tool_name)
                .bind(&message.tool_input)
                .bind(&message.tool_use_id)
                .bind(message.created_at)
                .execute(&self.pool)
                .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(())
    }

    async fn get_messages(
        &self,
        session_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, SessionStoreError> {
        // Fetch the most recent `limit` rows in descending order, then
        // reverse, so a `LIMIT` clause always keeps the *tail* of the
        // transcript (`spec.md` SS4.6 step 3: "most recent 50 messages").
        let rows = match limit {
            Some(limit) => self
                .breaker
                .execute(|| async move {
                    sqlx::query(
                        r#"
                        SELECT session_id, role, content, tool_name, tool_input, tool_use_id, created_at
                        FROM messages
                        WHERE session_id = $1
                        ORDER BY created_at DESC, id DESC
                        LIMIT $2
                        "#,
                    )
                    .bind(session_id)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
                })
                .await
                .map_err(circuit_err)?,
            None => self
                .breaker
                .execute(|| async move {
                    sqlx::query(
                        r#"
                        SELECT session_id, role, content, tool_name, tool_input, tool_use_id, created_at
                        FROM messages
                        WHERE session_id = $1
                        ORDER BY created_at ASC, id ASC
                        "#,
                    )
                    .bind(session_id)
                    .fetch_all(&self.pool)
                    .await
                })
                .await
                .map_err(circuit_err)?,
        };

        let mut messages: Vec<Message> = rows
            .into_iter()
            .map(|row| Message {
                session_id: row.get("session_id"),
                role: role_from_str(row.get::<String, _>("role").as_str()),
                content: row.get("content"),
                tool_name: row.get("tool_name"),
                tool_input: row.get("tool_input"),
                tool_use_id: row.get("tool_use_id"),
                created_at: row.get("created_at"),
            })
            .collect();

        if limit.is_some() {
            messages.reverse();
        }

        Ok(messages)
    }

    async fn update_session_title(
        &self,
        session_id: Uuid,
        title: &str,
    ) -> Result<(), SessionStoreError> {
        self.breaker
            .execute(|| async move {
                sqlx::query(r#"UPDATE chat_sessions SET title = $1, updated_at = now() WHERE session_id = $2"#)
                    .bind(title)
                    .bind(session_id)
                    .execute(&self.pool)
                    .await
            })
            .await
            .map_err(circuit_err)?;

        Ok(())
    }
}

// Copyright (c) 2026 Isprava Engineering
//! Session CRUD for the presentation layer (`spec.md` SS6: session
//! endpoints). The agent loop talks to `SessionStore` directly; this
//! service exists for the plain CRUD endpoints that don't run the loop.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::session::{ChatSession, Message, SessionStore, SessionStoreError};

pub struct SessionService {
    store: Arc<dyn SessionStore>,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        user_id: &str,
        title: Option<String>,
        vertical: Option<String>,
    ) -> Result<ChatSession, SessionStoreError> {
        self.store.create_session(user_id, title, vertical).await
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<ChatSession>, SessionStoreError> {
        self.store.list_sessions(user_id).await
    }

    /// Returns the session plus its full message history, or `None` when
    /// it doesn't exist or isn't owned by `user_id` (`spec.md` SS8: "returns
    /// nothing when the session's owner != user_id").
    pub async fn get_with_messages(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Option<(ChatSession, Vec<Message>)>, SessionStoreError> {
        let Some(session) = self.store.get_session(session_id, user_id).await? else {
            return Ok(None);
        };
        let messages = self.store.get_messages(session_id, None).await?;
        Ok(Some((session, messages)))
    }

    pub async fn delete(&self, session_id: Uuid, user_id: &str) -> Result<(), SessionStoreError> {
        self.store.delete_session(session_id, user_id).await
    }
}

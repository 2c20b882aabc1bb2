// Copyright (c) 2026 Isprava Engineering
//! Exercises the HTTP surface end-to-end with `tower::ServiceExt::oneshot`
//! against in-memory fakes for every adapter: no Postgres, no Anthropic,
//! no MCP server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agentrelay_core::application::acl_service::AclService;
use agentrelay_core::application::admin_acl_service::AdminAclService;
use agentrelay_core::application::agent_loop::AgentLoopService;
use agentrelay_core::application::auth_service::AuthService;
use agentrelay_core::application::rate_limiter::RateLimiter;
use agentrelay_core::application::session_service::SessionService;
use agentrelay_core::domain::acl::{AclConfig, AclConfigStore, AclStoreError, DefaultPolicy};
use agentrelay_core::domain::llm::{
    GenerationOptions, GenerationResponse, GenerationStream, LlmError, LlmProvider, LlmMessage,
    StopReason, ToolDefinition,
};
use agentrelay_core::domain::mcp::{McpBridge, McpError, ServerId, ServerStatus, ToolDescriptor};
use agentrelay_core::domain::session::{ChatSession, Message, SessionStore, SessionStoreError};
use agentrelay_core::domain::user::{
    AuthSession, User, UserRepository, UserRepositoryError,
};
use agentrelay_core::infrastructure::circuit_breaker::BreakerRegistry;
use agentrelay_core::infrastructure::shared_cache::InMemoryCache;
use agentrelay_core::presentation::api::{router, AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

struct FakeUsers {
    users: Vec<User>,
    sessions: Mutex<HashMap<String, AuthSession>>,
}

#[async_trait]
impl UserRepository for FakeUsers {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        Ok(self.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, UserRepositoryError> {
        Ok(self.users.iter().find(|u| u.user_id == user_id).cloned())
    }

    async fn create_auth_session(&self, session: &AuthSession) -> Result<(), UserRepositoryError> {
        self.sessions.lock().unwrap().insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_auth_session(
        &self,
        token: &str,
    ) -> Result<Option<AuthSession>, UserRepositoryError> {
        Ok(self.sessions.lock().unwrap().get(token).cloned())
    }

    async fn touch_auth_session(
        &self,
        token: &str,
        expires_at: chrono::DateTime<Utc>,
        last_accessed_at: chrono::DateTime<Utc>,
    ) -> Result<(), UserRepositoryError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(token) {
            session.expires_at = expires_at;
            session.last_accessed_at = last_accessed_at;
        }
        Ok(())
    }

    async fn delete_auth_session(&self, token: &str) -> Result<(), UserRepositoryError> {
        self.sessions.lock().unwrap().remove(token);
        Ok(())
    }
}

#[derive(Default)]
struct FakeSessions {
    sessions: Mutex<HashMap<Uuid, ChatSession>>,
    messages: Mutex<HashMap<Uuid, Vec<Message>>>,
}

#[async_trait]
impl SessionStore for FakeSessions {
    async fn create_session(
        &self,
        user_id: &str,
        title: Option<String>,
        vertical: Option<String>,
    ) -> Result<ChatSession, SessionStoreError> {
        let session = ChatSession::new(user_id.to_string(), title, vertical);
        self.sessions.lock().unwrap().insert(session.session_id, session.clone());
        Ok(session)
    }

    async fn get_session(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ChatSession>, SessionStoreError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .filter(|s| s.user_id == user_id)
            .cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>, SessionStoreError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_session(&self, session_id: Uuid, user_id: &str) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.get(&session_id).is_some_and(|s| s.user_id == user_id) {
            sessions.remove(&session_id);
            self.messages.lock().unwrap().remove(&session_id);
        }
        Ok(())
    }

    async fn append_message(&self, message: Message) -> Result<(), SessionStoreError> {
        self.messages.lock().unwrap().entry(message.session_id).or_default().push(message);
        Ok(())
    }

    async fn get_messages(
        &self,
        session_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, SessionStoreError> {
        let messages = self.messages.lock().unwrap().get(&session_id).cloned().unwrap_or_default();
        Ok(match limit {
            Some(n) if messages.len() > n => messages[messages.len() - n..].to_vec(),
            _ => messages,
        })
    }

    async fn update_session_title(&self, session_id: Uuid, title: &str) -> Result<(), SessionStoreError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
            session.title = Some(title.to_string());
        }
        Ok(())
    }
}

struct FakeAclStore(Mutex<AclConfig>);

#[async_trait]
impl AclConfigStore for FakeAclStore {
    async fn load(&self) -> Result<AclConfig, AclStoreError> {
        Ok(self.0.lock().unwrap().clone())
    }

    async fn save(&self, config: &AclConfig) -> Result<(), AclStoreError> {
        *self.0.lock().unwrap() = config.clone();
        Ok(())
    }
}

struct FakeBridge;

#[async_trait]
impl McpBridge for FakeBridge {
    async fn call_tool(
        &self,
        _tool_name: &str,
        _args: Value,
        _user_email: Option<&str>,
    ) -> Result<String, McpError> {
        Ok("{}".to_string())
    }

    async fn get_all_tools(&self) -> Vec<ToolDescriptor> {
        vec![]
    }

    async fn get_tools_for_user(&self, _user_email: &str) -> Vec<ToolDescriptor> {
        vec![]
    }

    fn server_statuses(&self) -> Vec<(ServerId, ServerStatus)> {
        vec![(ServerId("helpdesk".to_string()), ServerStatus::Connected)]
    }
}

/// Always ends the turn on the first call with a fixed reply, so the
/// agent loop never needs a tool round trip.
struct FakeLlm;

#[async_trait]
impl LlmProvider for FakeLlm {
    async fn generate(
        &self,
        _messages: &[LlmMessage],
        _tools: &[ToolDefinition],
        _options: &GenerationOptions,
    ) -> Result<GenerationResponse, LlmError> {
        Ok(GenerationResponse {
            content: vec![agentrelay_core::domain::llm::ContentBlock::Text {
                text: "hello from the fake model".to_string(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Default::default(),
        })
    }

    async fn generate_stream(
        &self,
        _messages: &[LlmMessage],
        _tools: &[ToolDefinition],
        _options: &GenerationOptions,
    ) -> Result<GenerationStream, LlmError> {
        Err(LlmError::Provider("streaming not exercised in this test".to_string()))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

fn test_user() -> User {
    User {
        user_id: "u1".to_string(),
        email: "person@example.com".to_string(),
        display_name: "Person".to_string(),
        acl_tags: vec!["sales_admin".to_string()],
        active: true,
        admin: false,
    }
}

async fn build_app() -> (axum::Router, String) {
    let user = test_user();
    let users: Arc<dyn UserRepository> =
        Arc::new(FakeUsers { users: vec![user.clone()], sessions: Mutex::new(HashMap::new()) });
    let sessions_store: Arc<dyn SessionStore> = Arc::new(FakeSessions::default());
    let acl_store: Arc<dyn AclConfigStore> =
        Arc::new(FakeAclStore(Mutex::new(AclConfig { default_policy: DefaultPolicy::Open, ..Default::default() })));
    let cache = Arc::new(InMemoryCache::new());
    let bridge: Arc<dyn McpBridge> = Arc::new(FakeBridge);
    let llm: Arc<dyn LlmProvider> = Arc::new(FakeLlm);
    let breakers = Arc::new(BreakerRegistry::new());

    let acl_service = Arc::new(AclService::new(Arc::clone(&acl_store), Arc::clone(&users), cache.clone()));
    let admin_acl_service = Arc::new(AdminAclService::new(acl_store, cache.clone(), Arc::clone(&bridge)));
    let auth_service = Arc::new(AuthService::new(Arc::clone(&users)));
    let session_service = Arc::new(SessionService::new(Arc::clone(&sessions_store)));
    let rate_limiter = Arc::new(RateLimiter::new());

    let agent_loop = Arc::new(AgentLoopService::new(
        sessions_store,
        llm,
        Arc::clone(&bridge),
        Arc::clone(&acl_service),
        cache,
        breakers.claude_api(),
        vec!["Mumbai".to_string()],
    ));

    let state = AppState {
        auth: auth_service,
        sessions: session_service,
        agent_loop,
        acl: acl_service,
        admin_acl: admin_acl_service,
        rate_limiter,
        breakers,
        bridge,
    };

    let app = router(state);
    (app, user.email)
}

async fn bearer_token(app: &axum::Router, email: &str) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/google")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "email": email }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    value["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn unauthenticated_request_is_rejected() {
    let (app, _email) = build_app().await;
    let response = app
        .oneshot(Request::builder().uri("/api/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_email_is_forbidden() {
    let (app, _email) = build_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/google")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "email": "nobody@example.com" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn full_session_and_chat_round_trip() {
    let (app, email) = build_app().await;
    let token = bearer_token(&app, &email).await;

    let create_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sessions")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "title": "Q3 funnel", "vertical": "residential" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create_response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(create_response.into_body(), usize::MAX).await.unwrap();
    let session: Value = serde_json::from_slice(&body).unwrap();
    let session_id = session["session_id"].as_str().unwrap();

    let chat_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/sessions/{session_id}/messages"))
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "message": "how's the funnel looking?" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(chat_response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(chat_response.into_body(), usize::MAX).await.unwrap();
    let result: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(result["assistantText"], json!("hello from the fake model"));

    let list_response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/sessions")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);
}

#[tokio::test]
async fn non_admin_cannot_reach_admin_acl_routes() {
    let (app, email) = build_app().await;
    let token = bearer_token(&app, &email).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/admin/acl/global")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_reports_ok_with_a_closed_breaker() {
    let (app, _email) = build_app().await;
    let response =
        app.oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], json!("ok"));
}

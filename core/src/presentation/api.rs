// Copyright (c) 2026 Isprava Engineering
//! HTTP/SSE surface (§6 "External interfaces"): auth, session CRUD, the
//! two chat entry points, admin ACL CRUD, and `/api/health`.
//!
//! No business logic lives here — every handler is a thin translation
//! from HTTP to an application service call plus [`ApiError`] mapping.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{async_trait, Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use crate::application::acl_service::AclService;
use crate::application::admin_acl_service::AdminAclService;
use crate::application::agent_loop::{AgentLoopService, ChatResult};
use crate::application::auth_service::AuthService;
use crate::application::rate_limiter::{RateLimitOutcome, RateLimiter};
use crate::application::session_service::SessionService;
use crate::domain::acl::DefaultPolicy;
use crate::domain::circuit_breaker::CircuitState;
use crate::domain::mcp::McpBridge;
use crate::domain::session::{ChatSession, Message};
use crate::domain::user::User;
use crate::infrastructure::circuit_breaker::BreakerRegistry;
use crate::presentation::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub sessions: Arc<SessionService>,
    pub agent_loop: Arc<AgentLoopService>,
    pub acl: Arc<AclService>,
    pub admin_acl: Arc<AdminAclService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub breakers: Arc<BreakerRegistry>,
    pub bridge: Arc<dyn McpBridge>,
}

/// Builds the full router: the public auth endpoint, the bearer-gated
/// session/chat/admin surface, and `/api/health`, plus the overall
/// rate-limit middleware. Tracing, catch-panic and `/metrics` are layered
/// on by the binary, since they wrap the whole server rather than this
/// API surface specifically.
pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/api/auth/google", post(auth_google));

    let authenticated = Router::new()
        .route("/api/auth/me", get(auth_me))
        .route("/api/auth/logout", post(auth_logout))
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/messages", post(send_message))
        .route("/api/sessions/:id/messages/stream", get(stream_message))
        .route("/api/admin/acl/tools", get(admin_list_tool_acls))
        .route(
            "/api/admin/acl/tools/:name",
            put(admin_upsert_tool_acl).delete(admin_delete_tool_acl),
        )
        .route("/api/admin/acl/global", get(admin_get_global).put(admin_put_global))
        .route("/api/admin/acl/available-acls", get(admin_available_acls))
        .route("/api/admin/acl/available-tools", get(admin_available_tools));

    public
        .merge(authenticated)
        .route("/api/health", get(health))
        .layer(middleware::from_fn_with_state(state.clone(), overall_rate_limit))
        .with_state(state)
}

/// §5 "Rate limiting": keyed by caller token when authenticated, else by
/// client IP. Applied to every route; the two chat endpoints layer a
/// second, stricter check on top inside their own handlers.
async fn overall_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let key = rate_limit_key(&headers, addr);
    match state.rate_limiter.check_overall(&key) {
        RateLimitOutcome::Allowed { remaining } => {
            let mut response = next.run(req).await;
            if let Ok(value) = remaining.to_string().parse() {
                response.headers_mut().insert("RateLimit-Remaining", value);
            }
            response
        }
        RateLimitOutcome::Limited => ApiError::RateLimited.into_response(),
    }
}

fn rate_limit_key(headers: &HeaderMap, addr: SocketAddr) -> String {
    bearer_token(headers)
        .map(|token| format!("token:{token}"))
        .unwrap_or_else(|| format!("ip:{}", addr.ip()))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Extracts and validates the bearer token, resolving the authenticated
/// [`User`]. 401 on anything else (§6: "401 missing/invalid token").
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let user = state.auth.validate(&token).await?;
        Ok(AuthUser(user))
    }
}

/// Same as [`AuthUser`] but 403s when the resolved user isn't an admin
/// (§6's admin ACL CRUD surface).
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.admin {
            return Err(ApiError::Forbidden("admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

#[derive(Deserialize)]
struct GoogleAuthRequest {
    email: String,
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    user: User,
}

async fn auth_google(
    State(state): State<AppState>,
    Json(body): Json<GoogleAuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (session, user) = state.auth.exchange(&body.email).await?;
    Ok(Json(AuthResponse { token: session.token, user }))
}

#[derive(Serialize)]
struct MeResponse {
    user: User,
    admin: bool,
}

async fn auth_me(AuthUser(user): AuthUser) -> Json<MeResponse> {
    let admin = user.admin;
    Json(MeResponse { user, admin })
}

async fn auth_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    _user: AuthUser,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    state.auth.logout(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    title: Option<String>,
    vertical: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<ChatSession>, ApiError> {
    let session = state.sessions.create(&user.user_id, body.title, body.vertical).await?;
    Ok(Json(session))
}

async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    let sessions = state.sessions.list(&user.user_id).await?;
    Ok(Json(sessions))
}

#[derive(Serialize)]
struct SessionWithMessages {
    #[serde(flatten)]
    session: ChatSession,
    messages: Vec<Message>,
}

async fn get_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionWithMessages>, ApiError> {
    let (session, messages) = state
        .sessions
        .get_with_messages(id, &user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;
    Ok(Json(SessionWithMessages { session, messages }))
}

async fn delete_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.sessions.delete(id, &user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SendMessageRequest {
    message: String,
}

/// §6's stricter chat-only rate limit, layered on top of the global one.
fn check_chat_quota(state: &AppState, key: &str) -> Result<(), ApiError> {
    match state.rate_limiter.check_chat(key) {
        RateLimitOutcome::Allowed { .. } => Ok(()),
        RateLimitOutcome::Limited => Err(ApiError::RateLimited),
    }
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<ChatResult>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    check_chat_quota(&state, &user.email)?;

    let (session, _messages) = state
        .sessions
        .get_with_messages(id, &user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;

    let result = state
        .agent_loop
        .chat(id, &body.message, Some(&user.email), session.vertical.as_deref())
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct StreamQuery {
    message: String,
}

async fn stream_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    if query.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    check_chat_quota(&state, &user.email)?;

    let (session, _messages) = state
        .sessions
        .get_with_messages(id, &user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;

    let events =
        state
            .agent_loop
            .chat_stream(id, query.message, Some(user.email.clone()), session.vertical.clone());

    let stream = events.map(|event| -> Result<Event, Infallible> { Ok(Event::default().data(event.to_sse_data())) });
    let boxed: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> = Box::pin(stream);

    let mut response = Sse::new(boxed).keep_alive(KeepAlive::default()).into_response();
    let headers = response.headers_mut();
    headers.insert("Cache-Control", "no-cache".parse().unwrap());
    headers.insert("X-Accel-Buffering", "no".parse().unwrap());
    Ok(response)
}

#[derive(Serialize)]
struct ToolAclEntry {
    tool_name: String,
    required_tags: Vec<String>,
}

async fn admin_list_tool_acls(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<ToolAclEntry>>, ApiError> {
    let config = state.admin_acl.get_effective_config().await?;
    let entries = config
        .tool_acls
        .into_iter()
        .map(|(tool_name, required_tags)| ToolAclEntry { tool_name, required_tags })
        .collect();
    Ok(Json(entries))
}

#[derive(Deserialize)]
struct UpsertToolAclRequest {
    required_tags: Vec<String>,
}

async fn admin_upsert_tool_acl(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(name): Path<String>,
    Json(body): Json<UpsertToolAclRequest>,
) -> Result<Json<crate::domain::acl::AclConfig>, ApiError> {
    let config = state.admin_acl.upsert_tool_acl(&name, body.required_tags).await?;
    Ok(Json(config))
}

async fn admin_delete_tool_acl(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(name): Path<String>,
) -> Result<Json<crate::domain::acl::AclConfig>, ApiError> {
    let config = state.admin_acl.delete_tool_acl(&name).await?;
    Ok(Json(config))
}

async fn admin_get_global(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<crate::domain::acl::AclConfig>, ApiError> {
    let config = state.admin_acl.get_effective_config().await?;
    Ok(Json(config))
}

#[derive(Deserialize)]
struct GlobalAclRequest {
    default_policy: DefaultPolicy,
    public_tools: Vec<String>,
    disabled_tools: Vec<String>,
    superuser_acls: Vec<String>,
}

async fn admin_put_global(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<GlobalAclRequest>,
) -> Result<Json<crate::domain::acl::AclConfig>, ApiError> {
    let config = state
        .admin_acl
        .update_global_config(body.default_policy, body.public_tools, body.disabled_tools, body.superuser_acls)
        .await?;
    Ok(Json(config))
}

async fn admin_available_acls(_admin: AdminUser, State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.admin_acl.available_acls())
}

async fn admin_available_tools(_admin: AdminUser, State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.admin_acl.available_tools().await)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    circuits: HealthCircuits,
}

#[derive(Serialize)]
struct HealthCircuits {
    claude: crate::domain::circuit_breaker::CircuitSnapshot,
    mcp: serde_json::Value,
}

/// §6 `/api/health`: `{status, circuits: {claude, mcp: {...}}}`. `status`
/// degrades when every breaker has tripped open, since a handful of open
/// MCP breakers alongside a healthy LLM path is still serviceable.
///
/// `circuits.mcp.<id>` reports the breaker's own state string
/// (`"closed"`/`"open"`/`"half_open"`) rather than `server_statuses()`'s
/// connection-lifecycle labels — §8 scenario 4 requires the literal value
/// `"open"` once a server's breaker trips, which only the breaker snapshot
/// can produce.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshots = state.breakers.snapshots();

    let claude = state.breakers.claude_api().get_state();
    let mcp: serde_json::Map<String, serde_json::Value> = snapshots
        .iter()
        .filter_map(|s| s.name.strip_prefix("mcp-").map(|id| (id.to_string(), json!(s.state))))
        .collect();

    let all_open = snapshots.iter().all(|s| s.state != CircuitState::Closed);

    Json(HealthResponse {
        status: if all_open { "degraded" } else { "ok" },
        circuits: HealthCircuits { claude, mcp: serde_json::Value::Object(mcp) },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_key_prefers_bearer_token_over_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(rate_limit_key(&headers, addr), "token:abc123");
    }

    #[test]
    fn rate_limit_key_falls_back_to_ip_when_unauthenticated() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "10.0.0.5:1234".parse().unwrap();
        assert_eq!(rate_limit_key(&headers, addr), "ip:10.0.0.5");
    }
}

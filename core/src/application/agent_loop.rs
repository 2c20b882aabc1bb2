// Copyright (c) 2026 Isprava Engineering
//! The agent loop (`spec.md` SS4.6) — the bounded fixed-point alternation
//! of LLM calls and tool executions that both chat entry points share.
//!
//! Grounded on the teacher's `application::execution::StandardExecutionService`
//! / `ExecutionMonitor` shape: a service that drives a bounded round loop
//! and emits lifecycle callbacks, generalized here from "agent instance
//! supervision" to "LLM/tool round supervision". Batch mode drains the
//! same round logic to a single result; streaming mode forwards
//! `AgentEvent`s to a channel as they happen (`spec.md` SS9: "Streaming is
//! a lazy sequence generator; batch mode drains it into a single
//! result").

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::acl_service::AclService;
use crate::application::text_sanitizer::sanitize;
use crate::application::ttl_classifier::classify_ttl;
use crate::domain::cache::{SharedCache, SharedCacheExt};
use crate::domain::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::domain::events::AgentEvent;
use crate::domain::llm::{
    ContentBlock, GenerationOptions, GenerationResponse, LlmError, LlmMessage, LlmProvider,
    MessageRole, StopReason, StreamEvent, ToolDefinition,
};
use crate::domain::mcp::{preprocess_arguments, McpBridge};
use crate::domain::session::{bootstrap_title, Message, Role, SessionStore, SessionStoreError};

/// `spec.md` SS4.6: "Main loop, bounded by MAX_ROUNDS = 20."
pub const MAX_ROUNDS: u32 = 20;

/// `spec.md` SS4.6 step 3 / SS9 Open Question (a): "most recent 50
/// messages", taken literally.
pub const MESSAGE_WINDOW: usize = 50;

const RESPONSE_CACHE_NAMESPACE: &str = "response";

#[derive(Debug, thiserror::Error)]
pub enum AgentLoopError {
    #[error("session store error: {0}")]
    SessionStore(#[from] SessionStoreError),
    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("circuit open")]
    CircuitOpen,
}

impl<E: Into<AgentLoopError>> From<CircuitError<E>> for AgentLoopError {
    fn from(err: CircuitError<E>) -> Self {
        match err {
            CircuitError::Open => AgentLoopError::CircuitOpen,
            CircuitError::Inner(inner) => inner.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub input: Value,
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    #[serde(rename = "assistantText")]
    pub assistant_text: String,
    #[serde(rename = "toolCalls")]
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Cache payload for a previously-completed run (`spec.md` SS3
/// `CachedResponse`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    assistant_text: String,
    tool_calls: Vec<ToolCallRecord>,
}

pub struct AgentLoopService {
    sessions: Arc<dyn SessionStore>,
    llm: Arc<dyn LlmProvider>,
    bridge: Arc<dyn McpBridge>,
    acl: Arc<AclService>,
    cache: Arc<dyn SharedCache>,
    claude_breaker: Arc<CircuitBreaker>,
    canonical_locations: Vec<String>,
}

impl AgentLoopService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        llm: Arc<dyn LlmProvider>,
        bridge: Arc<dyn McpBridge>,
        acl: Arc<AclService>,
        cache: Arc<dyn SharedCache>,
        claude_breaker: Arc<CircuitBreaker>,
        canonical_locations: Vec<String>,
    ) -> Self {
        Self { sessions, llm, bridge, acl, cache, claude_breaker, canonical_locations }
    }

    /// `spec.md` SS4.6 "Batch".
    pub async fn chat(
        &self,
        session_id: Uuid,
        user_message: &str,
        user_email: Option<&str>,
        vertical: Option<&str>,
    ) -> Result<ChatResult, AgentLoopError> {
        let mut events = EventSink::none();
        self.run(session_id, user_message, user_email, vertical, &mut events).await
    }

    /// `spec.md` SS4.6 "Streaming". Runs the full loop on a detached task
    /// so a disconnected client never truncates persistence (`spec.md`
    /// SS5 "Cancellation"); returns a stream the handler may stop polling
    /// at any time.
    pub fn chat_stream(
        self: &Arc<Self>,
        session_id: Uuid,
        user_message: String,
        user_email: Option<String>,
        vertical: Option<String>,
    ) -> UnboundedReceiverStream<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let mut events = EventSink::streaming(tx);
            let result = service
                .run(
                    session_id,
                    &user_message,
                    user_email.as_deref(),
                    vertical.as_deref(),
                    &mut events,
                )
                .await;

            match result {
                Ok(chat_result) => events.emit(AgentEvent::Done { assistant_text: chat_result.assistant_text }),
                Err(err) => events.emit(AgentEvent::Error { message: user_facing_message(&err) }),
            }
        });

        UnboundedReceiverStream::new(rx)
    }

    async fn run(
        &self,
        session_id: Uuid,
        user_message: &str,
        user_email: Option<&str>,
        vertical: Option<&str>,
        events: &mut EventSink,
    ) -> Result<ChatResult, AgentLoopError> {
        let cache_key = normalize_cache_key(user_message, vertical);

        if let Ok(Some(cached)) =
            self.cache.get_typed::<CachedResponse>(RESPONSE_CACHE_NAMESPACE, &cache_key).await
        {
            return self.serve_cached(session_id, user_message, cached, events).await;
        }

        let existing = self.sessions.get_messages(session_id, None).await?;
        let is_first_turn = existing.is_empty();

        self.sessions.append_message(Message::user(session_id, user_message)).await?;

        let tool_catalog = self.tool_definitions().await;

        let mut final_text = String::new();
        let mut tool_calls = Vec::new();
        let mut invoked_count = 0usize;

        for round in 0..MAX_ROUNDS {
            debug!(round, session_id = %session_id, "agent loop round");

            let window = self.sessions.get_messages(session_id, Some(MESSAGE_WINDOW)).await?;
            let messages = reconstruct_messages(&window);

            let response = self.generate_round(&messages, &tool_catalog, events).await?;
            let sanitized_text = sanitize(&response.text());

            if !sanitized_text.is_empty() {
                self.sessions.append_message(Message::assistant(session_id, sanitized_text.clone())).await?;
            }

            let tool_uses: Vec<(String, String, Value)> = response
                .tool_uses()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            for (tool_use_id, tool_name, input) in &tool_uses {
                self.sessions
                    .append_message(Message::tool_use(session_id, tool_name, input.clone(), tool_use_id))
                    .await?;
            }

            if matches!(response.stop_reason, StopReason::EndTurn) || tool_uses.is_empty() {
                final_text = sanitized_text;
                break;
            }

            for (tool_use_id, tool_name, input) in tool_uses {
                events.emit(AgentEvent::ToolStart { name: tool_name.clone(), id: tool_use_id.clone() });

                let decision = self.acl.check(&tool_name, user_email).await;
                let result_text = if !decision.allowed {
                    decision.reason
                } else {
                    let args =
                        preprocess_arguments(&tool_name, input.clone(), &self.canonical_locations, vertical);
                    invoked_count += 1;
                    match self.bridge.call_tool(&tool_name, args, user_email).await {
                        Ok(text) => {
                            crate::metrics::record_tool_invocation(&tool_name, true);
                            text
                        }
                        Err(err) => {
                            crate::metrics::record_tool_invocation(&tool_name, false);
                            err.as_tool_result_text()
                        }
                    }
                };

                events.emit(AgentEvent::ToolEnd { name: tool_name.clone(), id: tool_use_id.clone() });

                self.sessions
                    .append_message(Message::tool_result(
                        session_id,
                        &tool_name,
                        &result_text,
                        &tool_use_id,
                    ))
                    .await?;

                tool_calls.push(ToolCallRecord { tool_name, input, result: result_text });
            }

            final_text = sanitized_text;

            if round + 1 == MAX_ROUNDS {
                warn!(session_id = %session_id, "agent loop exhausted MAX_ROUNDS");
            }
        }

        if is_first_turn {
            let title = bootstrap_title(user_message);
            if let Err(err) = self.sessions.update_session_title(session_id, &title).await {
                warn!(error = %err, session_id = %session_id, "failed to bootstrap session title");
            }
        }

        if !final_text.is_empty() && invoked_count > 0 {
            let ttl = classify_ttl(user_message, Utc::now());
            let payload = CachedResponse { assistant_text: final_text.clone(), tool_calls: tool_calls.clone() };
            if let Err(err) =
                self.cache.set_typed(RESPONSE_CACHE_NAMESPACE, &cache_key, &payload, ttl).await
            {
                warn!(error = %err, "failed to write response cache entry");
            }
        }

        Ok(ChatResult { assistant_text: final_text, tool_calls })
    }

    async fn serve_cached(
        &self,
        session_id: Uuid,
        user_message: &str,
        cached: CachedResponse,
        events: &mut EventSink,
    ) -> Result<ChatResult, AgentLoopError> {
        let existing = self.sessions.get_messages(session_id, None).await?;
        let is_first_turn = existing.is_empty();

        self.sessions.append_message(Message::user(session_id, user_message)).await?;
        self.sessions
            .append_message(Message::assistant(session_id, cached.assistant_text.clone()))
            .await?;

        if is_first_turn {
            let title = bootstrap_title(user_message);
            if let Err(err) = self.sessions.update_session_title(session_id, &title).await {
                warn!(error = %err, session_id = %session_id, "failed to bootstrap session title on cache hit");
            }
        }

        events.emit(AgentEvent::TextDelta { text: cached.assistant_text.clone() });

        Ok(ChatResult { assistant_text: cached.assistant_text, tool_calls: cached.tool_calls })
    }

    async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.bridge
            .get_all_tools()
            .await
            .into_iter()
            .map(|t| ToolDefinition { name: t.name, description: t.description, input_schema: t.input_schema })
            .collect()
    }

    /// Execute one LLM call under the `claude-api` breaker, batching or
    /// streaming per whether `events` has a live sink.
    async fn generate_round(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        events: &mut EventSink,
    ) -> Result<GenerationResponse, AgentLoopError> {
        let options = GenerationOptions::default();

        if events.is_streaming() {
            let llm = Arc::clone(&self.llm);
            let messages = messages.to_vec();
            let tools = tools.to_vec();
            let stream = self
                .claude_breaker
                .execute(|| async move { llm.generate_stream(&messages, &tools, &options).await })
                .await?;
            let result = consume_stream(stream, events).await;
            crate::metrics::record_llm_call(result.is_ok());
            Ok(result?)
        } else {
            let llm = Arc::clone(&self.llm);
            let messages = messages.to_vec();
            let tools = tools.to_vec();
            let response = self
                .claude_breaker
                .execute(|| async move { llm.generate(&messages, &tools, &options).await })
                .await;
            crate::metrics::record_llm_call(response.is_ok());
            Ok(response?)
        }
    }
}

/// Accumulate a token-delta stream into a full [`GenerationResponse`],
/// forwarding text fragments live (`spec.md` SS4.6 "Emits a `text_delta`
/// event per text fragment as it arrives").
async fn consume_stream(
    mut stream: crate::domain::llm::GenerationStream,
    events: &mut EventSink,
) -> Result<GenerationResponse, LlmError> {
    let mut text = String::new();
    let mut tool_blocks: Vec<(String, String, String)> = Vec::new();
    let mut stop_reason = StopReason::EndTurn;
    let mut usage = Default::default();

    while let Some(item) = stream.next().await {
        match item? {
            StreamEvent::TextDelta(delta) => {
                events.emit(AgentEvent::TextDelta { text: delta.clone() });
                text.push_str(&delta);
            }
            StreamEvent::ToolUseStart { id, name } => {
                tool_blocks.push((id, name, String::new()));
            }
            StreamEvent::ToolUseInputDelta { id, partial_json } => {
                if let Some(block) = tool_blocks.iter_mut().find(|(bid, _, _)| *bid == id) {
                    block.2.push_str(&partial_json);
                }
            }
            StreamEvent::ToolUseEnd { .. } => {}
            StreamEvent::MessageDone { stop_reason: reason, usage: final_usage } => {
                stop_reason = reason;
                usage = final_usage;
            }
        }
    }

    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(ContentBlock::Text { text });
    }
    for (id, name, json) in tool_blocks {
        let input = serde_json::from_str(&json).unwrap_or(Value::Object(Default::default()));
        content.push(ContentBlock::ToolUse { id, name, input });
    }

    Ok(GenerationResponse { content, stop_reason, usage })
}

/// `spec.md` SS4.6 step 1: "normalize the user message (trim, lowercase,
/// collapse whitespace) and concatenate `\":\" + vertical`."
fn normalize_cache_key(user_message: &str, vertical: Option<&str>) -> String {
    let collapsed = user_message.trim().to_lowercase();
    let collapsed = collapsed.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{}:{}", collapsed, vertical.unwrap_or(""))
}

fn side_of(role: Role) -> MessageRole {
    match role {
        Role::User | Role::ToolResult => MessageRole::User,
        Role::Assistant | Role::ToolUse => MessageRole::Assistant,
    }
}

/// `spec.md` SS4.6 step 4: fold the persisted log into alternating
/// user/assistant turns.
fn reconstruct_messages(messages: &[Message]) -> Vec<LlmMessage> {
    let mut turns: Vec<LlmMessage> = Vec::new();

    for msg in messages {
        let side = side_of(msg.role);
        let block = match msg.role {
            Role::User | Role::Assistant => ContentBlock::Text { text: msg.content.clone() },
            Role::ToolUse => ContentBlock::ToolUse {
                id: msg.tool_use_id.clone().unwrap_or_default(),
                name: msg.tool_name.clone().unwrap_or_default(),
                input: msg.tool_input.clone().unwrap_or(Value::Null),
            },
            Role::ToolResult => ContentBlock::ToolResult {
                tool_use_id: msg.tool_use_id.clone().unwrap_or_default(),
                content: msg.content.clone(),
            },
        };

        match turns.last_mut() {
            Some(last) if last.role == side => last.content.push(block),
            _ => turns.push(LlmMessage { role: side, content: vec![block] }),
        }
    }

    turns
}

fn user_facing_message(err: &AgentLoopError) -> String {
    match err {
        AgentLoopError::Llm(llm_err) => llm_err.user_message().to_string(),
        AgentLoopError::CircuitOpen => "service busy".to_string(),
        AgentLoopError::SessionStore(_) => "something went wrong processing your request".to_string(),
    }
}

/// Wraps the optional streaming sink so batch and streaming paths share
/// one code path through [`AgentLoopService::run`].
struct EventSink(Option<mpsc::UnboundedSender<AgentEvent>>);

impl EventSink {
    fn none() -> Self {
        Self(None)
    }

    fn streaming(tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self(Some(tx))
    }

    fn is_streaming(&self) -> bool {
        self.0.is_some()
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::Role;
    use chrono::Utc;
    use serde_json::json;

    fn msg(role: Role, content: &str) -> Message {
        Message {
            session_id: Uuid::nil(),
            role,
            content: content.to_string(),
            tool_name: None,
            tool_input: None,
            tool_use_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn normalize_cache_key_trims_lowercases_and_collapses_whitespace() {
        let key = normalize_cache_key("  How Many   Leads  Last Month?  ", Some("isprava"));
        assert_eq!(key, "how many leads last month?:isprava");
    }

    #[test]
    fn normalize_cache_key_is_idempotent() {
        let once = normalize_cache_key("  Hello   World  ", Some("x"));
        let twice = normalize_cache_key(&once, Some(""));
        // normalizing an already-normalized key changes only the trailing
        // vertical segment, confirming the text portion is a fixed point.
        assert!(twice.starts_with("hello world:x"));
    }

    #[test]
    fn reconstruct_folds_contiguous_tool_blocks_into_one_turn() {
        let mut tool_use = msg(Role::ToolUse, "");
        tool_use.tool_name = Some("ping".into());
        tool_use.tool_input = Some(json!({}));
        tool_use.tool_use_id = Some("t1".into());

        let mut tool_result = msg(Role::ToolResult, "pong");
        tool_result.tool_name = Some("ping".into());
        tool_result.tool_use_id = Some("t1".into());

        let messages = vec![msg(Role::User, "hi"), tool_use, msg(Role::Assistant, "done"), tool_result];

        let turns = reconstruct_messages(&messages);
        // user "hi" -> assistant [tool_use, text "done"] -> user [tool_result]
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, MessageRole::User);
        assert_eq!(turns[1].role, MessageRole::Assistant);
        assert_eq!(turns[1].content.len(), 2);
        assert_eq!(turns[2].role, MessageRole::User);
    }

    #[test]
    fn reconstruct_empty_log_yields_no_turns() {
        assert!(reconstruct_messages(&[]).is_empty());
    }
}

// Copyright (c) 2026 Isprava Engineering
//! LLM provider anti-corruption layer (`spec.md` SS3, SS4.6).
//!
//! Isolates the agent loop from the concrete vendor API. Implementations
//! live under `infrastructure::llm`. A provider exposes both a batch
//! `generate` and a token-delta `generate_stream`, since `spec.md` SS4.6
//! requires both chat entry points to share one state machine.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool descriptor passed to the LLM on every call — ACL is enforced at
/// invocation time, never by hiding tools from the catalog (`spec.md`
/// SS4.6 step a: "passing the full tool catalog").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

/// One turn of the LLM-facing transcript, folded from the persisted log
/// per `spec.md` SS4.6 step 4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl LlmMessage {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self { role: MessageRole::User, content }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self { role: MessageRole::Assistant, content }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { max_tokens: 4096, temperature: None }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

impl GenerationResponse {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }
}

/// A fragment of a token-delta response, consumed by the agent loop to
/// assemble [`GenerationResponse`] and emit `domain::events::AgentEvent`s.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolUseStart { id: String, name: String },
    ToolUseInputDelta { id: String, partial_json: String },
    ToolUseEnd { id: String },
    MessageDone { stop_reason: StopReason, usage: TokenUsage },
}

pub type GenerationStream =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("rate limit exceeded")]
    RateLimit,
    #[error("overloaded")]
    Overloaded,
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl LlmError {
    /// Transient errors are never counted against the `claude-api` circuit
    /// breaker (`spec.md` SS7: "Not counted against the breaker").
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::RateLimit | LlmError::Overloaded)
    }

    /// User-facing message for the SSE/JSON `error` event (`spec.md`
    /// SS4.6: "overloaded -> 'service busy'; rate-limit -> 'too many
    /// requests'; otherwise a generic failure").
    pub fn user_message(&self) -> &'static str {
        match self {
            LlmError::Overloaded => "service busy",
            LlmError::RateLimit => "too many requests",
            _ => "something went wrong processing your request",
        }
    }
}

/// Anti-corruption layer isolating the agent loop from the vendor API.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LlmError>;

    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<GenerationStream, LlmError>;

    async fn health_check(&self) -> Result<(), LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_joins_only_text_blocks_in_order() {
        let response = GenerationResponse {
            content: vec![
                ContentBlock::Text { text: "hello ".into() },
                ContentBlock::ToolUse { id: "t1".into(), name: "x".into(), input: Value::Null },
                ContentBlock::Text { text: "world".into() },
            ],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        };
        assert_eq!(response.text(), "hello world");
    }

    #[test]
    fn tool_uses_filters_correctly() {
        let response = GenerationResponse {
            content: vec![
                ContentBlock::Text { text: "hi".into() },
                ContentBlock::ToolUse { id: "t1".into(), name: "ping".into(), input: Value::Null },
            ],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        };
        let uses: Vec<_> = response.tool_uses().collect();
        assert_eq!(uses, vec![("t1", "ping", &Value::Null)]);
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(LlmError::Overloaded.is_transient());
        assert!(LlmError::RateLimit.is_transient());
        assert!(!LlmError::Authentication("x".into()).is_transient());
    }
}

// Copyright (c) 2026 Isprava Engineering
//! Anthropic Messages API adapter, the anti-corruption layer translating
//! `domain::llm` types to and from the vendor wire format.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::llm::{
    ContentBlock, GenerationOptions, GenerationResponse, GenerationStream, LlmError, LlmMessage,
    LlmProvider, MessageRole, StopReason, StreamEvent, TokenUsage, ToolDefinition,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self { client: reqwest::Client::new(), api_key, model, base_url: ANTHROPIC_API_URL.to_string() }
    }

    /// Points the adapter at a stand-in endpoint (a `mockito` server in
    /// tests) instead of the real Anthropic API.
    #[cfg(test)]
    fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self { client: reqwest::Client::new(), api_key, model, base_url }
    }

    fn request_body(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
        stream: bool,
    ) -> WireRequest {
        WireRequest {
            model: self.model.clone(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
            messages: messages.iter().map(WireMessage::from_domain).collect(),
            tools: tools.iter().map(WireTool::from_domain).collect(),
        }
    }

    async fn classify_error_response(&self, response: reqwest::Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => LlmError::Authentication(body),
            404 => LlmError::ModelNotFound(self.model.clone()),
            429 => LlmError::RateLimit,
            529 => LlmError::Overloaded,
            _ => LlmError::Provider(format!("HTTP {status}: {body}")),
        }
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: Vec<WireContentBlock>,
}

impl WireMessage {
    fn from_domain(message: &LlmMessage) -> Self {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: message.content.iter().map(WireContentBlock::from_domain).collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl WireContentBlock {
    fn from_domain(block: &ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => WireContentBlock::Text { text: text.clone() },
            ContentBlock::ToolUse { id, name, input } => {
                WireContentBlock::ToolUse { id: id.clone(), name: name.clone(), input: input.clone() }
            }
            ContentBlock::ToolResult { tool_use_id, content } => {
                WireContentBlock::ToolResult { tool_use_id: tool_use_id.clone(), content: content.clone() }
            }
        }
    }

    fn into_domain(self) -> ContentBlock {
        match self {
            WireContentBlock::Text { text } => ContentBlock::Text { text },
            WireContentBlock::ToolUse { id, name, input } => ContentBlock::ToolUse { id, name, input },
            WireContentBlock::ToolResult { tool_use_id, content } => {
                ContentBlock::ToolResult { tool_use_id, content }
            }
        }
    }
}

#[derive(Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

impl WireTool {
    fn from_domain(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireContentBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn parse_stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LlmError> {
        let body = self.request_body(messages, tools, options, false);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.classify_error_response(response).await);
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Provider(format!("failed to parse response: {e}")))?;

        Ok(GenerationResponse {
            content: parsed.content.into_iter().map(WireContentBlock::into_domain).collect(),
            stop_reason: parse_stop_reason(parsed.stop_reason.as_deref()),
            usage: TokenUsage { input_tokens: parsed.usage.input_tokens, output_tokens: parsed.usage.output_tokens },
        })
    }

    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<GenerationStream, LlmError> {
        let body = self.request_body(messages, tools, options, true);
        let request_builder = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let mut source = EventSource::new(request_builder)
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let stream = async_stream::try_stream! {
            // id -> name, so content_block_stop can emit ToolUseEnd without
            // the SSE payload repeating it.
            let mut open_tool_uses: Vec<String> = Vec::new();

            while let Some(event) = source.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        warn!(error = %e, "anthropic stream error");
                        Err(LlmError::Network(e.to_string()))?;
                        break;
                    }
                };

                let Event::Message(message) = event else { continue };
                let raw: Value = match serde_json::from_str(&message.data) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(error = %e, raw = %message.data, "skipping unparseable anthropic event");
                        continue;
                    }
                };

                match raw.get("type").and_then(Value::as_str) {
                    Some("content_block_start") => {
                        if let Some(block) = raw.get("content_block") {
                            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                                let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                                let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                                open_tool_uses.push(id.clone());
                                yield StreamEvent::ToolUseStart { id, name };
                            }
                        }
                    }
                    Some("content_block_delta") => {
                        if let Some(delta) = raw.get("delta") {
                            match delta.get("type").and_then(Value::as_str) {
                                Some("text_delta") => {
                                    if let Some(text) = delta.get("text").and_then(Value::as_str) {
                                        yield StreamEvent::TextDelta(text.to_string());
                                    }
                                }
                                Some("input_json_delta") => {
                                    if let (Some(id), Some(partial)) =
                                        (open_tool_uses.last(), delta.get("partial_json").and_then(Value::as_str))
                                    {
                                        yield StreamEvent::ToolUseInputDelta {
                                            id: id.clone(),
                                            partial_json: partial.to_string(),
                                        };
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    Some("content_block_stop") => {
                        if let Some(id) = open_tool_uses.pop() {
                            yield StreamEvent::ToolUseEnd { id };
                        }
                    }
                    Some("message_delta") => {
                        let stop_reason = raw
                            .get("delta")
                            .and_then(|d| d.get("stop_reason"))
                            .and_then(Value::as_str);
                        let usage = raw.get("usage");
                        yield StreamEvent::MessageDone {
                            stop_reason: parse_stop_reason(stop_reason),
                            usage: TokenUsage {
                                input_tokens: usage
                                    .and_then(|u| u.get("input_tokens"))
                                    .and_then(Value::as_u64)
                                    .unwrap_or(0) as u32,
                                output_tokens: usage
                                    .and_then(|u| u.get("output_tokens"))
                                    .and_then(Value::as_u64)
                                    .unwrap_or(0) as u32,
                            },
                        };
                    }
                    Some("error") => {
                        let message = raw
                            .get("error")
                            .and_then(|e| e.get("message"))
                            .and_then(Value::as_str)
                            .unwrap_or("unknown anthropic error")
                            .to_string();
                        let err = match raw.get("error").and_then(|e| e.get("type")).and_then(Value::as_str) {
                            Some("rate_limit_error") => LlmError::RateLimit,
                            Some("overloaded_error") => LlmError::Overloaded,
                            Some("authentication_error") => LlmError::Authentication(message),
                            _ => LlmError::Provider(message),
                        };
                        Err(err)?;
                    }
                    _ => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        // Anthropic has no models-list endpoint; GET against the messages
        // endpoint returns 404/405 rather than a network failure once auth
        // succeeds, so either is treated as healthy.
        match response.status().as_u16() {
            200..=299 | 404 | 405 => Ok(()),
            401 | 403 => Err(LlmError::Authentication("invalid API key".into())),
            other => Err(LlmError::Network(format!("unexpected status {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::ContentBlock;

    fn messages() -> Vec<LlmMessage> {
        vec![LlmMessage::user(vec![ContentBlock::Text { text: "hi".to_string() }])]
    }

    #[tokio::test]
    async fn generate_parses_a_text_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"content":[{"type":"text","text":"hello there"}],"stop_reason":"end_turn","usage":{"input_tokens":5,"output_tokens":2}}"#,
            )
            .create_async()
            .await;

        let provider =
            AnthropicProvider::with_base_url("key".to_string(), "claude-test".to_string(), format!("{}/v1/messages", server.url()));
        let response = provider.generate(&messages(), &[], &GenerationOptions::default()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.text(), "hello there");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 5);
        assert_eq!(response.usage.output_tokens, 2);
    }

    #[tokio::test]
    async fn generate_maps_a_tool_use_block() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"content":[{"type":"tool_use","id":"t1","name":"search","input":{"q":"leads"}}],"stop_reason":"tool_use","usage":{"input_tokens":3,"output_tokens":1}}"#,
            )
            .create_async()
            .await;

        let provider =
            AnthropicProvider::with_base_url("key".to_string(), "claude-test".to_string(), format!("{}/v1/messages", server.url()));
        let response = provider.generate(&messages(), &[], &GenerationOptions::default()).await.unwrap();

        assert_eq!(response.stop_reason, StopReason::ToolUse);
        let (id, name, input) = response.tool_uses().next().expect("expected one tool use");
        assert_eq!(id, "t1");
        assert_eq!(name, "search");
        assert_eq!(input.get("q").and_then(Value::as_str), Some("leads"));
    }

    #[tokio::test]
    async fn generate_classifies_rate_limit_status() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/v1/messages").with_status(429).with_body("slow down").create_async().await;

        let provider =
            AnthropicProvider::with_base_url("key".to_string(), "claude-test".to_string(), format!("{}/v1/messages", server.url()));
        let err = provider.generate(&messages(), &[], &GenerationOptions::default()).await.unwrap_err();

        assert!(matches!(err, LlmError::RateLimit));
    }

    #[tokio::test]
    async fn generate_classifies_authentication_failure() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/v1/messages").with_status(401).with_body("bad key").create_async().await;

        let provider =
            AnthropicProvider::with_base_url("key".to_string(), "claude-test".to_string(), format!("{}/v1/messages", server.url()));
        let err = provider.generate(&messages(), &[], &GenerationOptions::default()).await.unwrap_err();

        assert!(matches!(err, LlmError::Authentication(_)));
    }

    #[tokio::test]
    async fn health_check_treats_404_as_healthy() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/v1/messages").with_status(404).create_async().await;

        let provider =
            AnthropicProvider::with_base_url("key".to_string(), "claude-test".to_string(), format!("{}/v1/messages", server.url()));
        assert!(provider.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn health_check_treats_401_as_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/v1/messages").with_status(401).create_async().await;

        let provider =
            AnthropicProvider::with_base_url("key".to_string(), "claude-test".to_string(), format!("{}/v1/messages", server.url()));
        let err = provider.health_check().await.unwrap_err();
        assert!(matches!(err, LlmError::Authentication(_)));
    }
}

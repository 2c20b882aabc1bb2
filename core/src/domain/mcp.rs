// Copyright (c) 2026 Isprava Engineering
//! MCP bridge domain types (`spec.md` SS4.3).
//!
//! The bridge fronts a federation of remote tool-provider servers, each
//! speaking model-context-protocol over server-sent events. Concrete
//! transport, the `servers`/`tool_to_server` registry, and reconnect
//! scheduling live in `infrastructure::mcp_bridge`; this module holds the
//! shapes and pure helpers both layers share.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::location;

/// A configured remote tool server (GLOSSARY: one federation member).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerId(pub String);

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub server_id: ServerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("no MCP server found for tool {0}")]
    UnknownTool(String),
    #[error("circuit open")]
    CircuitOpen,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl McpError {
    /// `spec.md` SS7: "Captured per-tool-call as a `\"Error: <msg>\"` tool
    /// result; loop continues."
    pub fn as_tool_result_text(&self) -> String {
        format!("Error: {self}")
    }
}

/// The sales-funnel tool family that receives implicit `vertical`
/// injection (`spec.md` SS4.6 step d).
const SALES_FUNNEL_PREFIX: &str = "get_sales_funnel";

/// Argument preprocessing applied before every tool invocation
/// (`spec.md` SS4.6 step d): resolve a `locations` string-list argument
/// against the canonical gazetteer, and inject `vertical` for sales-funnel
/// tools when one is set on the request.
pub fn preprocess_arguments(
    tool_name: &str,
    mut args: Value,
    canonical_locations: &[String],
    vertical: Option<&str>,
) -> Value {
    if let Some(obj) = args.as_object_mut() {
        if let Some(Value::Array(items)) = obj.get("locations") {
            if items.iter().all(|v| v.is_string()) {
                let joined = items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                let resolved = location::resolve_many(&joined, canonical_locations);
                obj.insert("locations".to_string(), Value::Array(
                    resolved.into_iter().map(Value::String).collect(),
                ));
            }
        }

        if tool_name.starts_with(SALES_FUNNEL_PREFIX) {
            if let Some(v) = vertical {
                obj.insert("vertical".to_string(), Value::String(v.to_string()));
            }
        }
    }

    args
}

/// Per-server view plus the union across all servers (`spec.md` SS4.3:
/// "`getAllTools()` returns the union across connected servers").
#[async_trait]
pub trait McpBridge: Send + Sync {
    async fn call_tool(
        &self,
        tool_name: &str,
        args: Value,
        user_email: Option<&str>,
    ) -> Result<String, McpError>;

    async fn get_all_tools(&self) -> Vec<ToolDescriptor>;

    /// Per-user tool listing (`spec.md` SS4.3: "queries each server with
    /// user metadata and caches the result ... namespace `tools:user`").
    async fn get_tools_for_user(&self, user_email: &str) -> Vec<ToolDescriptor>;

    fn server_statuses(&self) -> Vec<(ServerId, ServerStatus)>;
}

/// Dedup helper for the admin "available tools" endpoint.
pub fn tool_names(tools: &[ToolDescriptor]) -> Vec<String> {
    let mut seen = HashSet::new();
    tools
        .iter()
        .filter(|t| seen.insert(t.name.clone()))
        .map(|t| t.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preprocess_resolves_locations_list() {
        let canonical = vec!["Mumbai".to_string(), "Delhi".to_string()];
        let args = json!({"locations": ["bombay", "delhi"]});
        let out = preprocess_arguments("get_leads", args, &canonical, None);
        assert_eq!(out["locations"], json!(["Mumbai", "Delhi"]));
    }

    #[test]
    fn preprocess_injects_vertical_for_sales_funnel_family() {
        let args = json!({"period": "last month"});
        let out = preprocess_arguments("get_sales_funnel_summary", args, &[], Some("residential"));
        assert_eq!(out["vertical"], json!("residential"));
    }

    #[test]
    fn preprocess_leaves_non_sales_funnel_tools_untouched() {
        let args = json!({"period": "last month"});
        let out = preprocess_arguments("get_leads", args, &[], Some("residential"));
        assert!(out.get("vertical").is_none());
    }

    #[test]
    fn preprocess_ignores_non_string_locations() {
        let args = json!({"locations": [1, 2, 3]});
        let out = preprocess_arguments("get_leads", args.clone(), &["Mumbai".to_string()], None);
        assert_eq!(out, args);
    }

    #[test]
    fn error_as_tool_result_text_matches_spec_shape() {
        let err = McpError::UnknownTool("foo".to_string());
        assert_eq!(err.as_tool_result_text(), "Error: no MCP server found for tool foo");
    }

    #[test]
    fn tool_names_dedupes_across_servers() {
        let make = |name: &str, server: &str| ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            input_schema: Value::Null,
            server_id: ServerId(server.to_string()),
        };
        let tools = vec![make("ping", "a"), make("ping", "b"), make("pong", "a")];
        let mut names = tool_names(&tools);
        names.sort();
        assert_eq!(names, vec!["ping".to_string(), "pong".to_string()]);
    }
}

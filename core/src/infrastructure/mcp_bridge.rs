// Copyright (c) 2026 Isprava Engineering
//! Concrete MCP bridge (`spec.md` SS4.3): a multi-server JSON-RPC client
//! over HTTP, each call guarded by a per-server circuit breaker, with
//! fire-and-forget exponential-backoff reconnect on transport failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::cache::{SharedCache, SharedCacheExt};
use crate::domain::mcp::{McpBridge, McpError, ServerId, ServerStatus, ToolDescriptor};
use crate::infrastructure::circuit_breaker::BreakerRegistry;

const USER_TOOLS_CACHE_NAMESPACE: &str = "tools:user";
const USER_TOOLS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(60);
const RECONNECT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub id: ServerId,
    pub endpoint: String,
}

/// Parses `spec.md` SS10.1's `MCP_SERVERS` environment contract:
/// comma-separated `id=url` pairs.
pub fn parse_server_configs(raw: &str) -> Vec<McpServerConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let (id, url) = pair.split_once('=')?;
            Some(McpServerConfig { id: ServerId(id.trim().to_string()), endpoint: url.trim().to_string() })
        })
        .collect()
}

struct ServerConnection {
    endpoint: String,
    tools: Vec<ToolDescriptor>,
    status: ServerStatus,
}

pub struct McpHttpBridge {
    client: reqwest::Client,
    servers: Arc<DashMap<String, RwLock<ServerConnection>>>,
    tool_to_server: Arc<DashMap<String, ServerId>>,
    reconnecting: Arc<DashMap<String, Arc<AtomicBool>>>,
    breakers: Arc<BreakerRegistry>,
    cache: Arc<dyn SharedCache>,
}

impl McpHttpBridge {
    /// Connects to every configured server, discovering its tool list.
    /// Per `spec.md` SS4.3: "At least one server must succeed or startup
    /// fails."
    pub async fn connect(
        configs: Vec<McpServerConfig>,
        breakers: Arc<BreakerRegistry>,
        cache: Arc<dyn SharedCache>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::new();
        let servers = Arc::new(DashMap::new());
        let tool_to_server = Arc::new(DashMap::new());
        let reconnecting = Arc::new(DashMap::new());

        let mut connected_any = false;
        for config in configs {
            reconnecting.insert(config.id.0.clone(), Arc::new(AtomicBool::new(false)));

            match list_tools(&client, &config).await {
                Ok(tools) => {
                    for tool in &tools {
                        tool_to_server.insert(tool.name.clone(), config.id.clone());
                    }
                    info!(server = %config.id, tool_count = tools.len(), "mcp server connected");
                    servers.insert(
                        config.id.0.clone(),
                        RwLock::new(ServerConnection {
                            endpoint: config.endpoint.clone(),
                            tools,
                            status: ServerStatus::Connected,
                        }),
                    );
                    connected_any = true;
                }
                Err(e) => {
                    warn!(server = %config.id, error = %e, "mcp server failed initial discovery");
                    servers.insert(
                        config.id.0.clone(),
                        RwLock::new(ServerConnection {
                            endpoint: config.endpoint.clone(),
                            tools: Vec::new(),
                            status: ServerStatus::Failed,
                        }),
                    );
                }
            }
        }

        if !connected_any {
            anyhow::bail!("no MCP server could be reached at startup");
        }

        Ok(Self { client, servers, tool_to_server, reconnecting, breakers, cache })
    }

    fn spawn_reconnect(&self, server_id: ServerId) {
        let flag = self
            .reconnecting
            .entry(server_id.0.clone())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone();

        if flag.swap(true, Ordering::SeqCst) {
            return;
        }

        let client = self.client.clone();
        let servers = self.servers.clone();
        let tool_to_server = self.tool_to_server.clone();

        tokio::spawn(async move {
            let mut backoff = RECONNECT_INITIAL_BACKOFF;
            for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
                tokio::time::sleep(backoff).await;

                let current_endpoint = {
                    let guard = servers.get(&server_id.0);
                    match guard {
                        Some(entry) => entry.read().await.endpoint.clone(),
                        None => break,
                    }
                };
                let config = McpServerConfig { id: server_id.clone(), endpoint: current_endpoint };

                match list_tools(&client, &config).await {
                    Ok(tools) => {
                        for tool in &tools {
                            tool_to_server.insert(tool.name.clone(), server_id.clone());
                        }
                        if let Some(entry) = servers.get(&server_id.0) {
                            let mut connection = entry.write().await;
                            connection.tools = tools;
                            connection.status = ServerStatus::Connected;
                        }
                        info!(server = %server_id, attempt, "mcp server reconnected");
                        flag.store(false, Ordering::SeqCst);
                        return;
                    }
                    Err(e) => {
                        warn!(server = %server_id, attempt, error = %e, "mcp reconnect attempt failed");
                        backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
                    }
                }
            }

            warn!(server = %server_id, "mcp reconnect attempts exhausted");
            if let Some(entry) = servers.get(&server_id.0) {
                entry.write().await.status = ServerStatus::Failed;
            }
            flag.store(false, Ordering::SeqCst);
        });
    }
}

#[async_trait]
impl McpBridge for McpHttpBridge {
    async fn call_tool(
        &self,
        tool_name: &str,
        args: Value,
        user_email: Option<&str>,
    ) -> Result<String, McpError> {
        let server_id = self
            .tool_to_server
            .get(tool_name)
            .map(|e| e.clone())
            .ok_or_else(|| McpError::UnknownTool(tool_name.to_string()))?;

        let breaker = self.breakers.mcp(&server_id.0);

        let endpoint = {
            let entry = self
                .servers
                .get(&server_id.0)
                .ok_or_else(|| McpError::UnknownTool(tool_name.to_string()))?;
            entry.read().await.endpoint.clone()
        };

        let client = self.client.clone();
        let tool = tool_name.to_string();
        let email = user_email.map(str::to_string);

        let result = breaker
            .execute(|| async move { invoke_tool(&client, &endpoint, &tool, args, email.as_deref()).await })
            .await;

        match result {
            Ok(text) => Ok(text),
            Err(crate::domain::circuit_breaker::CircuitError::Open) => Err(McpError::CircuitOpen),
            Err(crate::domain::circuit_breaker::CircuitError::Inner(e)) => {
                // `spec.md` SS4.3 step 4: reconnect on any cause other than
                // `CircuitOpen`, which is handled in the arm above.
                self.spawn_reconnect(server_id);
                Err(e)
            }
        }
    }

    async fn get_all_tools(&self) -> Vec<ToolDescriptor> {
        let mut all = Vec::new();
        for entry in self.servers.iter() {
            all.extend(entry.value().read().await.tools.clone());
        }
        all
    }

    async fn get_tools_for_user(&self, user_email: &str) -> Vec<ToolDescriptor> {
        let cache_key = user_email.to_lowercase();
        if let Ok(Some(cached)) = self
            .cache
            .get_typed::<Vec<ToolDescriptor>>(USER_TOOLS_CACHE_NAMESPACE, &cache_key)
            .await
        {
            return cached;
        }

        let mut tools = Vec::new();
        for entry in self.servers.iter() {
            let connection = entry.value().read().await;
            match list_tools_for_user(&self.client, &connection.endpoint, user_email).await {
                Ok(user_tools) => tools.extend(user_tools),
                Err(e) => {
                    warn!(server = %entry.key(), error = %e, "per-user tool listing failed, using cached descriptors");
                    tools.extend(connection.tools.clone());
                }
            }
        }

        let _ = self
            .cache
            .set_typed(USER_TOOLS_CACHE_NAMESPACE, &cache_key, &tools, USER_TOOLS_CACHE_TTL)
            .await;

        tools
    }

    fn server_statuses(&self) -> Vec<(ServerId, ServerStatus)> {
        self.servers
            .iter()
            .map(|entry| {
                let status = entry
                    .value()
                    .try_read()
                    .map(|c| c.status)
                    .unwrap_or(ServerStatus::Reconnecting);
                (ServerId(entry.key().clone()), status)
            })
            .collect()
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'a str,
    method: &'static str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct ListToolsResult {
    tools: Vec<WireToolDescriptor>,
}

#[derive(Deserialize)]
struct WireToolDescriptor {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "inputSchema")]
    input_schema: Value,
}

async fn rpc_call(
    client: &reqwest::Client,
    endpoint: &str,
    method: &'static str,
    params: Value,
) -> Result<Value, McpError> {
    let request = RpcRequest { jsonrpc: "2.0", id: "1", method, params };

    let response = client
        .post(endpoint)
        .json(&request)
        .send()
        .await
        .map_err(|e| McpError::Transport(e.to_string()))?;

    if !response.status().is_success() {
        return Err(McpError::Transport(format!("HTTP {}", response.status())));
    }

    let body: RpcResponse =
        response.json().await.map_err(|e| McpError::Transport(e.to_string()))?;

    if let Some(err) = body.error {
        return Err(McpError::Protocol(err.message));
    }

    body.result.ok_or_else(|| McpError::Protocol("empty result".to_string()))
}

async fn list_tools(client: &reqwest::Client, config: &McpServerConfig) -> Result<Vec<ToolDescriptor>, McpError> {
    let result = rpc_call(client, &config.endpoint, "tools/list", serde_json::json!({})).await?;
    let parsed: ListToolsResult =
        serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;

    Ok(parsed
        .tools
        .into_iter()
        .map(|t| ToolDescriptor {
            name: t.name,
            description: t.description,
            input_schema: t.input_schema,
            server_id: config.id.clone(),
        })
        .collect())
}

async fn list_tools_for_user(
    client: &reqwest::Client,
    endpoint: &str,
    user_email: &str,
) -> Result<Vec<ToolDescriptor>, McpError> {
    let result = rpc_call(
        client,
        endpoint,
        "tools/list",
        serde_json::json!({ "meta": { "userEmail": user_email } }),
    )
    .await?;
    let parsed: ListToolsResult =
        serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;

    Ok(parsed
        .tools
        .into_iter()
        .map(|t| ToolDescriptor {
            name: t.name,
            description: t.description,
            input_schema: t.input_schema,
            server_id: ServerId(endpoint.to_string()),
        })
        .collect())
}

async fn invoke_tool(
    client: &reqwest::Client,
    endpoint: &str,
    tool_name: &str,
    args: Value,
    user_email: Option<&str>,
) -> Result<String, McpError> {
    let mut params = serde_json::json!({ "name": tool_name, "arguments": args });
    if let Some(email) = user_email {
        params["meta"] = serde_json::json!({ "userEmail": email });
    }

    let result = rpc_call(client, endpoint, "tools/call", params).await?;

    if let Some(content) = result.get("content").and_then(Value::as_array) {
        let text: String = content
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        if !text.is_empty() {
            return Ok(text);
        }
    }

    Ok(result.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_id_url_pairs() {
        let configs = parse_server_configs("helpdesk=https://a.example, sales = https://b.example");
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].id.0, "helpdesk");
        assert_eq!(configs[0].endpoint, "https://a.example");
        assert_eq!(configs[1].id.0, "sales");
        assert_eq!(configs[1].endpoint, "https://b.example");
    }

    #[test]
    fn ignores_blank_segments() {
        let configs = parse_server_configs("a=https://a.example,,  ");
        assert_eq!(configs.len(), 1);
    }
}

// Copyright (c) 2026 Isprava Engineering
//! Admin ACL-config CRUD (`spec.md` SS4.7).
//!
//! Mutations are admin-gated by the caller (`presentation::admin` checks
//! `User::admin` before invoking these methods) and always mirror the
//! freshly-saved config into the shared cache so subsequent `AclService`
//! reads are never stale beyond one round trip.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::acl::{AclConfig, AclConfigStore, AclStoreError};
use crate::domain::cache::{SharedCache, SharedCacheExt};
use crate::domain::mcp::{tool_names, McpBridge};

const ACL_CONFIG_CACHE_NAMESPACE: &str = "acl:config";
const ACL_CONFIG_CACHE_KEY: &str = "effective";
const ACL_CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);

/// The fixed set of ACL tag names the admin UI offers, external to the
/// tool catalog (`spec.md` SS4.7: "the former comes from an external
/// constant mapping").
pub const AVAILABLE_ACL_TAGS: &[&str] =
    &["superuser", "sales_admin", "finance", "ops", "marketing", "support"];

pub struct AdminAclService {
    store: Arc<dyn AclConfigStore>,
    cache: Arc<dyn SharedCache>,
    bridge: Arc<dyn McpBridge>,
}

impl AdminAclService {
    pub fn new(
        store: Arc<dyn AclConfigStore>,
        cache: Arc<dyn SharedCache>,
        bridge: Arc<dyn McpBridge>,
    ) -> Self {
        Self { store, cache, bridge }
    }

    pub async fn get_effective_config(&self) -> Result<AclConfig, AclStoreError> {
        self.store.load().await
    }

    async fn persist_and_mirror(&self, config: &AclConfig) -> Result<(), AclStoreError> {
        self.store.save(config).await?;
        let _ = self
            .cache
            .set_typed(ACL_CONFIG_CACHE_NAMESPACE, ACL_CONFIG_CACHE_KEY, config, ACL_CONFIG_CACHE_TTL)
            .await;
        Ok(())
    }

    pub async fn upsert_tool_acl(
        &self,
        tool_name: &str,
        required_tags: Vec<String>,
    ) -> Result<AclConfig, AclStoreError> {
        let mut config = self.store.load().await?;
        config.tool_acls.insert(tool_name.to_string(), required_tags);
        self.persist_and_mirror(&config).await?;
        Ok(config)
    }

    pub async fn delete_tool_acl(&self, tool_name: &str) -> Result<AclConfig, AclStoreError> {
        let mut config = self.store.load().await?;
        config.tool_acls.remove(tool_name);
        self.persist_and_mirror(&config).await?;
        Ok(config)
    }

    pub async fn update_global_config(
        &self,
        default_policy: crate::domain::acl::DefaultPolicy,
        public_tools: Vec<String>,
        disabled_tools: Vec<String>,
        superuser_acls: Vec<String>,
    ) -> Result<AclConfig, AclStoreError> {
        let mut config = self.store.load().await?;
        config.default_policy = default_policy;
        config.public_tools = public_tools.into_iter().collect();
        config.disabled_tools = disabled_tools.into_iter().collect();
        config.superuser_acls = superuser_acls.into_iter().collect();
        self.persist_and_mirror(&config).await?;
        Ok(config)
    }

    pub fn available_acls(&self) -> Vec<String> {
        AVAILABLE_ACL_TAGS.iter().map(|s| s.to_string()).collect()
    }

    /// `spec.md` SS4.7: "the latter [available tool names] from the MCP
    /// bridge's tool index."
    pub async fn available_tools(&self) -> Vec<String> {
        tool_names(&self.bridge.get_all_tools().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::acl::DefaultPolicy;
    use crate::domain::mcp::{ServerId, ServerStatus, ToolDescriptor};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    struct InMemoryAclStore(Mutex<AclConfig>);

    #[async_trait]
    impl AclConfigStore for InMemoryAclStore {
        async fn load(&self) -> Result<AclConfig, AclStoreError> {
            Ok(self.0.lock().unwrap().clone())
        }
        async fn save(&self, config: &AclConfig) -> Result<(), AclStoreError> {
            *self.0.lock().unwrap() = config.clone();
            Ok(())
        }
    }

    struct NullCache;
    #[async_trait]
    impl SharedCache for NullCache {
        async fn get(
            &self,
            _ns: &str,
            _key: &str,
        ) -> Result<Option<Value>, crate::domain::cache::CacheError> {
            Ok(None)
        }
        async fn set(
            &self,
            _ns: &str,
            _key: &str,
            _value: Value,
            _ttl: Duration,
        ) -> Result<(), crate::domain::cache::CacheError> {
            Ok(())
        }
    }

    struct StubBridge;
    #[async_trait]
    impl McpBridge for StubBridge {
        async fn call_tool(
            &self,
            _tool_name: &str,
            _args: Value,
            _user_email: Option<&str>,
        ) -> Result<String, crate::domain::mcp::McpError> {
            Ok(String::new())
        }
        async fn get_all_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "ping".into(),
                description: String::new(),
                input_schema: Value::Null,
                server_id: ServerId("s1".into()),
            }]
        }
        async fn get_tools_for_user(&self, _user_email: &str) -> Vec<ToolDescriptor> {
            vec![]
        }
        fn server_statuses(&self) -> Vec<(ServerId, ServerStatus)> {
            vec![]
        }
    }

    fn service() -> AdminAclService {
        AdminAclService::new(
            Arc::new(InMemoryAclStore(Mutex::new(AclConfig::default()))),
            Arc::new(NullCache),
            Arc::new(StubBridge),
        )
    }

    #[tokio::test]
    async fn upsert_then_delete_tool_acl_round_trips() {
        let svc = service();
        let config = svc.upsert_tool_acl("get_sales_funnel", vec!["sales_admin".into()]).await.unwrap();
        assert_eq!(config.tool_acls.get("get_sales_funnel").unwrap(), &vec!["sales_admin".to_string()]);

        let config = svc.delete_tool_acl("get_sales_funnel").await.unwrap();
        assert!(!config.tool_acls.contains_key("get_sales_funnel"));
    }

    #[tokio::test]
    async fn update_global_config_replaces_sets() {
        let svc = service();
        let config = svc
            .update_global_config(DefaultPolicy::Open, vec!["ping".into()], vec![], vec!["superuser".into()])
            .await
            .unwrap();
        assert_eq!(config.default_policy, DefaultPolicy::Open);
        assert!(config.public_tools.contains("ping"));
    }

    #[tokio::test]
    async fn available_tools_comes_from_bridge_index() {
        let svc = service();
        assert_eq!(svc.available_tools().await, vec!["ping".to_string()]);
    }
}

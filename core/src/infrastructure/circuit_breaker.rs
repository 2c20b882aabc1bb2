// Copyright (c) 2026 Isprava Engineering
//! Named circuit-breaker registry (`spec.md` SS4.1 "Instances").
//!
//! Holds one [`CircuitBreaker`] per external dependency behind a
//! `DashMap`, mirroring the teacher's `DashMap`-backed registries
//! (`infrastructure/tool_router.rs`'s capability index).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use crate::domain::llm::LlmError;

pub const CLAUDE_API_BREAKER: &str = "claude-api";
pub const DATABASE_BREAKER: &str = "database";

pub fn mcp_breaker_name(server_id: &str) -> String {
    format!("mcp-{server_id}")
}

pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Seeds the `claude-api` (threshold 3, reset 60s) and `database`
    /// (threshold 5, reset 30s) breakers up front; MCP breakers are added
    /// lazily as servers are registered (`spec.md` SS4.1 "Instances").
    pub fn new() -> Self {
        let registry = Self { breakers: DashMap::new() };

        registry.breakers.insert(
            CLAUDE_API_BREAKER.to_string(),
            Arc::new(CircuitBreaker::with_transient_predicate(
                CLAUDE_API_BREAKER,
                CircuitBreakerConfig::new(3, Duration::from_secs(60)),
                |msg| msg.contains(&LlmError::RateLimit.to_string()) || msg.contains(&LlmError::Overloaded.to_string()),
            )),
        );

        registry.breakers.insert(
            DATABASE_BREAKER.to_string(),
            Arc::new(CircuitBreaker::new(
                DATABASE_BREAKER,
                CircuitBreakerConfig::new(5, Duration::from_secs(30)),
            )),
        );

        registry
    }

    pub fn claude_api(&self) -> Arc<CircuitBreaker> {
        self.breakers.get(CLAUDE_API_BREAKER).expect("seeded at construction").clone()
    }

    pub fn database(&self) -> Arc<CircuitBreaker> {
        self.breakers.get(DATABASE_BREAKER).expect("seeded at construction").clone()
    }

    /// `spec.md` SS4.1: "one per MCP server (`mcp-<id>`, threshold 5,
    /// reset 30 s)". Created on first use so the registry doesn't need to
    /// know the server list up front. Unlike `claude-api`, spec.md defines
    /// no transient carve-out for MCP failures, so every invocation error
    /// counts toward the threshold.
    pub fn mcp(&self, server_id: &str) -> Arc<CircuitBreaker> {
        let name = mcp_breaker_name(server_id);
        self.breakers
            .entry(name.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, CircuitBreakerConfig::new(5, Duration::from_secs(30))))
            })
            .clone()
    }

    /// Snapshot every breaker for `/api/health` (`spec.md` SS6
    /// `{status, circuits: {claude, mcp:{...}}}`).
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.iter().map(|entry| entry.value().get_state()).collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit_breaker::CircuitState;

    #[test]
    fn seeds_claude_api_and_database_breakers() {
        let registry = BreakerRegistry::new();
        assert_eq!(registry.claude_api().get_state().state, CircuitState::Closed);
        assert_eq!(registry.database().get_state().state, CircuitState::Closed);
    }

    #[test]
    fn mcp_breaker_is_created_lazily_and_reused() {
        let registry = BreakerRegistry::new();
        let first = registry.mcp("helpdesk");
        let second = registry.mcp("helpdesk");
        assert_eq!(first.name(), second.name());
        assert_eq!(first.name(), "mcp-helpdesk");
    }

    #[test]
    fn snapshots_include_all_seeded_breakers() {
        let registry = BreakerRegistry::new();
        registry.mcp("helpdesk");
        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&CLAUDE_API_BREAKER.to_string()));
        assert!(names.contains(&DATABASE_BREAKER.to_string()));
        assert!(names.contains(&"mcp-helpdesk".to_string()));
    }
}

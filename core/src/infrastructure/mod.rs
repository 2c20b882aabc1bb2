// Copyright (c) 2026 Isprava Engineering
//! Adapters implementing the domain's repository/provider traits against
//! real external systems: PostgreSQL, the Anthropic Messages API, and
//! MCP tool servers.

pub mod acl_seed;
pub mod circuit_breaker;
pub mod db;
pub mod llm;
pub mod mcp_bridge;
pub mod repositories;
pub mod shared_cache;

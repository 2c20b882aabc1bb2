// Copyright (c) 2026 Isprava Engineering
//! # agentrelay-core
//!
//! The runtime heart of the agentrelay gateway: a bounded fixed-point loop
//! that interleaves LLM calls and tool executions, backed by a multi-server
//! MCP bridge, a per-user ACL evaluator, a circuit-breaker/shared-cache
//! discipline, and an HTTP/SSE presentation surface.
//!
//! ## Layer structure
//!
//! ```text
//! presentation/   <- Axum HTTP + SSE surface
//!     |
//! application/    <- use-cases: agent loop, ACL service, admin config, rate limiting
//!     |
//! domain/         <- aggregates, value objects, repository/provider traits
//!     |
//! infrastructure/ <- Postgres repositories, MCP bridge, LLM adapter, caches
//! ```

pub mod config;
pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod metrics;
pub mod presentation;

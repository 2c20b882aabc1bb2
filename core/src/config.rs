// Copyright (c) 2026 Isprava Engineering
//! Environment-sourced settings (`spec.md` SS6 "Environment contract",
//! `SPEC_FULL.md` SS10.1).
//!
//! Every variable is read once at startup into [`Settings`]; a missing or
//! unparsable value is a fatal configuration error (`SPEC_FULL.md` SS7
//! expansion) so the process never binds a listener in a half-configured
//! state.

use std::env;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Comma-separated `id=url` pairs, e.g. `helpdesk=https://h.example,sales=https://s.example`.
    pub mcp_servers: String,
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub database_url: String,
    /// Path to a YAML file seeding the initial [`crate::domain::acl::AclConfig`].
    pub acl_seed_path: String,
    pub debug: bool,
    pub bind_addr: String,
}

impl Settings {
    /// Load from the process environment (`dotenvy` is loaded by the
    /// binary crate before this runs, per `SPEC_FULL.md` SS10.1).
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            mcp_servers: required("MCP_SERVERS")?,
            anthropic_api_key: required("ANTHROPIC_API_KEY")?,
            anthropic_model: env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5".to_string()),
            database_url: required("DATABASE_URL")?,
            acl_seed_path: required("ACL_SEED_PATH")?,
            debug: parse_bool_flag("DEBUG")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_bool_flag(name: &'static str) -> Result<bool, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(false),
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => Err(ConfigError::Invalid(name, other.to_string())),
        },
    }
}

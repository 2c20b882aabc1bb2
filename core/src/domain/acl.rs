// Copyright (c) 2026 Isprava Engineering
//! ACL domain types and the pure access-control decision (`spec.md` SS4.4).
//!
//! `evaluate` is a pure function of (effective config snapshot, user
//! snapshot, tool name) per `spec.md` SS8's testable-properties
//! invariant: "`check(tool, user)` is a pure function of (user ACL
//! snapshot, effective config snapshot, tool name)". All I/O (config and
//! user lookups, caching) lives in `application::acl_service`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    Open,
    Deny,
}

/// The canonical merged view of global policy, public/disabled tool sets,
/// and per-tool required tags (GLOSSARY: "Canonical ACL config").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclConfig {
    pub default_policy: DefaultPolicy,
    pub public_tools: HashSet<String>,
    pub disabled_tools: HashSet<String>,
    pub tool_acls: HashMap<String, Vec<String>>,
    pub superuser_acls: HashSet<String>,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            default_policy: DefaultPolicy::Deny,
            public_tools: HashSet::new(),
            disabled_tools: HashSet::new(),
            tool_acls: HashMap::new(),
            superuser_acls: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclDecision {
    pub allowed: bool,
    pub reason: String,
}

impl AclDecision {
    fn allow() -> Self {
        Self { allowed: true, reason: "allowed".to_string() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: reason.into() }
    }
}

/// Pure evaluation of `spec.md` SS4.4 steps 1-7.
///
/// `user` is `None` when the caller supplied no `user_email`, and `Some`
/// with the resolved record otherwise (resolution — "missing" / inactive
/// handling for an email that failed to resolve — is the caller's job;
/// see `application::acl_service::AclService::check`).
pub fn evaluate(config: &AclConfig, tool_name: &str, user: Option<&User>) -> AclDecision {
    if config.disabled_tools.contains(tool_name) {
        return AclDecision::deny("disabled");
    }

    let has_explicit_acl = config.tool_acls.get(tool_name).is_some_and(|tags| !tags.is_empty());
    if config.public_tools.contains(tool_name) && !has_explicit_acl {
        return AclDecision::allow();
    }

    let Some(user) = user else {
        return AclDecision::deny("authentication required");
    };

    if !user.active {
        return AclDecision::deny("deactivated");
    }

    if user.has_any_tag(&config.superuser_acls.iter().cloned().collect::<Vec<_>>()) {
        return AclDecision::allow();
    }

    match config.tool_acls.get(tool_name) {
        None => {
            if matches!(config.default_policy, DefaultPolicy::Open) {
                AclDecision::allow()
            } else {
                AclDecision::deny("no acl grants access to this tool")
            }
        }
        Some(required) if required.is_empty() => {
            if matches!(config.default_policy, DefaultPolicy::Open) {
                AclDecision::allow()
            } else {
                AclDecision::deny("no acl grants access to this tool")
            }
        }
        Some(required) => {
            if user.has_any_tag(required) {
                AclDecision::allow()
            } else {
                AclDecision::deny("missing required acl tag")
            }
        }
    }
}

/// `spec.md` SS4.4 `filter_for_listing`: discovery is permissive when
/// unauthenticated (enforcement is re-applied at call time), strict
/// otherwise.
pub fn filter_for_listing<'a>(
    config: &AclConfig,
    tools: &'a [String],
    user: Option<&User>,
) -> Vec<&'a str> {
    tools
        .iter()
        .filter(|name| !config.disabled_tools.contains(name.as_str()))
        .filter(|name| match user {
            None => true,
            Some(_) => evaluate(config, name, user).allowed,
        })
        .map(|s| s.as_str())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum AclStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Document-store-backed persistence of [`AclConfig`] (`spec.md` SS4.7:
/// "Global config is stored in the document store").
#[async_trait]
pub trait AclConfigStore: Send + Sync {
    async fn load(&self) -> Result<AclConfig, AclStoreError>;
    async fn save(&self, config: &AclConfig) -> Result<(), AclStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(tags: &[&str], active: bool) -> User {
        User {
            user_id: "u1".into(),
            email: "a@b.com".into(),
            display_name: "A".into(),
            acl_tags: tags.iter().map(|s| s.to_string()).collect(),
            active,
            admin: false,
        }
    }

    #[test]
    fn disabled_tool_denied_even_if_public() {
        let mut config = AclConfig::default();
        config.disabled_tools.insert("x".into());
        config.public_tools.insert("x".into());
        let decision = evaluate(&config, "x", None);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "disabled");
    }

    #[test]
    fn public_tool_without_explicit_acl_allowed_unauthenticated() {
        let mut config = AclConfig::default();
        config.public_tools.insert("ping".into());
        let decision = evaluate(&config, "ping", None);
        assert!(decision.allowed);
    }

    #[test]
    fn public_tool_with_explicit_acl_requires_auth() {
        let mut config = AclConfig::default();
        config.public_tools.insert("ping".into());
        config.tool_acls.insert("ping".into(), vec!["ops".into()]);
        let decision = evaluate(&config, "ping", None);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "authentication required");
    }

    #[test]
    fn missing_user_email_denied() {
        let config = AclConfig::default();
        let decision = evaluate(&config, "get_sales_funnel", None);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "authentication required");
    }

    #[test]
    fn inactive_user_denied() {
        let config = AclConfig::default();
        let u = user(&["sales_admin"], false);
        let decision = evaluate(&config, "get_sales_funnel", Some(&u));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "deactivated");
    }

    #[test]
    fn superuser_tag_bypasses_tool_acl() {
        let mut config = AclConfig::default();
        config.superuser_acls.insert("superuser".into());
        config.tool_acls.insert("get_sales_funnel".into(), vec!["sales_admin".into()]);
        let u = user(&["superuser"], true);
        let decision = evaluate(&config, "get_sales_funnel", Some(&u));
        assert!(decision.allowed);
    }

    #[test]
    fn default_open_allows_tool_with_no_required_tags() {
        let mut config = AclConfig::default();
        config.default_policy = DefaultPolicy::Open;
        let u = user(&[], true);
        let decision = evaluate(&config, "anything", Some(&u));
        assert!(decision.allowed);
    }

    #[test]
    fn default_deny_blocks_tool_with_no_required_tags() {
        let config = AclConfig::default();
        let u = user(&[], true);
        let decision = evaluate(&config, "anything", Some(&u));
        assert!(!decision.allowed);
    }

    #[test]
    fn required_tags_use_or_semantics() {
        let mut config = AclConfig::default();
        config.tool_acls.insert("get_sales_funnel".into(), vec!["sales_admin".into(), "finance".into()]);
        let u = user(&["finance"], true);
        let decision = evaluate(&config, "get_sales_funnel", Some(&u));
        assert!(decision.allowed);
    }

    #[test]
    fn missing_required_tags_denied() {
        let mut config = AclConfig::default();
        config.tool_acls.insert("get_sales_funnel".into(), vec!["sales_admin".into()]);
        let u = user(&["intern"], true);
        let decision = evaluate(&config, "get_sales_funnel", Some(&u));
        assert!(!decision.allowed);
    }

    #[test]
    fn filter_for_listing_removes_disabled_and_is_permissive_unauthenticated() {
        let mut config = AclConfig::default();
        config.disabled_tools.insert("dangerous".into());
        config.tool_acls.insert("get_sales_funnel".into(), vec!["sales_admin".into()]);
        let tools = vec!["dangerous".to_string(), "get_sales_funnel".to_string(), "ping".to_string()];
        let listed = filter_for_listing(&config, &tools, None);
        assert_eq!(listed, vec!["get_sales_funnel", "ping"]);
    }

    #[test]
    fn filter_for_listing_enforces_acl_when_authenticated() {
        let mut config = AclConfig::default();
        config.tool_acls.insert("get_sales_funnel".into(), vec!["sales_admin".into()]);
        let tools = vec!["get_sales_funnel".to_string(), "ping".to_string()];
        let u = user(&[], true);
        let listed = filter_for_listing(&config, &tools, Some(&u));
        assert_eq!(listed, vec!["ping"]);
    }
}

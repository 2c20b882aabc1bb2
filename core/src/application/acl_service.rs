// Copyright (c) 2026 Isprava Engineering
//! Per-user tool access control (`spec.md` SS4.4).
//!
//! Grounded on the teacher's `application::policy::PolicyService` trait
//! shape: an async service fronting a pure domain evaluation with a
//! two-tier (shared-cache-then-store) lookup for both halves of the
//! decision (effective config, user record).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::acl::{self, AclConfig, AclConfigStore, AclDecision};
use crate::domain::cache::{SharedCache, SharedCacheExt};
use crate::domain::user::{User, UserRepository};

const ACL_CONFIG_CACHE_NAMESPACE: &str = "acl:config";
const ACL_CONFIG_CACHE_KEY: &str = "effective";
const ACL_CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);

const ACL_USER_CACHE_NAMESPACE: &str = "acl:user";
const ACL_USER_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

pub struct AclService {
    store: Arc<dyn AclConfigStore>,
    users: Arc<dyn UserRepository>,
    cache: Arc<dyn SharedCache>,
}

impl AclService {
    pub fn new(
        store: Arc<dyn AclConfigStore>,
        users: Arc<dyn UserRepository>,
        cache: Arc<dyn SharedCache>,
    ) -> Self {
        Self { store, users, cache }
    }

    /// Stale-allowed read-through of the effective config (`spec.md`
    /// SS4.7: "the evaluator prefers the shared-cache snapshot").
    async fn effective_config(&self) -> AclConfig {
        if let Ok(Some(config)) = self
            .cache
            .get_typed::<AclConfig>(ACL_CONFIG_CACHE_NAMESPACE, ACL_CONFIG_CACHE_KEY)
            .await
        {
            return config;
        }

        match self.store.load().await {
            Ok(config) => {
                if let Err(err) = self
                    .cache
                    .set_typed(
                        ACL_CONFIG_CACHE_NAMESPACE,
                        ACL_CONFIG_CACHE_KEY,
                        &config,
                        ACL_CONFIG_CACHE_TTL,
                    )
                    .await
                {
                    warn!(error = %err, "failed to repopulate acl config cache");
                }
                config
            }
            Err(err) => {
                warn!(error = %err, "failed to load acl config, denying by default");
                AclConfig::default()
            }
        }
    }

    /// `spec.md` SS4.4 step 4: "resolve user; missing -> deny ('unknown
    /// user'); inactive -> deny ('deactivated')" — deactivated is folded
    /// into `domain::acl::evaluate`, "unknown user" is this layer's job
    /// since the domain function only sees `Option<&User>`.
    async fn resolve_user(&self, email: &str) -> Option<User> {
        let cache_key = email.to_lowercase();
        if let Ok(Some(user)) = self
            .cache
            .get_typed::<User>(ACL_USER_CACHE_NAMESPACE, &cache_key)
            .await
        {
            return Some(user);
        }

        match self.users.find_by_email(&cache_key).await {
            Ok(Some(user)) => {
                let _ = self
                    .cache
                    .set_typed(ACL_USER_CACHE_NAMESPACE, &cache_key, &user, ACL_USER_CACHE_TTL)
                    .await;
                Some(user)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, email = %cache_key, "failed to resolve user for acl check");
                None
            }
        }
    }

    pub async fn check(&self, tool_name: &str, user_email: Option<&str>) -> AclDecision {
        let config = self.effective_config().await;

        let Some(email) = user_email else {
            return acl::evaluate(&config, tool_name, None);
        };

        match self.resolve_user(email).await {
            Some(user) => acl::evaluate(&config, tool_name, Some(&user)),
            None => AclDecision { allowed: false, reason: "unknown user".to_string() },
        }
    }

    /// `spec.md` SS4.4 `filter_for_listing`.
    pub async fn filter_for_listing(
        &self,
        tools: &[String],
        user_email: Option<&str>,
    ) -> Vec<String> {
        let config = self.effective_config().await;
        let user = match user_email {
            Some(email) => self.resolve_user(email).await,
            None => None,
        };
        acl::filter_for_listing(&config, tools, user.as_ref())
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }
}

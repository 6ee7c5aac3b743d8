//! Authorization manager (C8): role/permission evaluation against a
//! requested action, with a context rule for conversation-scoped bus topics.

use dashmap::DashMap;

use crate::authn::UserIdentity;
use crate::bus::envelope::MessageEnvelope;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPolicy {
    Allow,
    Deny,
}

/// Optional resource context consulted for the `conversation.*` rule.
pub enum Resource<'a> {
    None,
    Envelope(&'a MessageEnvelope),
}

pub struct AuthzManager {
    default_policy: DefaultPolicy,
    /// role -> permission patterns. Source of role-derived permissions.
    role_permissions: std::collections::BTreeMap<String, Vec<String>>,
    /// Memoized union of permissions per `(user_uuid, roles-tuple)`, keyed by
    /// a stable string so role-set order doesn't fragment the cache.
    cache: DashMap<String, Vec<String>>,
}

impl AuthzManager {
    pub fn new(default_policy: DefaultPolicy, role_permissions: std::collections::BTreeMap<String, Vec<String>>) -> Self {
        Self {
            default_policy,
            role_permissions,
            cache: DashMap::new(),
        }
    }

    fn derived_permissions(&self, identity: &UserIdentity) -> Vec<String> {
        let cache_key = format!("{}:{}", identity.user_uuid, identity.roles.join(","));
        if let Some(hit) = self.cache.get(&cache_key) {
            return hit.clone();
        }

        let mut permissions = identity.permissions.clone();
        for role in &identity.roles {
            if let Some(patterns) = self.role_permissions.get(role) {
                permissions.extend(patterns.iter().cloned());
            }
        }
        permissions.sort();
        permissions.dedup();

        self.cache.insert(cache_key, permissions.clone());
        permissions
    }

    /// Invalidates every cached permission union. Call after a role's
    /// permission set changes.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    fn permission_allows(pattern: &str, action: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return action.starts_with(prefix);
        }
        pattern == action
    }

    pub fn authorize(&self, identity: &UserIdentity, action: &str, resource: Resource<'_>) -> Result<()> {
        let permissions = self.derived_permissions(identity);

        if permissions.iter().any(|p| Self::permission_allows(p, action)) {
            return Ok(());
        }

        if action.starts_with("conversation.") {
            if let Resource::Envelope(envelope) = resource {
                if envelope.metadata.source == identity.user_uuid.to_string() {
                    return Ok(());
                }
            }
        }

        match self.default_policy {
            DefaultPolicy::Allow => Ok(()),
            DefaultPolicy::Deny => Err(Error::Authorization(format!(
                "identity lacks permission for action '{action}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn identity(permissions: Vec<&str>, roles: Vec<&str>) -> UserIdentity {
        UserIdentity {
            user_uuid: Uuid::new_v4(),
            username: "alice".to_string(),
            roles: roles.into_iter().map(String::from).collect(),
            permissions: permissions.into_iter().map(String::from).collect(),
            metadata: Default::default(),
        }
    }

    fn manager() -> AuthzManager {
        let mut roles = std::collections::BTreeMap::new();
        roles.insert("admin".to_string(), vec!["*".to_string()]);
        roles.insert("operator".to_string(), vec!["gateway.*".to_string()]);
        AuthzManager::new(DefaultPolicy::Deny, roles)
    }

    #[test]
    fn wildcard_permission_allows_everything() {
        let mgr = manager();
        let id = identity(vec!["*"], vec![]);
        assert!(mgr.authorize(&id, "users.delete", Resource::None).is_ok());
    }

    #[test]
    fn exact_permission_match_allows() {
        let mgr = manager();
        let id = identity(vec!["users.read"], vec![]);
        assert!(mgr.authorize(&id, "users.read", Resource::None).is_ok());
        assert!(mgr.authorize(&id, "users.write", Resource::None).is_err());
    }

    #[test]
    fn prefix_wildcard_permission_matches() {
        let mgr = manager();
        let id = identity(vec!["users.*"], vec![]);
        assert!(mgr.authorize(&id, "users.delete", Resource::None).is_ok());
        assert!(mgr.authorize(&id, "billing.delete", Resource::None).is_err());
    }

    #[test]
    fn role_derived_permissions_are_unioned() {
        let mgr = manager();
        let id = identity(vec![], vec!["operator"]);
        assert!(mgr.authorize(&id, "gateway.status", Resource::None).is_ok());
        assert!(mgr.authorize(&id, "users.delete", Resource::None).is_err());
    }

    #[test]
    fn conversation_context_rule_allows_own_resource() {
        let mgr = manager();
        let id = identity(vec![], vec![]);
        let envelope = MessageEnvelope::new(
            id.user_uuid.to_string(),
            "conversation.message",
            serde_json::json!({}),
        );
        assert!(mgr
            .authorize(&id, "conversation.message", Resource::Envelope(&envelope))
            .is_ok());
    }

    #[test]
    fn conversation_context_rule_denies_other_users_resource() {
        let mgr = manager();
        let id = identity(vec![], vec![]);
        let envelope = MessageEnvelope::new(
            Uuid::new_v4().to_string(),
            "conversation.message",
            serde_json::json!({}),
        );
        assert!(mgr
            .authorize(&id, "conversation.message", Resource::Envelope(&envelope))
            .is_err());
    }

    #[test]
    fn default_allow_policy_permits_unmatched_actions() {
        let mgr = AuthzManager::new(DefaultPolicy::Allow, Default::default());
        let id = identity(vec![], vec![]);
        assert!(mgr.authorize(&id, "anything", Resource::None).is_ok());
    }
}

//! Role-based access control over tables and functions.

pub mod policy;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::Principal;
use crate::config::SecurityConfig;
use crate::services::UserService;

pub use policy::{Policy, PolicyError, RoleGrants};

/// Policy used when no policy file is configured.
pub const DEFAULT_POLICY: &str = include_str!("default_policy.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Table,
    Function,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Table => "table",
            ResourceType::Function => "function",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Select,
    Insert,
    Update,
    Delete,
    Execute,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Select => "SELECT",
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Execute => "EXECUTE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one permission check. Built fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub role: String,
    pub message: String,
}

pub struct AccessControl {
    policy: Policy,
    users: Option<UserService>,
}

impl AccessControl {
    /// Without a user service, roles come only from the credential or the default.
    pub fn new(policy: Policy, users: Option<UserService>) -> Self {
        Self { policy, users }
    }

    pub fn from_config(config: &SecurityConfig, users: Option<UserService>) -> Result<Self, PolicyError> {
        Ok(Self::new(Policy::load(config.policy_file.as_deref())?, users))
    }

    /// Credential role hint, then the user store, then the policy default.
    pub async fn resolve_role(&self, principal: &Principal) -> Result<String, crate::services::DirectoryError> {
        if principal.is_anonymous() {
            return Ok(self.policy.anonymous_role.clone());
        }
        if let Some(role) = principal.role.as_deref().filter(|r| !r.is_empty()) {
            return Ok(role.to_string());
        }
        if let (Some(users), Some(email)) = (&self.users, principal.email.as_deref()) {
            if let Some(role) = users.find_by_email(email).await?.and_then(|u| u.role).filter(|r| !r.is_empty()) {
                return Ok(role);
            }
        }
        Ok(self.policy.default_role.clone())
    }

    pub async fn check_user_permission(
        &self,
        principal: &Principal,
        resource_type: ResourceType,
        resource_name: &str,
        action: Action,
    ) -> AccessDecision {
        let role = match self.resolve_role(principal).await {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!("Role lookup failed for {}: {}", principal.id, e);
                return AccessDecision {
                    allowed: false,
                    role: "unknown".to_string(),
                    message: "Unable to determine your role; please try again".to_string(),
                };
            }
        };

        let allowed = match self.policy.allows(&role, resource_type, resource_name, action) {
            Some(allowed) => allowed,
            None => {
                tracing::warn!("Principal {} has undefined role '{}'", principal.id, role);
                false
            }
        };

        let message = if allowed {
            format!("Role '{}' may {} on {} '{}'", role, action, resource_type.as_str(), resource_name)
        } else {
            format!(
                "Role '{}' is not permitted to {} on {} '{}'",
                role,
                action,
                resource_type.as_str(),
                resource_name
            )
        };
        tracing::debug!("RBAC {} for {}: {}", if allowed { "allow" } else { "deny" }, principal.id, message);

        AccessDecision { allowed, role, message }
    }
}

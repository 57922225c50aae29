use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

use super::{Action, ResourceType};

pub const WILDCARD: &str = "*";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid policy: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleGrants {
    #[serde(default)]
    pub tables: HashMap<String, Vec<Action>>,
    #[serde(default)]
    pub functions: HashMap<String, Vec<Action>>,
}

impl RoleGrants {
    fn grants(&self, resource_type: ResourceType, name: &str, action: Action) -> bool {
        let map = match resource_type {
            ResourceType::Table => &self.tables,
            ResourceType::Function => &self.functions,
        };
        [name, WILDCARD]
            .iter()
            .filter_map(|key| map.get(*key))
            .any(|actions| actions.contains(&action))
    }
}

/// Role-to-grant table, loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// Role for authenticated callers whose role cannot be resolved otherwise.
    pub default_role: String,
    /// Role for exempted, unauthenticated function calls.
    pub anonymous_role: String,
    #[serde(default)]
    pub roles: HashMap<String, RoleGrants>,
}

impl Policy {
    pub fn from_yaml(source: &str) -> Result<Self, PolicyError> {
        let policy: Policy = serde_yaml::from_str(source)?;
        policy.check()?;
        Ok(policy)
    }

    /// Load `path` when given, the compiled-in policy otherwise.
    pub fn load(path: Option<&str>) -> Result<Self, PolicyError> {
        match path {
            Some(path) => {
                let source = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
                    path: path.to_string(),
                    source,
                })?;
                tracing::info!("Loaded RBAC policy from {}", path);
                Self::from_yaml(&source)
            }
            None => Self::from_yaml(super::DEFAULT_POLICY),
        }
    }

    /// `None` when the role is not defined at all.
    pub fn allows(&self, role: &str, resource_type: ResourceType, name: &str, action: Action) -> Option<bool> {
        self.roles
            .get(role)
            .map(|grants| grants.grants(resource_type, name, action))
    }

    fn check(&self) -> Result<(), PolicyError> {
        for role in [&self.default_role, &self.anonymous_role] {
            if !self.roles.contains_key(role) {
                return Err(PolicyError::Invalid(format!("role '{}' is referenced but not defined", role)));
            }
        }
        for (role, grants) in &self.roles {
            if grants.tables.values().flatten().any(|a| *a == Action::Execute) {
                return Err(PolicyError::Invalid(format!("role '{}' grants EXECUTE on a table", role)));
            }
            if grants.functions.values().flatten().any(|a| *a != Action::Execute) {
                return Err(PolicyError::Invalid(format!("role '{}' grants a table action on a function", role)));
            }
        }
        Ok(())
    }
}

//! Execution context: who is asking, via which role scopes.

use serde::{Deserialize, Serialize};

/// Per-query caller identity. A context carries zero or more role scopes
/// (e.g. user roles and service roles). Within a scope, role grants are
/// unioned; across scopes, the intersection wins. A context with no scopes
/// is unrestricted; a scope that is present but holds no roles denies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(default)]
    pub scopes: Vec<RoleScope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleScope {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl ExecutionContext {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn with_scope(name: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            scopes: vec![RoleScope {
                name: name.into(),
                roles,
            }],
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Every role id referenced by any scope, in order of appearance.
    pub fn role_ids(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().flat_map(|s| s.roles.iter().map(String::as_str))
    }
}

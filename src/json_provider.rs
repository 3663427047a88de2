use crate::error::{ProviderError, Result};
use crate::permission::Permission;
use crate::provider::Provider;
use crate::tree::{DEFAULT_MAX_INHERIT_DEPTH, InheritanceSource, RoleTree};
use crate::types::{RoleName, SubjectId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Static rules understood by [`JsonProvider`].
///
/// ```json
/// {
///   "roles": {
///     "reader": { "permissions": ["read"], "inherited": ["guest"] },
///     "guest": {}
///   },
///   "users": { "john.smith": ["reader"] }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRules {
    /// Role definitions by name.
    #[serde(default)]
    pub roles: HashMap<RoleName, RoleRules>,
    /// Directly assigned roles by subject.
    #[serde(default)]
    pub users: HashMap<SubjectId, Vec<RoleName>>,
}

/// Definition of a single role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRules {
    /// Permissions granted by the role.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Attribute names gating the role.
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Roles inherited by the role.
    #[serde(default)]
    pub inherited: Vec<RoleName>,
}

/// Provider serving roles from static rules, for tests and small deployments.
///
/// Clones share the same rules.
#[derive(Debug, Clone)]
pub struct JsonProvider {
    rules: Arc<RwLock<JsonRules>>,
    max_depth: usize,
}

impl Default for JsonProvider {
    fn default() -> Self {
        Self::new(JsonRules::default())
    }
}

impl JsonProvider {
    /// Creates a provider from parsed rules.
    pub fn new(rules: JsonRules) -> Self {
        Self {
            rules: Arc::new(RwLock::new(rules)),
            max_depth: DEFAULT_MAX_INHERIT_DEPTH,
        }
    }

    /// Sets the deepest role tree built for a subject. Deeper inheritance
    /// fails the role lookup.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Parses rules from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Converts rules from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(Self::new(serde_json::from_value(value)?))
    }

    /// Returns a copy of the current rules.
    pub fn rules(&self) -> JsonRules {
        self.read(|state| state.clone())
    }

    /// Defines a role, replacing any previous definition.
    pub fn set_role(&self, role: RoleName, rules: RoleRules) {
        self.write(|state| {
            state.roles.insert(role, rules);
        });
    }

    /// Adds a permission to a role, defining the role if needed.
    pub fn add_role_permission(&self, role: RoleName, permission: Permission) {
        self.write(|state| state.roles.entry(role).or_default().permissions.push(permission));
    }

    /// Adds an attribute to a role, defining the role if needed.
    pub fn add_role_attribute(&self, role: RoleName, attribute: impl Into<String>) {
        let attribute = attribute.into();
        self.write(|state| state.roles.entry(role).or_default().attributes.push(attribute));
    }

    /// Makes `role` inherit `inherited`, defining both roles if needed.
    pub fn add_role_inherit(&self, role: RoleName, inherited: RoleName) {
        self.write(|state| {
            state.roles.entry(inherited.clone()).or_default();
            state.roles.entry(role).or_default().inherited.push(inherited);
        });
    }

    /// Assigns a role to a subject.
    pub fn add_user_role(&self, subject: SubjectId, role: RoleName) {
        self.write(|state| state.users.entry(subject).or_default().push(role));
    }

    fn read<T>(&self, f: impl FnOnce(&JsonRules) -> T) -> T {
        let guard = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write(&self, f: impl FnOnce(&mut JsonRules)) {
        let mut guard = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn role_entries<T>(&self, role: &RoleName, f: impl FnOnce(&RoleRules) -> Vec<T>) -> Vec<T> {
        self.read(|state| state.roles.get(role).map(f).unwrap_or_default())
    }
}

#[async_trait]
impl InheritanceSource for JsonProvider {
    async fn inherited(&self, role: &RoleName) -> std::result::Result<Option<Vec<RoleName>>, ProviderError> {
        Ok(self.read(|state| {
            state
                .roles
                .get(role)
                .map(|definition| definition.inherited.clone())
        }))
    }
}

#[async_trait]
impl Provider for JsonProvider {
    async fn roles(&self, subject: &SubjectId) -> std::result::Result<RoleTree, ProviderError> {
        let assigned = self.read(|state| state.users.get(subject).cloned().unwrap_or_default());
        RoleTree::collect_with_max_depth(assigned, self, self.max_depth).await
    }

    async fn permissions(
        &self,
        role: &RoleName,
    ) -> std::result::Result<Vec<Permission>, ProviderError> {
        Ok(self.role_entries(role, |definition| definition.permissions.clone()))
    }

    async fn attributes(&self, role: &RoleName) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(self.role_entries(role, |definition| definition.attributes.clone()))
    }
}

//! Role directory: the configured role -> permission table

use super::policy::PermissionSet;
use crate::config::RolesConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// A configured role
#[derive(Debug, Clone)]
pub struct Role {
    /// Lookup key, e.g. `admin`
    pub key: String,
    /// Display name, e.g. `Admin`
    pub name: String,
    pub description: String,
    permissions: PermissionSet,
}

impl Role {
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn allows(&self, permission: &str) -> bool {
        self.permissions.allows(permission)
    }
}

/// Display metadata for a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleMetadata {
    pub key: String,
    pub name: String,
    pub description: String,
    pub permissions: Vec<String>,
}

/// Read-only registry of roles, built once from configuration
#[derive(Debug, Clone)]
pub struct RoleDirectory {
    roles: BTreeMap<String, Role>,
    owner_role: String,
    default_role: String,
    available_permissions: Vec<String>,
}

impl RoleDirectory {
    pub fn from_config(config: &RolesConfig) -> Self {
        let roles = config
            .definitions
            .iter()
            .map(|(key, def)| {
                let role = Role {
                    key: key.clone(),
                    name: def.name.clone(),
                    description: def.description.clone(),
                    permissions: PermissionSet::new(&def.permissions),
                };
                (key.clone(), role)
            })
            .collect();

        Self {
            roles,
            owner_role: config.owner_role.clone(),
            default_role: config.default_role.clone(),
            available_permissions: config.available_permissions.clone(),
        }
    }

    pub fn role(&self, key: &str) -> Option<&Role> {
        self.roles.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.roles.contains_key(key)
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    pub fn metadata(&self, key: &str) -> Option<RoleMetadata> {
        self.roles.get(key).map(|role| RoleMetadata {
            key: role.key.clone(),
            name: role.name.clone(),
            description: role.description.clone(),
            permissions: role.permissions.to_strings(),
        })
    }

    /// Metadata for every role, ordered by key
    pub fn all_metadata(&self) -> Vec<RoleMetadata> {
        self.roles.keys().filter_map(|key| self.metadata(key)).collect()
    }

    /// Permission strings of a role; unknown roles have none
    pub fn permissions_for(&self, key: &str) -> Vec<String> {
        self.roles
            .get(key)
            .map(|role| role.permissions.to_strings())
            .unwrap_or_default()
    }

    /// Whether `role` grants `permission`. Unknown roles grant nothing.
    pub fn role_allows(&self, role: &str, permission: &str) -> bool {
        self.roles
            .get(role)
            .map(|r| r.allows(permission))
            .unwrap_or(false)
    }

    pub fn owner_role(&self) -> &str {
        &self.owner_role
    }

    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    pub fn available_permissions(&self) -> &[String] {
        &self.available_permissions
    }
}

impl Default for RoleDirectory {
    fn default() -> Self {
        Self::from_config(&RolesConfig::default())
    }
}

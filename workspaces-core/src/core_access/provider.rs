//! Pluggable permission providers
//!
//! [`ConfigPermissionProvider`] answers from the configured role table and
//! stored memberships. Hosts with their own authorization backend implement
//! [`PermissionProvider`] and install it on the [`PermissionManager`].

use super::roles::{RoleDirectory, RoleMetadata};
use crate::core_workspace::error::WorkspaceError;
use crate::core_workspace::membership::MembershipStore;
use crate::core_workspace::types::{UserId, WorkspaceId};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Answers role and permission questions for a user within a workspace.
///
/// Non-members have no role and no permissions.
pub trait PermissionProvider: Send + Sync {
    fn has_permission(&self, user: &UserId, workspace: &WorkspaceId, permission: &str) -> Result<bool, WorkspaceError>;

    /// The permission patterns in effect for the user
    fn permissions(&self, user: &UserId, workspace: &WorkspaceId) -> Result<Vec<String>, WorkspaceError>;

    fn role(&self, user: &UserId, workspace: &WorkspaceId) -> Result<Option<String>, WorkspaceError>;

    /// Whether the user holds any of `roles`
    fn has_role(&self, user: &UserId, workspace: &WorkspaceId, roles: &[&str]) -> Result<bool, WorkspaceError> {
        Ok(self
            .role(user, workspace)?
            .is_some_and(|role| roles.contains(&role.as_str())))
    }

    fn assign_role(&self, user: &UserId, workspace: &WorkspaceId, role: &str) -> Result<(), WorkspaceError>;

    fn remove_role(&self, user: &UserId, workspace: &WorkspaceId) -> Result<(), WorkspaceError>;

    fn available_roles(&self) -> Vec<String>;

    fn available_permissions(&self) -> Vec<String>;
}

/// Role table from configuration, memberships from the store
#[derive(Clone)]
pub struct ConfigPermissionProvider {
    memberships: MembershipStore,
}

impl ConfigPermissionProvider {
    pub fn new(memberships: MembershipStore) -> Self {
        Self { memberships }
    }

    fn roles(&self) -> &RoleDirectory {
        self.memberships.roles()
    }

    pub fn role_metadata(&self) -> Vec<RoleMetadata> {
        self.roles().all_metadata()
    }
}

impl PermissionProvider for ConfigPermissionProvider {
    fn has_permission(&self, user: &UserId, workspace: &WorkspaceId, permission: &str) -> Result<bool, WorkspaceError> {
        let allowed = match self.memberships.membership(workspace, user)? {
            Some(membership) => membership.has_permission(self.roles(), permission),
            None => false,
        };
        debug!(user_id = %user, workspace_id = %workspace, permission, allowed, "Permission check");
        Ok(allowed)
    }

    fn permissions(&self, user: &UserId, workspace: &WorkspaceId) -> Result<Vec<String>, WorkspaceError> {
        Ok(self
            .memberships
            .membership(workspace, user)?
            .map(|m| m.effective_permissions(self.roles()))
            .unwrap_or_default())
    }

    fn role(&self, user: &UserId, workspace: &WorkspaceId) -> Result<Option<String>, WorkspaceError> {
        self.memberships.role_in(user, workspace)
    }

    fn assign_role(&self, user: &UserId, workspace: &WorkspaceId, role: &str) -> Result<(), WorkspaceError> {
        self.memberships.update_role(workspace, user, role)
    }

    fn remove_role(&self, user: &UserId, workspace: &WorkspaceId) -> Result<(), WorkspaceError> {
        self.memberships.remove_member(workspace, user)?;
        Ok(())
    }

    fn available_roles(&self) -> Vec<String> {
        self.roles().role_names()
    }

    fn available_permissions(&self) -> Vec<String> {
        self.roles().available_permissions().to_vec()
    }
}

/// Front for the installed provider; cheap to clone and share
#[derive(Clone)]
pub struct PermissionManager {
    provider: Arc<RwLock<Arc<dyn PermissionProvider>>>,
}

impl PermissionManager {
    pub fn new(provider: Arc<dyn PermissionProvider>) -> Self {
        Self {
            provider: Arc::new(RwLock::new(provider)),
        }
    }

    /// Manager backed by [`ConfigPermissionProvider`]
    pub fn from_memberships(memberships: MembershipStore) -> Self {
        Self::new(Arc::new(ConfigPermissionProvider::new(memberships)))
    }

    pub fn provider(&self) -> Arc<dyn PermissionProvider> {
        match self.provider.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the provider for every clone of this manager
    pub fn set_provider(&self, provider: Arc<dyn PermissionProvider>) {
        match self.provider.write() {
            Ok(mut guard) => *guard = provider,
            Err(poisoned) => *poisoned.into_inner() = provider,
        }
        info!("Permission provider replaced");
    }
}

impl PermissionProvider for PermissionManager {
    fn has_permission(&self, user: &UserId, workspace: &WorkspaceId, permission: &str) -> Result<bool, WorkspaceError> {
        self.provider().has_permission(user, workspace, permission)
    }

    fn permissions(&self, user: &UserId, workspace: &WorkspaceId) -> Result<Vec<String>, WorkspaceError> {
        self.provider().permissions(user, workspace)
    }

    fn role(&self, user: &UserId, workspace: &WorkspaceId) -> Result<Option<String>, WorkspaceError> {
        self.provider().role(user, workspace)
    }

    fn has_role(&self, user: &UserId, workspace: &WorkspaceId, roles: &[&str]) -> Result<bool, WorkspaceError> {
        self.provider().has_role(user, workspace, roles)
    }

    fn assign_role(&self, user: &UserId, workspace: &WorkspaceId, role: &str) -> Result<(), WorkspaceError> {
        self.provider().assign_role(user, workspace, role)
    }

    fn remove_role(&self, user: &UserId, workspace: &WorkspaceId) -> Result<(), WorkspaceError> {
        self.provider().remove_role(user, workspace)
    }

    fn available_roles(&self) -> Vec<String> {
        self.provider().available_roles()
    }

    fn available_permissions(&self) -> Vec<String> {
        self.provider().available_permissions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_workspace::storage::WorkspaceSqlStore;
    use crate::core_workspace::workspace::NewWorkspace;
    use crate::core_workspace::WorkspaceManager;

    fn setup() -> (WorkspaceManager, WorkspaceId) {
        let store = WorkspaceSqlStore::memory().unwrap();
        let memberships = MembershipStore::new(store, Arc::new(RoleDirectory::default()));
        let manager = WorkspaceManager::new(memberships);
        let ws = manager
            .create_workspace(NewWorkspace::named("Acme"), &UserId::new("owner"))
            .unwrap();
        (manager, ws.id)
    }

    #[test]
    fn test_role_based_permissions() {
        let (manager, ws) = setup();
        let bob = UserId::new("bob");
        manager.memberships().add_member(&ws, &bob, Some("admin"), false).unwrap();
        let provider = ConfigPermissionProvider::new(manager.memberships().clone());

        assert!(provider.has_permission(&UserId::new("owner"), &ws, "anything.at.all").unwrap());
        assert!(provider.has_permission(&bob, &ws, "members.invite").unwrap());
        assert!(!provider.has_permission(&bob, &ws, "workspace.delete").unwrap());
        assert!(!provider.has_permission(&UserId::new("stranger"), &ws, "workspace.view").unwrap());
        assert!(provider.permissions(&UserId::new("stranger"), &ws).unwrap().is_empty());
    }

    #[test]
    fn test_override_replaces_role_permissions() {
        let (manager, ws) = setup();
        let bob = UserId::new("bob");
        let memberships = manager.memberships();
        memberships.add_member(&ws, &bob, Some("admin"), false).unwrap();
        memberships
            .set_permission_override(&ws, &bob, vec!["reports.view".to_string()])
            .unwrap();
        let provider = ConfigPermissionProvider::new(memberships.clone());

        assert!(provider.has_permission(&bob, &ws, "reports.view").unwrap());
        assert!(!provider.has_permission(&bob, &ws, "members.invite").unwrap());
        assert_eq!(provider.permissions(&bob, &ws).unwrap(), vec!["reports.view".to_string()]);

        memberships.set_permission_override(&ws, &bob, Vec::new()).unwrap();
        assert!(provider.has_permission(&bob, &ws, "members.invite").unwrap());
    }

    #[test]
    fn test_roles_assign_and_remove() {
        let (manager, ws) = setup();
        let bob = UserId::new("bob");
        manager.memberships().add_member(&ws, &bob, None, false).unwrap();
        let provider = ConfigPermissionProvider::new(manager.memberships().clone());

        assert!(provider.has_role(&bob, &ws, &["member", "guest"]).unwrap());
        assert!(!provider.has_role(&bob, &ws, &["admin"]).unwrap());

        provider.assign_role(&bob, &ws, "admin").unwrap();
        assert_eq!(provider.role(&bob, &ws).unwrap().as_deref(), Some("admin"));
        assert!(matches!(
            provider.assign_role(&bob, &ws, "wizard"),
            Err(WorkspaceError::UnknownRole(_))
        ));

        provider.remove_role(&bob, &ws).unwrap();
        assert!(provider.role(&bob, &ws).unwrap().is_none());
        assert!(!provider.has_role(&bob, &ws, &["admin"]).unwrap());
    }

    struct DenyAll;

    impl PermissionProvider for DenyAll {
        fn has_permission(&self, _: &UserId, _: &WorkspaceId, _: &str) -> Result<bool, WorkspaceError> {
            Ok(false)
        }
        fn permissions(&self, _: &UserId, _: &WorkspaceId) -> Result<Vec<String>, WorkspaceError> {
            Ok(Vec::new())
        }
        fn role(&self, _: &UserId, _: &WorkspaceId) -> Result<Option<String>, WorkspaceError> {
            Ok(None)
        }
        fn assign_role(&self, _: &UserId, _: &WorkspaceId, _: &str) -> Result<(), WorkspaceError> {
            Err(WorkspaceError::AccessDenied("read-only provider".into()))
        }
        fn remove_role(&self, _: &UserId, _: &WorkspaceId) -> Result<(), WorkspaceError> {
            Ok(())
        }
        fn available_roles(&self) -> Vec<String> {
            Vec::new()
        }
        fn available_permissions(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_manager_swaps_provider_for_all_clones() {
        let (manager, ws) = setup();
        let permissions = PermissionManager::from_memberships(manager.memberships().clone());
        let shared = permissions.clone();
        let owner = UserId::new("owner");

        assert!(shared.has_permission(&owner, &ws, "workspace.delete").unwrap());
        assert_eq!(shared.available_roles(), vec!["admin", "guest", "member", "owner"]);

        permissions.set_provider(Arc::new(DenyAll));
        assert!(!shared.has_permission(&owner, &ws, "workspace.delete").unwrap());
        assert!(shared.available_roles().is_empty());
    }
}

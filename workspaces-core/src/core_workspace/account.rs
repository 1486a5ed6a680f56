//! A user's view of their workspaces

use super::error::WorkspaceError;
use super::membership::{Membership, MembershipStore};
use super::types::WorkspaceId;
use super::workspace::Workspace;
use crate::core_access::provider::PermissionProvider;
use crate::core_tenancy::context::Principal;

/// Workspace operations for one signed-in user
#[derive(Clone)]
pub struct UserAccount {
    principal: Principal,
    memberships: MembershipStore,
}

impl UserAccount {
    pub fn new(principal: Principal, memberships: MembershipStore) -> Self {
        Self {
            principal,
            memberships,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn current_workspace(&self) -> Result<Option<Workspace>, WorkspaceError> {
        self.memberships.current_workspace(&self.principal.id)
    }

    /// Returns `false` if the user is not a member of `workspace`
    pub fn switch_workspace(&self, workspace: &WorkspaceId) -> Result<bool, WorkspaceError> {
        self.memberships.switch_current(&self.principal.id, workspace)
    }

    pub fn belongs_to(&self, workspace: &WorkspaceId) -> Result<bool, WorkspaceError> {
        self.memberships.belongs_to(&self.principal.id, workspace)
    }

    pub fn role_in(&self, workspace: &WorkspaceId) -> Result<Option<String>, WorkspaceError> {
        self.memberships.role_in(&self.principal.id, workspace)
    }

    pub fn has_role(&self, workspace: &WorkspaceId, roles: &[&str]) -> Result<bool, WorkspaceError> {
        Ok(self
            .role_in(workspace)?
            .is_some_and(|role| roles.contains(&role.as_str())))
    }

    pub fn is_owner(&self, workspace: &WorkspaceId) -> Result<bool, WorkspaceError> {
        let owner_role = self.memberships.roles().owner_role();
        self.has_role(workspace, &[owner_role])
    }

    /// Owner or admin
    pub fn is_admin(&self, workspace: &WorkspaceId) -> Result<bool, WorkspaceError> {
        let owner_role = self.memberships.roles().owner_role();
        self.has_role(workspace, &[owner_role, "admin"])
    }

    pub fn leave(&self, workspace: &WorkspaceId) -> Result<(), WorkspaceError> {
        self.memberships.leave(workspace, &self.principal.id)
    }

    /// All memberships, in join order
    pub fn workspaces(&self) -> Result<Vec<Membership>, WorkspaceError> {
        self.memberships.memberships_for(&self.principal.id)
    }

    pub fn has_permission(
        &self,
        provider: &dyn PermissionProvider,
        workspace: &WorkspaceId,
        permission: &str,
    ) -> Result<bool, WorkspaceError> {
        provider.has_permission(&self.principal.id, workspace, permission)
    }
}

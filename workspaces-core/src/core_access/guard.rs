//! Request guards: membership, role and permission checks against the
//! request's current workspace

use super::provider::{PermissionManager, PermissionProvider};
use crate::core_tenancy::context::{Principal, WorkspaceContext};
use crate::core_workspace::error::WorkspaceError;
use crate::core_workspace::membership::{Membership, MembershipStore};
use crate::core_workspace::workspace::Workspace;
use tracing::debug;

#[derive(Clone)]
pub struct AccessGuard {
    memberships: MembershipStore,
    permissions: PermissionManager,
}

impl AccessGuard {
    pub fn new(memberships: MembershipStore, permissions: PermissionManager) -> Self {
        Self {
            memberships,
            permissions,
        }
    }

    fn require<'a>(
        ctx: &'a WorkspaceContext,
        principal: Option<&'a Principal>,
    ) -> Result<(&'a Workspace, &'a Principal), WorkspaceError> {
        let workspace = ctx.current().ok_or(WorkspaceError::MissingTenancyContext)?;
        let principal =
            principal.ok_or_else(|| WorkspaceError::AccessDenied("authentication required".to_string()))?;
        Ok((workspace, principal))
    }

    /// The principal must be a member of the current workspace
    pub fn ensure_access(
        &self,
        ctx: &WorkspaceContext,
        principal: Option<&Principal>,
    ) -> Result<Membership, WorkspaceError> {
        let (workspace, principal) = Self::require(ctx, principal)?;
        match self.memberships.membership(&workspace.id, &principal.id)? {
            Some(membership) => Ok(membership),
            None => {
                debug!(user_id = %principal.id, workspace_id = %workspace.id, "Access denied: not a member");
                Err(WorkspaceError::AccessDenied(
                    "you do not have access to this workspace".to_string(),
                ))
            }
        }
    }

    /// The principal must hold one of `roles` in the current workspace
    pub fn ensure_role(
        &self,
        ctx: &WorkspaceContext,
        principal: Option<&Principal>,
        roles: &[&str],
    ) -> Result<(), WorkspaceError> {
        let (workspace, principal) = Self::require(ctx, principal)?;
        if self.permissions.has_role(&principal.id, &workspace.id, roles)? {
            return Ok(());
        }
        debug!(user_id = %principal.id, workspace_id = %workspace.id, ?roles, "Access denied: role");
        Err(WorkspaceError::AccessDenied(
            "you do not have the required role for this action".to_string(),
        ))
    }

    pub fn ensure_permission(
        &self,
        ctx: &WorkspaceContext,
        principal: Option<&Principal>,
        permission: &str,
    ) -> Result<(), WorkspaceError> {
        let (workspace, principal) = Self::require(ctx, principal)?;
        if self.permissions.has_permission(&principal.id, &workspace.id, permission)? {
            return Ok(());
        }
        debug!(user_id = %principal.id, workspace_id = %workspace.id, permission, "Access denied: permission");
        Err(WorkspaceError::AccessDenied(format!("missing permission {permission}")))
    }
}

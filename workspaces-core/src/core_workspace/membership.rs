//! Memberships and the current-workspace invariant
//!
//! A user holds at most one membership with `is_current = true`. Every
//! operation that touches the flag clears the user's current membership and
//! sets the new one inside one `IMMEDIATE` transaction, then re-counts before
//! committing. The partial unique index on `(user_id) WHERE is_current = 1`
//! backs this up at the storage level.

use super::error::WorkspaceError;
use super::events::{EventBroadcaster, WorkspaceEvent};
use super::storage::sql_store as sql;
use super::storage::WorkspaceSqlStore;
use super::types::{MembershipId, Timestamp, UserId, WorkspaceId};
use super::workspace::Workspace;
use crate::core_access::policy::PermissionSet;
use crate::core_access::roles::RoleDirectory;
use crate::metrics;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Links one user to one workspace with a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,

    /// Key into the role directory
    pub role: String,

    /// When non-empty, replaces the role's permissions entirely
    pub permissions: Option<Vec<String>>,

    pub is_current: bool,
    pub joined_at: Timestamp,
}

impl Membership {
    pub fn new(workspace_id: WorkspaceId, user_id: UserId, role: impl Into<String>) -> Self {
        Self {
            id: MembershipId::generate(),
            workspace_id,
            user_id,
            role: role.into(),
            permissions: None,
            is_current: false,
            joined_at: Timestamp::now(),
        }
    }

    /// The override list, if one is set and non-empty
    pub fn permission_override(&self) -> Option<&[String]> {
        self.permissions
            .as_deref()
            .filter(|list| !list.is_empty())
    }

    /// Override list if present, otherwise the role's configured permissions
    pub fn effective_permissions(&self, roles: &RoleDirectory) -> Vec<String> {
        match self.permission_override() {
            Some(list) => list.to_vec(),
            None => roles.permissions_for(&self.role),
        }
    }

    pub fn has_permission(&self, roles: &RoleDirectory, permission: &str) -> bool {
        match self.permission_override() {
            Some(list) => PermissionSet::new(list).allows(permission),
            None => roles.role_allows(&self.role, permission),
        }
    }
}

/// Fail with `InvariantViolation` unless the user has at most one current membership
pub(crate) fn verify_singleton(conn: &Connection, user: &UserId) -> Result<(), WorkspaceError> {
    let current = sql::count_current(conn, user)?;
    if current > 1 {
        metrics::record(metrics::INVARIANT_VIOLATIONS);
        error!(user_id = %user, current, "User has more than one current membership");
        return Err(WorkspaceError::InvariantViolation(format!(
            "user {user} has {current} current memberships"
        )));
    }
    Ok(())
}

/// Clear-then-set the user's current membership on an open transaction.
///
/// Returns `false` without touching anything when the user is not a member
/// of a live workspace `workspace`.
pub(crate) fn switch_current_in(
    conn: &Connection,
    workspace: &WorkspaceId,
    user: &UserId,
) -> Result<bool, WorkspaceError> {
    if sql::get_workspace(conn, workspace)?.is_none()
        || sql::get_membership(conn, workspace, user)?.is_none()
    {
        return Ok(false);
    }

    sql::clear_current(conn, user)?;
    if sql::set_current(conn, workspace, user)? != 1 {
        return Err(WorkspaceError::InvariantViolation(format!(
            "membership of {user} in {workspace} vanished mid-switch"
        )));
    }
    verify_singleton(conn, user)?;
    Ok(true)
}

/// Insert a membership on an open transaction
pub(crate) fn insert_member_in(
    conn: &Connection,
    roles: &RoleDirectory,
    workspace: &WorkspaceId,
    user: &UserId,
    role: &str,
    set_as_current: bool,
) -> Result<Membership, WorkspaceError> {
    if !roles.contains(role) {
        return Err(WorkspaceError::UnknownRole(role.to_string()));
    }
    if sql::get_workspace(conn, workspace)?.is_none() {
        return Err(WorkspaceError::NotFound(format!("workspace {workspace}")));
    }
    if sql::get_membership(conn, workspace, user)?.is_some() {
        return Err(WorkspaceError::AlreadyMember);
    }

    let mut membership = Membership::new(workspace.clone(), user.clone(), role);
    if set_as_current {
        sql::clear_current(conn, user)?;
        membership.is_current = true;
    }
    sql::insert_membership(conn, &membership)?;
    if set_as_current {
        verify_singleton(conn, user)?;
    }
    Ok(membership)
}

/// Membership operations backed by the SQL store
#[derive(Clone)]
pub struct MembershipStore {
    store: WorkspaceSqlStore,
    roles: Arc<RoleDirectory>,
    events: EventBroadcaster,
}

impl MembershipStore {
    pub fn new(store: WorkspaceSqlStore, roles: Arc<RoleDirectory>) -> Self {
        Self {
            store,
            roles,
            events: EventBroadcaster::default(),
        }
    }

    /// Emit through `events` instead of a private broadcaster
    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.events = events;
        self
    }

    /// Shared with the manager and invitation lifecycle built on this store
    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn roles(&self) -> &RoleDirectory {
        &self.roles
    }

    pub(crate) fn sql(&self) -> &WorkspaceSqlStore {
        &self.store
    }

    /// Make `workspace` the user's current workspace.
    ///
    /// Returns `Ok(false)` and changes nothing if the user is not a member.
    pub fn switch_current(&self, user: &UserId, workspace: &WorkspaceId) -> Result<bool, WorkspaceError> {
        let outcome = self.store.write(|tx| {
            let previous = sql::get_current_membership(tx, user)?.map(|m| m.workspace_id);
            let switched = switch_current_in(tx, workspace, user)?;
            Ok::<_, WorkspaceError>(switched.then_some(previous))
        })?;

        let Some(previous) = outcome else {
            metrics::record(metrics::SWITCH_REJECTED);
            debug!(user_id = %user, workspace_id = %workspace, "Switch refused: not a member");
            return Ok(false);
        };

        metrics::record(metrics::SWITCH_TOTAL);
        info!(
            user_id = %user,
            workspace_id = %workspace,
            previous = ?previous,
            "Switched current workspace"
        );
        self.events.emit(WorkspaceEvent::WorkspaceSwitched {
            user_id: user.clone(),
            workspace_id: workspace.clone(),
            previous,
        });
        Ok(true)
    }

    /// Add a user to a workspace. `role` defaults to the configured default role.
    pub fn add_member(
        &self,
        workspace: &WorkspaceId,
        user: &UserId,
        role: Option<&str>,
        set_as_current: bool,
    ) -> Result<Membership, WorkspaceError> {
        let role = role.unwrap_or(self.roles.default_role());
        let membership = self
            .store
            .write(|tx| insert_member_in(tx, &self.roles, workspace, user, role, set_as_current))?;

        info!(
            user_id = %user,
            workspace_id = %workspace,
            role,
            is_current = membership.is_current,
            "Member added"
        );
        self.events.emit(WorkspaceEvent::MemberAdded {
            workspace_id: workspace.clone(),
            user_id: user.clone(),
            role: membership.role.clone(),
        });
        Ok(membership)
    }

    /// Remove a membership. Its current flag goes with the row.
    pub fn remove_member(&self, workspace: &WorkspaceId, user: &UserId) -> Result<bool, WorkspaceError> {
        let removed = self.store.write(|tx| sql::delete_membership(tx, workspace, user))? > 0;
        if removed {
            info!(user_id = %user, workspace_id = %workspace, "Member removed");
            self.emit_removed(workspace, user);
        }
        Ok(removed)
    }

    /// Leave a workspace voluntarily; owners must transfer ownership first
    pub fn leave(&self, workspace: &WorkspaceId, user: &UserId) -> Result<(), WorkspaceError> {
        let owner_role = self.roles.owner_role().to_string();
        self.store.write(|tx| {
            let membership = sql::get_membership(tx, workspace, user)?.ok_or(WorkspaceError::NotAMember)?;
            if membership.role == owner_role {
                return Err(WorkspaceError::OwnerCannotLeave);
            }
            sql::delete_membership(tx, workspace, user)?;
            Ok(())
        })?;

        info!(user_id = %user, workspace_id = %workspace, "Member left workspace");
        self.emit_removed(workspace, user);
        Ok(())
    }

    fn emit_removed(&self, workspace: &WorkspaceId, user: &UserId) {
        self.events.emit(WorkspaceEvent::MemberRemoved {
            workspace_id: workspace.clone(),
            user_id: user.clone(),
        });
    }

    pub fn update_role(&self, workspace: &WorkspaceId, user: &UserId, role: &str) -> Result<(), WorkspaceError> {
        if !self.roles.contains(role) {
            return Err(WorkspaceError::UnknownRole(role.to_string()));
        }

        let previous = self.store.write(|tx| {
            let membership = sql::get_membership(tx, workspace, user)?.ok_or(WorkspaceError::NotAMember)?;
            sql::update_membership_role(tx, workspace, user, role)?;
            Ok::<_, WorkspaceError>(membership.role)
        })?;

        info!(user_id = %user, workspace_id = %workspace, from = %previous, to = role, "Member role updated");
        self.events.emit(WorkspaceEvent::MemberRoleUpdated {
            workspace_id: workspace.clone(),
            user_id: user.clone(),
            old_role: previous,
            new_role: role.to_string(),
        });
        Ok(())
    }

    /// Replace the member's permissions wholesale; an empty list restores the role's
    pub fn set_permission_override(
        &self,
        workspace: &WorkspaceId,
        user: &UserId,
        permissions: Vec<String>,
    ) -> Result<(), WorkspaceError> {
        let value = (!permissions.is_empty()).then_some(permissions);
        let updated = self
            .store
            .write(|tx| sql::update_membership_permissions(tx, workspace, user, &value))?;
        if updated == 0 {
            return Err(WorkspaceError::NotAMember);
        }
        Ok(())
    }

    pub fn membership(&self, workspace: &WorkspaceId, user: &UserId) -> Result<Option<Membership>, WorkspaceError> {
        self.store.read(|conn| sql::get_membership(conn, workspace, user))
            .map_err(WorkspaceError::from)
    }

    pub fn belongs_to(&self, user: &UserId, workspace: &WorkspaceId) -> Result<bool, WorkspaceError> {
        Ok(self.membership(workspace, user)?.is_some())
    }

    /// The user's role, or `None` for non-members
    pub fn role_in(&self, user: &UserId, workspace: &WorkspaceId) -> Result<Option<String>, WorkspaceError> {
        Ok(self.membership(workspace, user)?.map(|m| m.role))
    }

    pub fn current_membership(&self, user: &UserId) -> Result<Option<Membership>, WorkspaceError> {
        Ok(self.store.read(|conn| sql::get_current_membership(conn, user))?)
    }

    /// The live workspace the user is currently in
    pub fn current_workspace(&self, user: &UserId) -> Result<Option<Workspace>, WorkspaceError> {
        Ok(self.store.read(|conn| sql::get_current_workspace(conn, user))?)
    }

    pub fn memberships_for(&self, user: &UserId) -> Result<Vec<Membership>, WorkspaceError> {
        Ok(self.store.read(|conn| sql::list_memberships_for_user(conn, user))?)
    }

    pub fn members_of(&self, workspace: &WorkspaceId) -> Result<Vec<Membership>, WorkspaceError> {
        Ok(self.store.read(|conn| sql::list_members(conn, workspace))?)
    }

    /// Clear the user's current flag without choosing another
    pub fn forget_current(&self, user: &UserId) -> Result<(), WorkspaceError> {
        self.store.write(|tx| sql::clear_current(tx, user))?;
        Ok(())
    }
}

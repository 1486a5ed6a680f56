//! Invitation lifecycle
//!
//! ```text
//! Pending ──accept──▶ Accepted
//!    │
//!    ├────decline───▶ Declined
//!    │
//!    └──(time)──────▶ Expired   (derived, never stored)
//! ```
//!
//! Cancelling deletes the row. Accepted and Declined are terminal; the
//! storage layer refuses to set both markers.

use super::error::WorkspaceError;
use super::events::WorkspaceEvent;
use super::membership::{insert_member_in, switch_current_in, MembershipStore};
use super::storage::sql_store as sql;
use super::storage::StoreError;
use super::types::{InvitationId, Timestamp, UserId, WorkspaceId};
use super::workspace::Workspace;
use crate::config::InvitationConfig;
use crate::core_access::roles::RoleDirectory;
use crate::core_tenancy::context::Principal;
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// How a resolved invitation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Accepted,
    Declined,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Accepted => write!(f, "accepted"),
            Resolution::Declined => write!(f, "declined"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

#[derive(Debug, Error)]
pub enum InvitationError {
    #[error("Invitation not found")]
    NotFound,

    #[error("Invitation was already {0}")]
    AlreadyAccepted(Resolution),

    #[error("Invitation has expired")]
    Expired,

    #[error("Invitation was sent to a different email address")]
    EmailMismatch,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invitations are disabled")]
    Disabled,

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An offer for an email address to join a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    pub workspace_id: WorkspaceId,
    pub email: String,
    pub role: String,
    pub token: String,
    pub invited_by: Option<UserId>,
    pub expires_at: Timestamp,
    pub accepted_at: Option<Timestamp>,
    pub declined_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Invitation {
    /// Case-insensitive key used to match invitations to users
    pub fn email_key(&self) -> String {
        email_key(&self.email)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    pub fn status(&self, now: Timestamp) -> InvitationStatus {
        if self.accepted_at.is_some() {
            InvitationStatus::Accepted
        } else if self.declined_at.is_some() {
            InvitationStatus::Declined
        } else if self.is_expired(now) {
            InvitationStatus::Expired
        } else {
            InvitationStatus::Pending
        }
    }

    pub fn is_pending(&self, now: Timestamp) -> bool {
        self.status(now) == InvitationStatus::Pending
    }

    fn resolution(&self) -> Option<Resolution> {
        if self.accepted_at.is_some() {
            Some(Resolution::Accepted)
        } else if self.declined_at.is_some() {
            Some(Resolution::Declined)
        } else {
            None
        }
    }

    /// Display name of the invited role, falling back to the capitalized key
    pub fn role_name(&self, roles: &RoleDirectory) -> String {
        match roles.role(&self.role) {
            Some(role) => role.name.clone(),
            None => {
                let mut chars = self.role.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }
}

pub(crate) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), InvitationError> {
    let trimmed = email.trim();
    let mut parts = trimmed.split('@');
    let valid = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    );
    if valid && !trimmed.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        Err(InvitationError::InvalidEmail(email.to_string()))
    }
}

/// What `prune` removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneMode {
    /// Every invitation created longer ago than the given age
    OlderThan(Duration),
    /// Unresolved invitations past their expiry
    ExpiredOnly,
}

/// Invitation transitions backed by the membership store
#[derive(Clone)]
pub struct InvitationLifecycle {
    memberships: MembershipStore,
    config: InvitationConfig,
}

impl InvitationLifecycle {
    pub fn new(memberships: MembershipStore, config: InvitationConfig) -> Self {
        Self { memberships, config }
    }

    pub fn config(&self) -> &InvitationConfig {
        &self.config
    }

    /// Invite `email` to `workspace`. An unresolved, unexpired invitation for
    /// the same address is returned as-is instead of creating another.
    pub fn create(
        &self,
        workspace: &WorkspaceId,
        email: &str,
        role: Option<&str>,
        invited_by: Option<&UserId>,
    ) -> Result<Invitation, InvitationError> {
        self.create_at(workspace, email, role, invited_by, Timestamp::now())
    }

    pub(crate) fn create_at(
        &self,
        workspace: &WorkspaceId,
        email: &str,
        role: Option<&str>,
        invited_by: Option<&UserId>,
        now: Timestamp,
    ) -> Result<Invitation, InvitationError> {
        if !self.config.enabled {
            return Err(InvitationError::Disabled);
        }
        validate_email(email)?;

        let roles = self.memberships.roles();
        let role = role.unwrap_or(roles.default_role());
        if !roles.contains(role) {
            return Err(InvitationError::UnknownRole(role.to_string()));
        }

        let key = email_key(email);
        let (invitation, created) = self.memberships.sql().write(|tx| {
            if sql::get_workspace(tx, workspace)?.is_none() {
                return Err(InvitationError::NotFound);
            }

            if let Some(existing) = sql::get_unresolved_invitation(tx, workspace, &key)? {
                if !existing.is_expired(now) {
                    return Ok((existing, false));
                }
                debug!(invitation_id = %existing.id, "Replacing expired invitation");
                sql::delete_invitation(tx, &existing.id)?;
            }

            let invitation = Invitation {
                id: InvitationId::generate(),
                workspace_id: workspace.clone(),
                email: email.trim().to_string(),
                role: role.to_string(),
                token: ulid::Ulid::new().to_string(),
                invited_by: invited_by.cloned(),
                expires_at: now.saturating_add(self.config.ttl),
                accepted_at: None,
                declined_at: None,
                created_at: now,
            };
            sql::insert_invitation(tx, &invitation)?;
            Ok((invitation, true))
        })?;

        if created {
            metrics::record(metrics::INVITATIONS_CREATED);
            info!(
                invitation_id = %invitation.id,
                workspace_id = %workspace,
                role = %invitation.role,
                expires_at = %invitation.expires_at,
                "Invitation created"
            );
            self.memberships.events().emit(WorkspaceEvent::InvitationCreated {
                workspace_id: workspace.clone(),
                invitation_id: invitation.id.clone(),
                email: invitation.email.clone(),
                role: invitation.role.clone(),
            });
        } else {
            debug!(invitation_id = %invitation.id, "Reusing pending invitation");
        }
        Ok(invitation)
    }

    /// Accept as `principal`, joining the workspace.
    ///
    /// The user becomes a member with the invited role unless already one,
    /// and the workspace becomes current if they had none.
    pub fn accept(&self, token: &str, principal: &Principal) -> Result<Workspace, InvitationError> {
        self.accept_at(token, principal, Timestamp::now())
    }

    pub(crate) fn accept_at(
        &self,
        token: &str,
        principal: &Principal,
        now: Timestamp,
    ) -> Result<Workspace, InvitationError> {
        let roles = self.memberships.roles();
        let (invitation, workspace, joined, switched) = self.memberships.sql().write(|tx| {
            let invitation = sql::get_invitation_by_token(tx, token)?.ok_or(InvitationError::NotFound)?;
            if let Some(resolution) = invitation.resolution() {
                return Err(InvitationError::AlreadyAccepted(resolution));
            }
            if invitation.is_expired(now) {
                return Err(InvitationError::Expired);
            }
            if email_key(&principal.email) != invitation.email_key() {
                return Err(InvitationError::EmailMismatch);
            }

            let workspace = sql::get_workspace(tx, &invitation.workspace_id)?.ok_or(InvitationError::NotFound)?;

            let joined = sql::get_membership(tx, &workspace.id, &principal.id)?.is_none();
            if joined {
                insert_member_in(tx, roles, &workspace.id, &principal.id, &invitation.role, false)?;
            }

            if sql::mark_invitation_accepted(tx, &invitation.id, now)? != 1 {
                return Err(InvitationError::AlreadyAccepted(Resolution::Accepted));
            }

            let switched = sql::get_current_workspace(tx, &principal.id)?.is_none()
                && switch_current_in(tx, &workspace.id, &principal.id)?;
            Ok((invitation, workspace, joined, switched))
        })?;

        metrics::record(metrics::INVITATIONS_ACCEPTED);
        info!(
            invitation_id = %invitation.id,
            workspace_id = %workspace.id,
            user_id = %principal.id,
            joined,
            "Invitation accepted"
        );

        let events = self.memberships.events();
        if joined {
            events.emit(WorkspaceEvent::MemberAdded {
                workspace_id: workspace.id.clone(),
                user_id: principal.id.clone(),
                role: invitation.role.clone(),
            });
        }
        events.emit(WorkspaceEvent::InvitationAccepted {
            workspace_id: workspace.id.clone(),
            invitation_id: invitation.id.clone(),
            user_id: principal.id.clone(),
        });
        if switched {
            events.emit(WorkspaceEvent::WorkspaceSwitched {
                user_id: principal.id.clone(),
                workspace_id: workspace.id.clone(),
                previous: None,
            });
        }
        Ok(workspace)
    }

    /// Decline. Declining twice is a no-op.
    pub fn decline(&self, token: &str) -> Result<(), InvitationError> {
        let changed = self.memberships.sql().write(|tx| {
            let invitation = sql::get_invitation_by_token(tx, token)?.ok_or(InvitationError::NotFound)?;
            match invitation.resolution() {
                Some(Resolution::Accepted) => Err(InvitationError::AlreadyAccepted(Resolution::Accepted)),
                Some(Resolution::Declined) => Ok(None),
                None => {
                    sql::mark_invitation_declined(tx, &invitation.id, Timestamp::now())?;
                    Ok(Some(invitation))
                }
            }
        })?;

        match changed {
            Some(invitation) => {
                metrics::record(metrics::INVITATIONS_DECLINED);
                info!(
                    invitation_id = %invitation.id,
                    workspace_id = %invitation.workspace_id,
                    "Invitation declined"
                );
                self.memberships.events().emit(WorkspaceEvent::InvitationDeclined {
                    workspace_id: invitation.workspace_id,
                    invitation_id: invitation.id,
                });
            }
            None => debug!("Invitation already declined"),
        }
        Ok(())
    }

    /// Withdraw an invitation that has not been accepted; the row is deleted
    pub fn cancel(&self, token: &str) -> Result<(), InvitationError> {
        let invitation = self.memberships.sql().write(|tx| {
            let invitation = sql::get_invitation_by_token(tx, token)?.ok_or(InvitationError::NotFound)?;
            if invitation.accepted_at.is_some() {
                return Err(InvitationError::AlreadyAccepted(Resolution::Accepted));
            }
            sql::delete_invitation(tx, &invitation.id)?;
            Ok(invitation)
        })?;

        metrics::record(metrics::INVITATIONS_CANCELLED);
        info!(
            invitation_id = %invitation.id,
            workspace_id = %invitation.workspace_id,
            "Invitation cancelled"
        );
        self.memberships.events().emit(WorkspaceEvent::InvitationCancelled {
            workspace_id: invitation.workspace_id,
            invitation_id: invitation.id,
        });
        Ok(())
    }

    pub fn find_by_token(&self, token: &str) -> Result<Option<Invitation>, InvitationError> {
        Ok(self.memberships.sql().read(|conn| sql::get_invitation_by_token(conn, token))?)
    }

    /// Unresolved, unexpired invitations of a workspace, oldest first
    pub fn pending_for(&self, workspace: &WorkspaceId) -> Result<Vec<Invitation>, InvitationError> {
        let now = Timestamp::now();
        Ok(self
            .memberships
            .sql()
            .read(|conn| sql::list_pending_invitations(conn, workspace, now))?)
    }

    pub fn acceptance_path(&self, invitation: &Invitation) -> String {
        self.config.acceptance_path.replace("{token}", &invitation.token)
    }

    /// Number of rows `prune` would delete
    pub fn count_prunable(&self, mode: PruneMode) -> Result<usize, InvitationError> {
        let now = Timestamp::now();
        let count = self.memberships.sql().read(|conn| match mode {
            PruneMode::OlderThan(age) => sql::count_invitations_created_before(conn, now.saturating_sub(age)),
            PruneMode::ExpiredOnly => sql::count_expired_invitations(conn, now),
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Delete old or expired invitations, returning how many were removed
    pub fn prune(&self, mode: PruneMode) -> Result<usize, InvitationError> {
        self.prune_at(mode, Timestamp::now())
    }

    pub(crate) fn prune_at(&self, mode: PruneMode, now: Timestamp) -> Result<usize, InvitationError> {
        let removed = self.memberships.sql().write(|tx| match mode {
            PruneMode::OlderThan(age) => sql::delete_invitations_created_before(tx, now.saturating_sub(age)),
            PruneMode::ExpiredOnly => sql::delete_expired_invitations(tx, now),
        })?;

        metrics::record_n(metrics::INVITATIONS_PRUNED, removed as u64);
        info!(removed, mode = ?mode, "Pruned invitations");
        Ok(removed)
    }
}

//! Workspace events
//!
//! Emitted after the owning transaction commits, so a subscriber never sees
//! an event for a change that was rolled back.

pub mod broadcaster;

pub use broadcaster::EventBroadcaster;

use super::types::{InvitationId, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkspaceEvent {
    WorkspaceCreated {
        workspace_id: WorkspaceId,
        owner_id: Option<UserId>,
        personal: bool,
    },

    /// `force` is set for hard deletes
    WorkspaceDeleted {
        workspace_id: WorkspaceId,
        force: bool,
    },

    WorkspaceSwitched {
        user_id: UserId,
        workspace_id: WorkspaceId,
        previous: Option<WorkspaceId>,
    },

    MemberAdded {
        workspace_id: WorkspaceId,
        user_id: UserId,
        role: String,
    },

    /// Removed by someone else, or left voluntarily
    MemberRemoved {
        workspace_id: WorkspaceId,
        user_id: UserId,
    },

    MemberRoleUpdated {
        workspace_id: WorkspaceId,
        user_id: UserId,
        old_role: String,
        new_role: String,
    },

    OwnershipTransferred {
        workspace_id: WorkspaceId,
        previous_owner: Option<UserId>,
        new_owner: UserId,
    },

    InvitationCreated {
        workspace_id: WorkspaceId,
        invitation_id: InvitationId,
        email: String,
        role: String,
    },

    InvitationAccepted {
        workspace_id: WorkspaceId,
        invitation_id: InvitationId,
        user_id: UserId,
    },

    InvitationDeclined {
        workspace_id: WorkspaceId,
        invitation_id: InvitationId,
    },

    InvitationCancelled {
        workspace_id: WorkspaceId,
        invitation_id: InvitationId,
    },
}

impl WorkspaceEvent {
    /// The workspace this event concerns
    pub fn workspace_id(&self) -> &WorkspaceId {
        match self {
            WorkspaceEvent::WorkspaceCreated { workspace_id, .. }
            | WorkspaceEvent::WorkspaceDeleted { workspace_id, .. }
            | WorkspaceEvent::WorkspaceSwitched { workspace_id, .. }
            | WorkspaceEvent::MemberAdded { workspace_id, .. }
            | WorkspaceEvent::MemberRemoved { workspace_id, .. }
            | WorkspaceEvent::MemberRoleUpdated { workspace_id, .. }
            | WorkspaceEvent::OwnershipTransferred { workspace_id, .. }
            | WorkspaceEvent::InvitationCreated { workspace_id, .. }
            | WorkspaceEvent::InvitationAccepted { workspace_id, .. }
            | WorkspaceEvent::InvitationDeclined { workspace_id, .. }
            | WorkspaceEvent::InvitationCancelled { workspace_id, .. } => workspace_id,
        }
    }

    /// The user acted upon, if any
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            WorkspaceEvent::WorkspaceSwitched { user_id, .. }
            | WorkspaceEvent::MemberAdded { user_id, .. }
            | WorkspaceEvent::MemberRemoved { user_id, .. }
            | WorkspaceEvent::MemberRoleUpdated { user_id, .. }
            | WorkspaceEvent::InvitationAccepted { user_id, .. } => Some(user_id),
            WorkspaceEvent::OwnershipTransferred { new_owner, .. } => Some(new_owner),
            WorkspaceEvent::WorkspaceCreated { owner_id, .. } => owner_id.as_ref(),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkspaceEvent::WorkspaceCreated { .. } => "workspace_created",
            WorkspaceEvent::WorkspaceDeleted { .. } => "workspace_deleted",
            WorkspaceEvent::WorkspaceSwitched { .. } => "workspace_switched",
            WorkspaceEvent::MemberAdded { .. } => "member_added",
            WorkspaceEvent::MemberRemoved { .. } => "member_removed",
            WorkspaceEvent::MemberRoleUpdated { .. } => "member_role_updated",
            WorkspaceEvent::OwnershipTransferred { .. } => "ownership_transferred",
            WorkspaceEvent::InvitationCreated { .. } => "invitation_created",
            WorkspaceEvent::InvitationAccepted { .. } => "invitation_accepted",
            WorkspaceEvent::InvitationDeclined { .. } => "invitation_declined",
            WorkspaceEvent::InvitationCancelled { .. } => "invitation_cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = WorkspaceEvent::OwnershipTransferred {
            workspace_id: WorkspaceId::new("w1"),
            previous_owner: Some(UserId::new("alice")),
            new_owner: UserId::new("bob"),
        };
        assert_eq!(event.workspace_id().as_str(), "w1");
        assert_eq!(event.user_id(), Some(&UserId::new("bob")));
        assert_eq!(event.name(), "ownership_transferred");

        let declined = WorkspaceEvent::InvitationDeclined {
            workspace_id: WorkspaceId::new("w1"),
            invitation_id: InvitationId::new("i1"),
        };
        assert_eq!(declined.user_id(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = WorkspaceEvent::MemberRoleUpdated {
            workspace_id: WorkspaceId::new("w1"),
            user_id: UserId::new("bob"),
            old_role: "member".into(),
            new_role: "admin".into(),
        };

        let serialized = serde_json::to_string(&event).unwrap();
        let deserialized: WorkspaceEvent = serde_json::from_str(&serialized).unwrap();
        assert_eq!(event, deserialized);
    }
}

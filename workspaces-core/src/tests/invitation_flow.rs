//! Invitation lifecycle, end to end
//!
//! Owner creates a workspace, invites an address, and the invitee joins by
//! accepting. Covers double accept, decline, cancel and expiry.

use super::in_memory;
use crate::config::Config;
use crate::core_access::provider::PermissionProvider;
use crate::core_tenancy::context::Principal;
use crate::core_workspace::invitation::{InvitationError, InvitationStatus, PruneMode, Resolution};
use crate::core_workspace::types::{Timestamp, UserId};
use crate::core_workspace::workspace::NewWorkspace;
use std::time::Duration;

fn principal(id: &str, email: &str) -> Principal {
    Principal::new(UserId::new(id), email)
}

#[test]
fn test_invite_and_accept_golden_path() {
    let ws = in_memory(&Config::default());
    let owner = principal("owner", "owner@example.com");
    let invitee = principal("u", "E@example.com");

    // Owner creates W and is its current, owning member
    let w = ws.manager().create_workspace(NewWorkspace::named("W"), &owner.id).unwrap();
    let owner_membership = ws.memberships().membership(&w.id, &owner.id).unwrap().unwrap();
    assert_eq!(owner_membership.role, "owner");
    assert!(owner_membership.is_current);
    println!("✓ Owner created workspace {}", w.slug);

    // Invite E as member
    let invitation = ws
        .invitations()
        .create(&w.id, "e@example.com", Some("member"), Some(&owner.id))
        .unwrap();
    assert_eq!(invitation.status(Timestamp::now()), InvitationStatus::Pending);
    assert_eq!(ws.invitations().pending_for(&w.id).unwrap().len(), 1);
    println!("✓ Invitation issued");

    // U, who has no current workspace, accepts
    assert!(ws.memberships().current_workspace(&invitee.id).unwrap().is_none());
    let joined = ws.invitations().accept(&invitation.token, &invitee).unwrap();
    assert_eq!(joined.id, w.id);

    assert_eq!(ws.memberships().role_in(&invitee.id, &w.id).unwrap().as_deref(), Some("member"));
    assert_eq!(
        ws.memberships().current_workspace(&invitee.id).unwrap().map(|w| w.id),
        Some(w.id.clone())
    );
    assert!(ws.permissions().has_permission(&invitee.id, &w.id, "members.view").unwrap());
    assert!(!ws.permissions().has_permission(&invitee.id, &w.id, "members.invite").unwrap());
    assert!(ws.invitations().pending_for(&w.id).unwrap().is_empty());
    println!("✓ Invitee joined and switched into the workspace");

    // Owner's current workspace is untouched
    assert_eq!(
        ws.memberships().current_workspace(&owner.id).unwrap().map(|w| w.id),
        Some(w.id.clone())
    );
}

#[test]
fn test_double_accept_does_not_duplicate_membership() {
    let ws = in_memory(&Config::default());
    let owner = UserId::new("owner");
    let bob = principal("bob", "bob@example.com");
    let w = ws.manager().create_workspace(NewWorkspace::named("W"), &owner).unwrap();

    let invitation = ws.invitations().create(&w.id, "bob@example.com", None, None).unwrap();
    ws.invitations().accept(&invitation.token, &bob).unwrap();

    let second = ws.invitations().accept(&invitation.token, &bob);
    assert!(matches!(second, Err(InvitationError::AlreadyAccepted(Resolution::Accepted))));

    let bob_rows = ws
        .memberships()
        .members_of(&w.id)
        .unwrap()
        .into_iter()
        .filter(|m| m.user_id == bob.id)
        .count();
    assert_eq!(bob_rows, 1);
}

#[test]
fn test_decline_twice_is_a_noop() {
    let ws = in_memory(&Config::default());
    let w = ws
        .manager()
        .create_workspace(NewWorkspace::named("W"), &UserId::new("owner"))
        .unwrap();
    let invitation = ws.invitations().create(&w.id, "bob@example.com", None, None).unwrap();

    ws.invitations().decline(&invitation.token).unwrap();
    let declined = ws.invitations().find_by_token(&invitation.token).unwrap().unwrap();
    ws.invitations().decline(&invitation.token).unwrap();
    let again = ws.invitations().find_by_token(&invitation.token).unwrap().unwrap();

    assert_eq!(declined, again);
    assert_eq!(again.status(Timestamp::now()), InvitationStatus::Declined);
}

#[test]
fn test_expired_invitation_cannot_be_accepted() {
    let mut config = Config::default();
    config.invitations.ttl = Duration::from_millis(1);
    let ws = in_memory(&config);
    let bob = principal("bob", "bob@example.com");
    let w = ws
        .manager()
        .create_workspace(NewWorkspace::named("W"), &UserId::new("owner"))
        .unwrap();

    let invitation = ws.invitations().create(&w.id, "bob@example.com", None, None).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(invitation.status(Timestamp::now()), InvitationStatus::Expired);
    assert!(matches!(
        ws.invitations().accept(&invitation.token, &bob),
        Err(InvitationError::Expired)
    ));
    assert!(!ws.memberships().belongs_to(&bob.id, &w.id).unwrap());

    // Still stored until pruned
    assert!(ws.invitations().find_by_token(&invitation.token).unwrap().is_some());
    assert_eq!(ws.invitations().prune(PruneMode::ExpiredOnly).unwrap(), 1);
    assert!(ws.invitations().find_by_token(&invitation.token).unwrap().is_none());
}

#[test]
fn test_cancelled_invitation_is_gone() {
    let ws = in_memory(&Config::default());
    let w = ws
        .manager()
        .create_workspace(NewWorkspace::named("W"), &UserId::new("owner"))
        .unwrap();
    let invitation = ws.invitations().create(&w.id, "bob@example.com", None, None).unwrap();

    ws.invitations().cancel(&invitation.token).unwrap();
    assert!(matches!(
        ws.invitations().accept(&invitation.token, &principal("bob", "bob@example.com")),
        Err(InvitationError::NotFound)
    ));
}

#[test]
fn test_force_deleting_workspace_removes_invitations() {
    let ws = in_memory(&Config::default());
    let w = ws
        .manager()
        .create_workspace(NewWorkspace::named("W"), &UserId::new("owner"))
        .unwrap();
    let invitation = ws.invitations().create(&w.id, "bob@example.com", None, None).unwrap();

    ws.manager().delete_workspace(&w.id, true).unwrap();
    assert!(ws.invitations().find_by_token(&invitation.token).unwrap().is_none());
}

//! Workspaces, Memberships & Invitations
//!
//! ## Architecture
//!
//! - **Workspace**: the tenant; owns memberships and invitations
//! - **Membership**: one user in one workspace with a role and an optional
//!   permission override
//! - **Invitation**: an email-addressed offer to join, redeemed by token
//! - **WorkspaceEvent**: broadcast after each committed change
//!
//! ## Key Invariants
//!
//! 1. A user has at most one current membership
//! 2. At most one unresolved invitation per (workspace, email)
//! 3. An invitation is accepted or declined, never both

pub mod account;
pub mod error;
pub mod events;
pub mod invitation;
pub mod manager;
pub mod membership;
pub mod storage;
pub mod types;
pub mod workspace;

pub use account::UserAccount;
pub use error::WorkspaceError;
pub use events::{EventBroadcaster, WorkspaceEvent};
pub use invitation::{Invitation, InvitationError, InvitationLifecycle, InvitationStatus, PruneMode, Resolution};
pub use manager::WorkspaceManager;
pub use membership::{Membership, MembershipStore};
pub use storage::{StoreError, WorkspaceSqlStore};
pub use types::{InvitationId, MembershipId, Timestamp, UserId, WorkspaceId};
pub use workspace::{slugify, NewWorkspace, Workspace};

//! Workspace and membership error types

use super::storage::StoreError;
use thiserror::Error;

/// Errors shared by workspace, membership, scope and access operations
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No current workspace is set for this request")]
    MissingTenancyContext,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Current-workspace invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Invalid workspace name: {0}")]
    InvalidName(String),

    #[error("Invalid slug: {0}")]
    InvalidSlug(String),

    #[error("Slug is already taken: {0}")]
    SlugUnavailable(String),

    #[error("User is already a member of this workspace")]
    AlreadyMember,

    #[error("Owners cannot leave their workspace; transfer ownership or delete it first")]
    OwnerCannotLeave,

    #[error("User is not a member of this workspace")]
    NotAMember,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkspaceError {
    /// Whether the caller can reasonably recover (retry, prompt, pick another input)
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, WorkspaceError::InvariantViolation(_) | WorkspaceError::Store(_))
    }
}

impl From<rusqlite::Error> for WorkspaceError {
    fn from(err: rusqlite::Error) -> Self {
        WorkspaceError::Store(StoreError::Sqlite(err))
    }
}

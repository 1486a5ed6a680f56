//! Request-scoped tenancy state
//!
//! Each request owns its own [`WorkspaceContext`]; nothing here is global,
//! so concurrent requests never see each other's binding.

use crate::core_workspace::types::{UserId, WorkspaceId};
use crate::core_workspace::workspace::Workspace;
use serde::{Deserialize, Serialize};

/// The identity provider's view of the acting user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
}

impl Principal {
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name for display, falling back to the local part of the email
    pub fn display_name(&self) -> &str {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.email.split('@').next().unwrap_or(&self.email),
        }
    }
}

/// The current workspace of one request
#[derive(Debug, Clone, Default)]
pub struct WorkspaceContext {
    current: Option<Workspace>,
}

impl WorkspaceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound_to(workspace: Workspace) -> Self {
        Self {
            current: Some(workspace),
        }
    }

    pub fn current(&self) -> Option<&Workspace> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<&WorkspaceId> {
        self.current.as_ref().map(|ws| &ws.id)
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// Bind `workspace`, returning the previous binding
    pub fn set(&mut self, workspace: Workspace) -> Option<Workspace> {
        self.current.replace(workspace)
    }

    pub fn forget(&mut self) -> Option<Workspace> {
        self.current.take()
    }

    /// Run `f` with `workspace` bound, then put the previous binding back
    pub fn run_as<R>(&mut self, workspace: Workspace, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = std::mem::replace(&mut self.current, Some(workspace));
        let result = f(self);
        self.current = previous;
        result
    }
}

//! Workspace (tenant) model and slug helpers

use super::types::{Timestamp, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// A tenant: the unit of data ownership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,

    /// Display name
    pub name: String,

    /// Globally unique, URL-safe handle
    pub slug: String,

    /// Owning user, if any
    pub owner_id: Option<UserId>,

    /// Arbitrary settings blob
    pub settings: serde_json::Value,

    /// Personal workspaces are auto-created for a single user
    pub personal: bool,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Soft-delete marker
    pub deleted_at: Option<Timestamp>,
}

impl Workspace {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        self.owner_id.as_ref() == Some(user)
    }

    /// Read a top-level settings key
    pub fn setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }
}

/// Input for creating a workspace
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkspace {
    pub name: String,

    /// Explicit slug; derived from the name when absent
    pub slug: Option<String>,

    pub settings: serde_json::Value,
    pub personal: bool,
}

impl NewWorkspace {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: None,
            settings: serde_json::Value::Object(Default::default()),
            personal: false,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn personal(mut self) -> Self {
        self.personal = true;
        self
    }
}

/// Turn a display name into a lowercase, dash-separated slug.
///
/// Characters outside ASCII letters and digits become separators, runs of
/// separators collapse, and leading/trailing separators are dropped. An
/// input with nothing usable yields `"workspace"`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c == '\'' {
            // apostrophes vanish instead of splitting words
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "workspace".to_string()
    } else {
        slug
    }
}

/// Random lowercase alphanumeric suffix used to disambiguate slugs
pub(crate) fn random_suffix(len: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Whether a user-supplied slug is acceptable as-is
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 100
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

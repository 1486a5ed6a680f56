//! Roles, permissions and request guards

pub mod guard;
pub mod policy;
pub mod provider;
pub mod roles;

pub use guard::AccessGuard;
pub use policy::{permits, PermissionPattern, PermissionSet};
pub use provider::{ConfigPermissionProvider, PermissionManager, PermissionProvider};
pub use roles::{Role, RoleDirectory, RoleMetadata};

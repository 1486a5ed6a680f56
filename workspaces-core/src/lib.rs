pub mod config;
pub mod core_access;
pub mod core_tenancy;
pub mod core_workspace;
pub mod logging;
pub mod metrics;
pub mod workspaces;

pub use config::Config;
pub use core_access::{AccessGuard, PermissionManager, PermissionProvider, RoleDirectory};
pub use core_tenancy::{ContextResolutionChain, Principal, TenancyScope, WorkspaceContext};
pub use core_workspace::{
    InvitationError, InvitationLifecycle, MembershipStore, UserAccount, WorkspaceError, WorkspaceManager,
    WorkspaceSqlStore,
};
pub use logging::{init_logging, LogLevel};
pub use workspaces::Workspaces;

#[cfg(test)]
mod tests;

//! Storage layer for workspaces, memberships and invitations
//!
//! Provides SQLite persistence with versioned migrations.

mod error;
pub mod migrations;
pub mod sql_store;

pub use error::StoreError;
pub use migrations::{migrate, rollback_migration, CURRENT_WORKSPACE_SCHEMA_VERSION};
pub use sql_store::WorkspaceSqlStore;

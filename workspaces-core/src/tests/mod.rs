/*
    End-to-end scenarios across workspace, access and tenancy modules

    - Invitation flow from workspace creation to acceptance
    - Request context resolution and scoping
    - Concurrent writers against a file-backed database
    - Property tests for the current-workspace invariant
*/

use crate::config::Config;
use crate::core_workspace::storage::WorkspaceSqlStore;
use crate::workspaces::Workspaces;
use tempfile::TempDir;

pub mod concurrency_tests;
pub mod invitation_flow;

/// Services over a private in-memory database
pub(crate) fn in_memory(config: &Config) -> Workspaces {
    Workspaces::with_store(WorkspaceSqlStore::memory().unwrap(), config)
}

/// Services over a temp-dir database with a multi-connection pool
pub(crate) fn on_disk(config: &Config) -> (Workspaces, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config.clone();
    config.store.database_path = dir.path().join("workspaces.db");
    config.store.pool_size = 8;
    (Workspaces::open(&config).unwrap(), dir)
}

#[test]
fn test_library_exports() {
    let _ = crate::LogLevel::Info;
    let _ = crate::Config::default();
}

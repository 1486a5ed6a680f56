//! Database migrations for workspaces, memberships and invitations
//!
//! Each migration is applied atomically and tracked in the
//! `workspace_schema_version` table.

use super::error::StoreError;
use crate::core_workspace::types::Timestamp;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

/// Current schema version
pub const CURRENT_WORKSPACE_SCHEMA_VERSION: i32 = 2;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
    pub down_sql: Option<&'static str>,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Workspaces and memberships",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS workspaces (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE,
                    owner_id TEXT,
                    settings TEXT NOT NULL DEFAULT '{}',   -- JSON object
                    personal INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER                      -- soft delete marker
                );

                CREATE INDEX IF NOT EXISTS idx_workspaces_owner ON workspaces(owner_id);

                CREATE TABLE IF NOT EXISTS workspace_memberships (
                    id TEXT PRIMARY KEY,
                    workspace_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    permissions TEXT,                       -- JSON array override, NULL = role-derived
                    is_current INTEGER NOT NULL DEFAULT 0 CHECK(is_current IN (0, 1)),
                    joined_at INTEGER NOT NULL,
                    UNIQUE (workspace_id, user_id),
                    FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_memberships_user ON workspace_memberships(user_id);

                -- At most one current membership per user
                CREATE UNIQUE INDEX IF NOT EXISTS idx_memberships_one_current
                    ON workspace_memberships(user_id)
                    WHERE is_current = 1;
            "#,
            down_sql: Some(
                r#"
                DROP INDEX IF EXISTS idx_memberships_one_current;
                DROP INDEX IF EXISTS idx_memberships_user;
                DROP TABLE IF EXISTS workspace_memberships;

                DROP INDEX IF EXISTS idx_workspaces_owner;
                DROP TABLE IF EXISTS workspaces;
            "#,
            ),
        },
        Migration {
            version: 2,
            description: "Workspace invitations",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS workspace_invitations (
                    id TEXT PRIMARY KEY,
                    workspace_id TEXT NOT NULL,
                    email TEXT NOT NULL,
                    email_key TEXT NOT NULL,                -- lowercased email
                    role TEXT NOT NULL,
                    token TEXT NOT NULL UNIQUE,
                    invited_by TEXT,
                    expires_at INTEGER NOT NULL,
                    accepted_at INTEGER,
                    declined_at INTEGER,
                    created_at INTEGER NOT NULL,
                    CHECK (accepted_at IS NULL OR declined_at IS NULL),
                    FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_invitations_workspace ON workspace_invitations(workspace_id);
                CREATE INDEX IF NOT EXISTS idx_invitations_expires ON workspace_invitations(expires_at);
                CREATE INDEX IF NOT EXISTS idx_invitations_created ON workspace_invitations(created_at);

                -- One unresolved invitation per (workspace, email)
                CREATE UNIQUE INDEX IF NOT EXISTS idx_invitations_one_pending
                    ON workspace_invitations(workspace_id, email_key)
                    WHERE accepted_at IS NULL AND declined_at IS NULL;
            "#,
            down_sql: Some(
                r#"
                DROP INDEX IF EXISTS idx_invitations_one_pending;
                DROP INDEX IF EXISTS idx_invitations_created;
                DROP INDEX IF EXISTS idx_invitations_expires;
                DROP INDEX IF EXISTS idx_invitations_workspace;
                DROP TABLE IF EXISTS workspace_invitations;
            "#,
            ),
        },
    ]
}

const VERSION_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS workspace_schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
)";

fn read_version(conn: &Connection) -> Result<i32, StoreError> {
    let version: Option<i32> = conn
        .query_row(
            "SELECT version FROM workspace_schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0))
}

/// Get current schema version from database
pub fn get_current_version(pool: &Pool<SqliteConnectionManager>) -> Result<i32, StoreError> {
    let conn = pool.get()?;
    conn.execute(VERSION_TABLE_SQL, [])?;
    read_version(&conn)
}

/// Run all pending migrations, returning how many were applied
///
/// The version is read and advanced under one write lock, so stores opening
/// the same fresh file concurrently apply each migration exactly once.
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> Result<usize, StoreError> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(VERSION_TABLE_SQL, [])?;

    let current_version = read_version(&tx)?;
    if current_version > get_latest_version() {
        return Err(StoreError::Migration(format!(
            "database schema v{} is newer than this build (v{})",
            current_version,
            get_latest_version()
        )));
    }

    let pending: Vec<_> = get_migrations()
        .into_iter()
        .filter(|m| m.version > current_version)
        .collect();

    if pending.is_empty() {
        tx.commit()?;
        return Ok(0);
    }

    let applied = pending.len();
    for migration in &pending {
        tx.execute_batch(migration.up_sql).map_err(|e| {
            StoreError::Migration(format!("v{} ({}): {}", migration.version, migration.description, e))
        })?;

        tx.execute(
            "INSERT INTO workspace_schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, Timestamp::now().to_sql()],
        )?;
    }
    tx.commit()?;

    for migration in pending {
        info!(
            version = migration.version,
            description = migration.description,
            "Applied workspace schema migration"
        );
    }

    Ok(applied)
}

/// Undo the latest applied migration, which must be `version`
pub fn rollback_migration(pool: &Pool<SqliteConnectionManager>, version: i32) -> Result<(), StoreError> {
    let migration = get_migrations()
        .into_iter()
        .find(|m| m.version == version)
        .ok_or_else(|| StoreError::Migration(format!("migration v{version} not found")))?;

    let down_sql = migration
        .down_sql
        .ok_or_else(|| StoreError::Migration(format!("no rollback available for v{version}")))?;

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(VERSION_TABLE_SQL, [])?;

    let current_version = read_version(&tx)?;
    if current_version != version {
        return Err(StoreError::Migration(format!(
            "cannot roll back v{version}: database is at v{current_version}"
        )));
    }

    tx.execute_batch(down_sql)
        .map_err(|e| StoreError::Migration(format!("rollback of v{version} failed: {e}")))?;
    tx.execute("DELETE FROM workspace_schema_version WHERE version = ?", params![version])?;
    tx.commit()?;

    info!(version, description = migration.description, "Rolled back workspace schema migration");
    Ok(())
}

/// Get the latest migration version available
pub fn get_latest_version() -> i32 {
    get_migrations().iter().map(|m| m.version).max().unwrap_or(0)
}

//! SQL-based storage for workspaces, memberships and invitations
//!
//! `WorkspaceSqlStore` owns the connection pool. Multi-statement writes go
//! through [`WorkspaceSqlStore::write`], which opens an `IMMEDIATE`
//! transaction so concurrent writers serialize on the database lock. The
//! free functions below operate on a borrowed connection (or transaction) and
//! are composed by the managers into larger units of work.

use super::error::StoreError;
use crate::config::StoreConfig;
use crate::core_workspace::invitation::Invitation;
use crate::core_workspace::membership::Membership;
use crate::core_workspace::types::{InvitationId, MembershipId, Timestamp, UserId, WorkspaceId};
use crate::core_workspace::workspace::Workspace;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::time::Duration;

/// SQL-based storage for the workspace model
#[derive(Clone)]
pub struct WorkspaceSqlStore {
    pool: Pool<SqliteConnectionManager>,
}

impl WorkspaceSqlStore {
    /// Create a new SQL store with the given connection pool
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Result<Self, StoreError> {
        super::migrations::migrate(&pool)?;
        Ok(Self { pool })
    }

    /// Open (creating if needed) the database described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Migration(format!(
                        "cannot create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let manager = configure(SqliteConnectionManager::file(&config.database_path), config.busy_timeout);
        let pool = Pool::builder().max_size(config.pool_size).build(manager)?;
        Self::new(pool)
    }

    /// Create a new in-memory store.
    ///
    /// Every pooled in-memory connection would be its own database, so the
    /// pool holds exactly one connection.
    pub fn memory() -> Result<Self, StoreError> {
        let manager = configure(SqliteConnectionManager::memory(), Duration::from_secs(5));
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::new(pool)
    }

    pub fn pool(&self) -> &Pool<SqliteConnectionManager> {
        &self.pool
    }

    /// Run read-only work on a pooled connection
    pub fn read<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.pool.get().map_err(StoreError::from)?;
        f(&conn)
    }

    /// Run `f` inside an `IMMEDIATE` transaction, committing on `Ok`.
    ///
    /// Returning `Err` from `f` drops the transaction, which rolls it back.
    pub fn write<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.pool.get().map_err(StoreError::from)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

fn configure(manager: SqliteConnectionManager, busy_timeout: Duration) -> SqliteConnectionManager {
    manager.with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    })
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Timestamp>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(Timestamp::from_sql))
}

// ===== Workspaces =====

const WORKSPACE_COLUMNS: &str =
    "id, name, slug, owner_id, settings, personal, created_at, updated_at, deleted_at";

fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    let settings: String = row.get(4)?;
    Ok(Workspace {
        id: WorkspaceId(row.get(0)?),
        name: row.get(1)?,
        slug: row.get(2)?,
        owner_id: row.get::<_, Option<String>>(3)?.map(UserId),
        settings: json_column(4, &settings)?,
        personal: row.get(5)?,
        created_at: Timestamp::from_sql(row.get(6)?),
        updated_at: Timestamp::from_sql(row.get(7)?),
        deleted_at: opt_timestamp(row, 8)?,
    })
}

pub(crate) fn insert_workspace(conn: &Connection, workspace: &Workspace) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO workspaces (id, name, slug, owner_id, settings, personal, created_at, updated_at, deleted_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            workspace.id.as_str(),
            &workspace.name,
            &workspace.slug,
            workspace.owner_id.as_ref().map(|id| id.as_str()),
            serde_json::to_string(&workspace.settings)?,
            workspace.personal,
            workspace.created_at.to_sql(),
            workspace.updated_at.to_sql(),
            workspace.deleted_at.map(Timestamp::to_sql),
        ],
    )?;
    Ok(())
}

/// Fetch a live (not soft-deleted) workspace
pub(crate) fn get_workspace(conn: &Connection, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError> {
    let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = ? AND deleted_at IS NULL");
    Ok(conn.query_row(&sql, params![id.as_str()], workspace_from_row).optional()?)
}

/// Fetch a workspace including soft-deleted rows
pub(crate) fn get_workspace_with_trashed(
    conn: &Connection,
    id: &WorkspaceId,
) -> Result<Option<Workspace>, StoreError> {
    let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = ?");
    Ok(conn.query_row(&sql, params![id.as_str()], workspace_from_row).optional()?)
}

pub(crate) fn get_workspace_by_slug(conn: &Connection, slug: &str) -> Result<Option<Workspace>, StoreError> {
    let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE slug = ? AND deleted_at IS NULL");
    Ok(conn.query_row(&sql, params![slug], workspace_from_row).optional()?)
}

/// Slugs stay reserved by soft-deleted workspaces
pub(crate) fn slug_exists(conn: &Connection, slug: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row("SELECT 1 FROM workspaces WHERE slug = ?", params![slug], |_| Ok(()))
        .optional()?
        .is_some())
}

pub(crate) fn update_workspace_details(
    conn: &Connection,
    id: &WorkspaceId,
    name: &str,
    settings: &serde_json::Value,
    now: Timestamp,
) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE workspaces SET name = ?, settings = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        params![name, serde_json::to_string(settings)?, now.to_sql(), id.as_str()],
    )?)
}

pub(crate) fn set_workspace_owner(
    conn: &Connection,
    id: &WorkspaceId,
    owner: &UserId,
    now: Timestamp,
) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE workspaces SET owner_id = ?, updated_at = ? WHERE id = ?",
        params![owner.as_str(), now.to_sql(), id.as_str()],
    )?)
}

pub(crate) fn set_workspace_deleted_at(
    conn: &Connection,
    id: &WorkspaceId,
    deleted_at: Option<Timestamp>,
) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE workspaces SET deleted_at = ? WHERE id = ?",
        params![deleted_at.map(Timestamp::to_sql), id.as_str()],
    )?)
}

pub(crate) fn delete_workspace_row(conn: &Connection, id: &WorkspaceId) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM workspaces WHERE id = ?", params![id.as_str()])?)
}

// ===== Memberships =====

const MEMBERSHIP_COLUMNS: &str = "id, workspace_id, user_id, role, permissions, is_current, joined_at";

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<Membership> {
    let permissions = match row.get::<_, Option<String>>(4)? {
        Some(raw) => Some(json_column(4, &raw)?),
        None => None,
    };
    Ok(Membership {
        id: MembershipId(row.get(0)?),
        workspace_id: WorkspaceId(row.get(1)?),
        user_id: UserId(row.get(2)?),
        role: row.get(3)?,
        permissions,
        is_current: row.get(5)?,
        joined_at: Timestamp::from_sql(row.get(6)?),
    })
}

fn permissions_column(permissions: &Option<Vec<String>>) -> Result<Option<String>, StoreError> {
    match permissions {
        Some(list) if !list.is_empty() => Ok(Some(serde_json::to_string(list)?)),
        _ => Ok(None),
    }
}

pub(crate) fn insert_membership(conn: &Connection, membership: &Membership) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO workspace_memberships (id, workspace_id, user_id, role, permissions, is_current, joined_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            membership.id.as_str(),
            membership.workspace_id.as_str(),
            membership.user_id.as_str(),
            &membership.role,
            permissions_column(&membership.permissions)?,
            membership.is_current,
            membership.joined_at.to_sql(),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_membership(
    conn: &Connection,
    workspace: &WorkspaceId,
    user: &UserId,
) -> Result<Option<Membership>, StoreError> {
    let sql = format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM workspace_memberships WHERE workspace_id = ? AND user_id = ?"
    );
    Ok(conn
        .query_row(&sql, params![workspace.as_str(), user.as_str()], membership_from_row)
        .optional()?)
}

/// The user's flagged membership, whatever the state of its workspace
pub(crate) fn get_current_membership(conn: &Connection, user: &UserId) -> Result<Option<Membership>, StoreError> {
    let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM workspace_memberships WHERE user_id = ? AND is_current = 1");
    Ok(conn.query_row(&sql, params![user.as_str()], membership_from_row).optional()?)
}

/// The live workspace behind the user's current membership
pub(crate) fn get_current_workspace(conn: &Connection, user: &UserId) -> Result<Option<Workspace>, StoreError> {
    let sql = format!(
        "SELECT {} FROM workspaces w
         JOIN workspace_memberships m ON m.workspace_id = w.id
         WHERE m.user_id = ? AND m.is_current = 1 AND w.deleted_at IS NULL",
        WORKSPACE_COLUMNS
            .split(", ")
            .map(|c| format!("w.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(conn.query_row(&sql, params![user.as_str()], workspace_from_row).optional()?)
}

pub(crate) fn list_memberships_for_user(conn: &Connection, user: &UserId) -> Result<Vec<Membership>, StoreError> {
    let sql = format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM workspace_memberships WHERE user_id = ? ORDER BY joined_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user.as_str()], membership_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub(crate) fn list_members(conn: &Connection, workspace: &WorkspaceId) -> Result<Vec<Membership>, StoreError> {
    let sql = format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM workspace_memberships WHERE workspace_id = ? ORDER BY joined_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace.as_str()], membership_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Clear `is_current` on every membership the user holds
pub(crate) fn clear_current(conn: &Connection, user: &UserId) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE workspace_memberships SET is_current = 0 WHERE user_id = ? AND is_current = 1",
        params![user.as_str()],
    )?)
}

pub(crate) fn set_current(conn: &Connection, workspace: &WorkspaceId, user: &UserId) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE workspace_memberships SET is_current = 1 WHERE workspace_id = ? AND user_id = ?",
        params![workspace.as_str(), user.as_str()],
    )?)
}

pub(crate) fn count_current(conn: &Connection, user: &UserId) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM workspace_memberships WHERE user_id = ? AND is_current = 1",
        params![user.as_str()],
        |row| row.get(0),
    )?)
}

pub(crate) fn update_membership_role(
    conn: &Connection,
    workspace: &WorkspaceId,
    user: &UserId,
    role: &str,
) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE workspace_memberships SET role = ? WHERE workspace_id = ? AND user_id = ?",
        params![role, workspace.as_str(), user.as_str()],
    )?)
}

pub(crate) fn update_membership_permissions(
    conn: &Connection,
    workspace: &WorkspaceId,
    user: &UserId,
    permissions: &Option<Vec<String>>,
) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE workspace_memberships SET permissions = ? WHERE workspace_id = ? AND user_id = ?",
        params![permissions_column(permissions)?, workspace.as_str(), user.as_str()],
    )?)
}

pub(crate) fn delete_membership(conn: &Connection, workspace: &WorkspaceId, user: &UserId) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM workspace_memberships WHERE workspace_id = ? AND user_id = ?",
        params![workspace.as_str(), user.as_str()],
    )?)
}

// ===== Invitations =====

const INVITATION_COLUMNS: &str =
    "id, workspace_id, email, role, token, invited_by, expires_at, accepted_at, declined_at, created_at";

fn invitation_from_row(row: &Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: InvitationId(row.get(0)?),
        workspace_id: WorkspaceId(row.get(1)?),
        email: row.get(2)?,
        role: row.get(3)?,
        token: row.get(4)?,
        invited_by: row.get::<_, Option<String>>(5)?.map(UserId),
        expires_at: Timestamp::from_sql(row.get(6)?),
        accepted_at: opt_timestamp(row, 7)?,
        declined_at: opt_timestamp(row, 8)?,
        created_at: Timestamp::from_sql(row.get(9)?),
    })
}

pub(crate) fn insert_invitation(conn: &Connection, invitation: &Invitation) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO workspace_invitations
            (id, workspace_id, email, email_key, role, token, invited_by, expires_at, accepted_at, declined_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            invitation.id.as_str(),
            invitation.workspace_id.as_str(),
            &invitation.email,
            invitation.email_key(),
            &invitation.role,
            &invitation.token,
            invitation.invited_by.as_ref().map(|id| id.as_str()),
            invitation.expires_at.to_sql(),
            invitation.accepted_at.map(Timestamp::to_sql),
            invitation.declined_at.map(Timestamp::to_sql),
            invitation.created_at.to_sql(),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_invitation_by_token(conn: &Connection, token: &str) -> Result<Option<Invitation>, StoreError> {
    let sql = format!("SELECT {INVITATION_COLUMNS} FROM workspace_invitations WHERE token = ?");
    Ok(conn.query_row(&sql, params![token], invitation_from_row).optional()?)
}

/// The row holding the (workspace, email) slot: neither accepted nor declined
pub(crate) fn get_unresolved_invitation(
    conn: &Connection,
    workspace: &WorkspaceId,
    email_key: &str,
) -> Result<Option<Invitation>, StoreError> {
    let sql = format!(
        "SELECT {INVITATION_COLUMNS} FROM workspace_invitations
         WHERE workspace_id = ? AND email_key = ? AND accepted_at IS NULL AND declined_at IS NULL"
    );
    Ok(conn
        .query_row(&sql, params![workspace.as_str(), email_key], invitation_from_row)
        .optional()?)
}

pub(crate) fn list_pending_invitations(
    conn: &Connection,
    workspace: &WorkspaceId,
    now: Timestamp,
) -> Result<Vec<Invitation>, StoreError> {
    let sql = format!(
        "SELECT {INVITATION_COLUMNS} FROM workspace_invitations
         WHERE workspace_id = ? AND accepted_at IS NULL AND declined_at IS NULL AND expires_at > ?
         ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace.as_str(), now.to_sql()], invitation_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Set `accepted_at` if the invitation is still unresolved
pub(crate) fn mark_invitation_accepted(conn: &Connection, id: &InvitationId, now: Timestamp) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE workspace_invitations SET accepted_at = ?
         WHERE id = ? AND accepted_at IS NULL AND declined_at IS NULL",
        params![now.to_sql(), id.as_str()],
    )?)
}

/// Set `declined_at` if the invitation is still unresolved
pub(crate) fn mark_invitation_declined(conn: &Connection, id: &InvitationId, now: Timestamp) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE workspace_invitations SET declined_at = ?
         WHERE id = ? AND accepted_at IS NULL AND declined_at IS NULL",
        params![now.to_sql(), id.as_str()],
    )?)
}

pub(crate) fn delete_invitation(conn: &Connection, id: &InvitationId) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM workspace_invitations WHERE id = ?", params![id.as_str()])?)
}

pub(crate) fn delete_invitations_created_before(conn: &Connection, cutoff: Timestamp) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM workspace_invitations WHERE created_at < ?",
        params![cutoff.to_sql()],
    )?)
}

pub(crate) fn delete_expired_invitations(conn: &Connection, now: Timestamp) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM workspace_invitations
         WHERE accepted_at IS NULL AND declined_at IS NULL AND expires_at <= ?",
        params![now.to_sql()],
    )?)
}

pub(crate) fn count_invitations_created_before(conn: &Connection, cutoff: Timestamp) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM workspace_invitations WHERE created_at < ?",
        params![cutoff.to_sql()],
        |row| row.get(0),
    )?)
}

pub(crate) fn count_expired_invitations(conn: &Connection, now: Timestamp) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM workspace_invitations
         WHERE accepted_at IS NULL AND declined_at IS NULL AND expires_at <= ?",
        params![now.to_sql()],
        |row| row.get(0),
    )?)
}

//! Workspace lifecycle: creation with unique slugs, deletion, ownership transfer

use super::error::WorkspaceError;
use super::events::WorkspaceEvent;
use super::membership::{insert_member_in, MembershipStore};
use super::storage::sql_store as sql;
use super::types::{Timestamp, UserId, WorkspaceId};
use super::workspace::{is_valid_slug, random_suffix, slugify, NewWorkspace, Workspace};
use crate::config::RegistrationConfig;
use rusqlite::Connection;
use tracing::{debug, info};

/// Role given to a previous owner when ownership moves on
pub const DEMOTED_OWNER_ROLE: &str = "admin";

const SLUG_SHORT_SUFFIX_ATTEMPTS: usize = 10;
const SLUG_INSERT_RETRIES: usize = 3;
const MAX_NAME_LEN: usize = 255;

/// Creates, deletes and transfers workspaces
#[derive(Clone)]
pub struct WorkspaceManager {
    memberships: MembershipStore,
    registration: RegistrationConfig,
}

impl WorkspaceManager {
    pub fn new(memberships: MembershipStore) -> Self {
        Self {
            memberships,
            registration: RegistrationConfig::default(),
        }
    }

    pub fn with_registration(mut self, registration: RegistrationConfig) -> Self {
        self.registration = registration;
        self
    }

    pub fn memberships(&self) -> &MembershipStore {
        &self.memberships
    }

    fn validate_name(name: &str) -> Result<(), WorkspaceError> {
        if name.trim().is_empty() {
            return Err(WorkspaceError::InvalidName("name must not be empty".to_string()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(WorkspaceError::InvalidName(format!(
                "name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        Ok(())
    }

    /// Pick a free slug derived from `base`
    fn unique_slug(conn: &Connection, base: &str) -> Result<String, WorkspaceError> {
        if !sql::slug_exists(conn, base)? {
            return Ok(base.to_string());
        }
        for _ in 0..SLUG_SHORT_SUFFIX_ATTEMPTS {
            let candidate = format!("{}-{}", base, random_suffix(5));
            if !sql::slug_exists(conn, &candidate)? {
                return Ok(candidate);
            }
        }
        Ok(format!("{}-{}", base, random_suffix(8)))
    }

    /// Create a workspace owned by `owner`, who becomes a member with the
    /// owner role and has it set as their current workspace.
    pub fn create_workspace(&self, input: NewWorkspace, owner: &UserId) -> Result<Workspace, WorkspaceError> {
        self.create(input, Some(owner))
    }

    /// Create a workspace with no owner and no members
    pub fn create_unowned_workspace(&self, input: NewWorkspace) -> Result<Workspace, WorkspaceError> {
        self.create(input, None)
    }

    fn create(&self, input: NewWorkspace, owner: Option<&UserId>) -> Result<Workspace, WorkspaceError> {
        Self::validate_name(&input.name)?;
        let explicit_slug = input.slug.clone();
        if let Some(slug) = &explicit_slug {
            if !is_valid_slug(slug) {
                return Err(WorkspaceError::InvalidSlug(slug.clone()));
            }
        }
        let base_slug = slugify(&input.name);
        let roles = self.memberships.roles();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.memberships.sql().write(|tx| {
                let slug = match &explicit_slug {
                    Some(slug) if sql::slug_exists(tx, slug)? => {
                        return Err(WorkspaceError::SlugUnavailable(slug.clone()))
                    }
                    Some(slug) => slug.clone(),
                    None => Self::unique_slug(tx, &base_slug)?,
                };

                let now = Timestamp::now();
                let workspace = Workspace {
                    id: WorkspaceId::generate(),
                    name: input.name.clone(),
                    slug: slug.clone(),
                    owner_id: owner.cloned(),
                    settings: input.settings.clone(),
                    personal: input.personal,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                };

                sql::insert_workspace(tx, &workspace).map_err(|e| {
                    if e.is_unique_violation() {
                        WorkspaceError::SlugUnavailable(slug)
                    } else {
                        e.into()
                    }
                })?;

                if let Some(owner) = owner {
                    insert_member_in(tx, roles, &workspace.id, owner, roles.owner_role(), true)?;
                }
                Ok(workspace)
            });

            match result {
                Err(WorkspaceError::SlugUnavailable(slug))
                    if explicit_slug.is_none() && attempt < SLUG_INSERT_RETRIES =>
                {
                    debug!(slug = %slug, attempt, "Slug taken at insert time, retrying");
                }
                Err(e) => return Err(e),
                Ok(workspace) => {
                    info!(
                        workspace_id = %workspace.id,
                        slug = %workspace.slug,
                        owner_id = ?workspace.owner_id,
                        personal = workspace.personal,
                        "Workspace created"
                    );
                    self.memberships.events().emit(WorkspaceEvent::WorkspaceCreated {
                        workspace_id: workspace.id.clone(),
                        owner_id: workspace.owner_id.clone(),
                        personal: workspace.personal,
                    });
                    return Ok(workspace);
                }
            }
        }
    }

    /// Create the personal workspace of a user, set as current
    pub fn create_personal_workspace(&self, user: &UserId, display_name: &str) -> Result<Workspace, WorkspaceError> {
        let display_name = if display_name.trim().is_empty() {
            "User"
        } else {
            display_name.trim()
        };
        let name = self.registration.name_template.replace("{name}", display_name);
        self.create_workspace(NewWorkspace::named(name).personal(), user)
    }

    /// Registration hook: create a personal workspace when enabled and the
    /// user has no memberships yet
    pub fn on_user_registered(&self, user: &UserId, display_name: &str) -> Result<Option<Workspace>, WorkspaceError> {
        if !self.registration.auto_create_workspace {
            return Ok(None);
        }
        if !self.memberships.memberships_for(user)?.is_empty() {
            debug!(user_id = %user, "User already has workspaces; skipping auto-create");
            return Ok(None);
        }
        self.create_personal_workspace(user, display_name).map(Some)
    }

    pub fn find(&self, id: &WorkspaceId) -> Result<Option<Workspace>, WorkspaceError> {
        Ok(self.memberships.sql().read(|conn| sql::get_workspace(conn, id))?)
    }

    pub fn find_by_slug(&self, slug: &str) -> Result<Option<Workspace>, WorkspaceError> {
        Ok(self.memberships.sql().read(|conn| sql::get_workspace_by_slug(conn, slug))?)
    }

    pub fn get(&self, id: &WorkspaceId) -> Result<Workspace, WorkspaceError> {
        self.find(id)?
            .ok_or_else(|| WorkspaceError::NotFound(format!("workspace {id}")))
    }

    pub fn rename(&self, id: &WorkspaceId, name: &str) -> Result<Workspace, WorkspaceError> {
        Self::validate_name(name)?;
        self.update(id, |ws| ws.name = name.to_string())
    }

    pub fn update_settings(&self, id: &WorkspaceId, settings: serde_json::Value) -> Result<Workspace, WorkspaceError> {
        self.update(id, move |ws| ws.settings = settings)
    }

    fn update(&self, id: &WorkspaceId, change: impl FnOnce(&mut Workspace)) -> Result<Workspace, WorkspaceError> {
        self.memberships.sql().write(|tx| {
            let mut workspace = sql::get_workspace(tx, id)?
                .ok_or_else(|| WorkspaceError::NotFound(format!("workspace {id}")))?;
            change(&mut workspace);
            workspace.updated_at = Timestamp::now();
            sql::update_workspace_details(tx, id, &workspace.name, &workspace.settings, workspace.updated_at)?;
            Ok(workspace)
        })
    }

    /// Soft delete by default; `force` removes the row, and memberships and
    /// invitations cascade. Returns `false` if there was nothing to delete.
    pub fn delete_workspace(&self, id: &WorkspaceId, force: bool) -> Result<bool, WorkspaceError> {
        let deleted = self.memberships.sql().write(|tx| {
            if force {
                Ok::<_, WorkspaceError>(sql::delete_workspace_row(tx, id)? > 0)
            } else if sql::get_workspace(tx, id)?.is_some() {
                Ok(sql::set_workspace_deleted_at(tx, id, Some(Timestamp::now()))? > 0)
            } else {
                Ok(false)
            }
        })?;

        if deleted {
            info!(workspace_id = %id, force, "Workspace deleted");
            self.memberships.events().emit(WorkspaceEvent::WorkspaceDeleted {
                workspace_id: id.clone(),
                force,
            });
        }
        Ok(deleted)
    }

    /// Undo a soft delete
    pub fn restore_workspace(&self, id: &WorkspaceId) -> Result<bool, WorkspaceError> {
        let restored = self.memberships.sql().write(|tx| {
            match sql::get_workspace_with_trashed(tx, id)? {
                Some(ws) if ws.is_deleted() => Ok::<_, WorkspaceError>(sql::set_workspace_deleted_at(tx, id, None)? > 0),
                _ => Ok(false),
            }
        })?;

        if restored {
            info!(workspace_id = %id, "Workspace restored");
        }
        Ok(restored)
    }

    /// Hand the workspace to another member.
    ///
    /// The new owner gets the owner role. With `demote_previous`, the old
    /// owner (if still a member) drops to [`DEMOTED_OWNER_ROLE`] when that
    /// role exists.
    ///
    /// When `performed_by` is given and the workspace has an owner, only that
    /// owner may transfer; anyone else gets `AccessDenied` and nothing changes.
    /// `None` is for trusted administrative callers.
    pub fn transfer_ownership(
        &self,
        id: &WorkspaceId,
        new_owner: &UserId,
        performed_by: Option<&UserId>,
        demote_previous: bool,
    ) -> Result<(), WorkspaceError> {
        let roles = self.memberships.roles();
        let owner_role = roles.owner_role();

        let previous = self.memberships.sql().write(|tx| {
            let workspace = sql::get_workspace(tx, id)?
                .ok_or_else(|| WorkspaceError::NotFound(format!("workspace {id}")))?;
            if let (Some(actor), Some(owner)) = (performed_by, workspace.owner_id.as_ref()) {
                if actor != owner {
                    return Err(WorkspaceError::AccessDenied(
                        "only the current owner can transfer ownership".to_string(),
                    ));
                }
            }
            if sql::get_membership(tx, id, new_owner)?.is_none() {
                return Err(WorkspaceError::NotAMember);
            }

            sql::set_workspace_owner(tx, id, new_owner, Timestamp::now())?;
            sql::update_membership_role(tx, id, new_owner, owner_role)?;

            if let Some(previous) = workspace.owner_id.as_ref().filter(|p| *p != new_owner) {
                if demote_previous
                    && roles.contains(DEMOTED_OWNER_ROLE)
                    && sql::get_membership(tx, id, previous)?.is_some()
                {
                    sql::update_membership_role(tx, id, previous, DEMOTED_OWNER_ROLE)?;
                }
            }
            Ok(workspace.owner_id)
        })?;

        info!(
            workspace_id = %id,
            previous_owner = ?previous,
            new_owner = %new_owner,
            "Ownership transferred"
        );
        self.memberships.events().emit(WorkspaceEvent::OwnershipTransferred {
            workspace_id: id.clone(),
            previous_owner: previous,
            new_owner: new_owner.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_access::roles::RoleDirectory;
    use crate::core_workspace::storage::WorkspaceSqlStore;
    use std::sync::Arc;

    fn manager() -> WorkspaceManager {
        let store = WorkspaceSqlStore::memory().unwrap();
        WorkspaceManager::new(MembershipStore::new(store, Arc::new(RoleDirectory::default())))
    }

    #[test]
    fn test_create_workspace_with_owner() {
        let manager = manager();
        let alice = UserId::new("alice");

        let ws = manager.create_workspace(NewWorkspace::named("Acme Corp"), &alice).unwrap();
        assert_eq!(ws.slug, "acme-corp");
        assert!(ws.is_owned_by(&alice));

        let m = manager.memberships().membership(&ws.id, &alice).unwrap().unwrap();
        assert_eq!(m.role, "owner");
        assert!(m.is_current);
    }

    #[test]
    fn test_slug_collision_gets_suffix() {
        let manager = manager();
        let alice = UserId::new("alice");

        let first = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();
        let second = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();

        assert_eq!(first.slug, "acme");
        assert_ne!(second.slug, first.slug);
        assert!(second.slug.starts_with("acme-"));
        assert_eq!(second.slug.len(), "acme-".len() + 5);
    }

    #[test]
    fn test_explicit_slug_rules() {
        let manager = manager();
        let alice = UserId::new("alice");

        manager
            .create_workspace(NewWorkspace::named("Acme").with_slug("acme-hq"), &alice)
            .unwrap();

        assert!(matches!(
            manager.create_workspace(NewWorkspace::named("Other").with_slug("acme-hq"), &alice),
            Err(WorkspaceError::SlugUnavailable(_))
        ));
        assert!(matches!(
            manager.create_workspace(NewWorkspace::named("Other").with_slug("Not Valid"), &alice),
            Err(WorkspaceError::InvalidSlug(_))
        ));
        assert!(matches!(
            manager.create_workspace(NewWorkspace::named("   "), &alice),
            Err(WorkspaceError::InvalidName(_))
        ));
    }

    #[test]
    fn test_soft_delete_hides_and_restore_returns() {
        let manager = manager();
        let alice = UserId::new("alice");
        let ws = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();

        assert!(manager.delete_workspace(&ws.id, false).unwrap());
        assert!(manager.find(&ws.id).unwrap().is_none());
        assert!(manager.find_by_slug("acme").unwrap().is_none());
        assert!(manager.memberships().current_workspace(&alice).unwrap().is_none());
        assert!(!manager.delete_workspace(&ws.id, false).unwrap());

        // The slug stays reserved while soft-deleted
        let other = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();
        assert_ne!(other.slug, "acme");

        assert!(manager.restore_workspace(&ws.id).unwrap());
        assert_eq!(manager.get(&ws.id).unwrap().slug, "acme");
        assert!(!manager.restore_workspace(&ws.id).unwrap());
    }

    #[test]
    fn test_force_delete_cascades() {
        let manager = manager();
        let alice = UserId::new("alice");
        let ws = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();

        assert!(manager.delete_workspace(&ws.id, true).unwrap());
        assert!(manager.memberships().memberships_for(&alice).unwrap().is_empty());
        assert!(matches!(manager.get(&ws.id), Err(WorkspaceError::NotFound(_))));
    }

    #[test]
    fn test_transfer_ownership() {
        let manager = manager();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let ws = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();

        assert!(matches!(
            manager.transfer_ownership(&ws.id, &bob, Some(&alice), true),
            Err(WorkspaceError::NotAMember)
        ));

        manager.memberships().add_member(&ws.id, &bob, None, false).unwrap();
        manager.transfer_ownership(&ws.id, &bob, Some(&alice), true).unwrap();

        let ws = manager.get(&ws.id).unwrap();
        assert!(ws.is_owned_by(&bob));
        let roles = |u: &UserId| manager.memberships().role_in(u, &ws.id).unwrap();
        assert_eq!(roles(&bob).as_deref(), Some("owner"));
        assert_eq!(roles(&alice).as_deref(), Some("admin"));
    }

    #[test]
    fn test_transfer_without_demotion_keeps_role() {
        let manager = manager();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let ws = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();
        manager.memberships().add_member(&ws.id, &bob, None, false).unwrap();

        manager.transfer_ownership(&ws.id, &bob, None, false).unwrap();
        assert_eq!(
            manager.memberships().role_in(&alice, &ws.id).unwrap().as_deref(),
            Some("owner")
        );
    }

    #[test]
    fn test_transfer_requires_current_owner() {
        let manager = manager();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let carol = UserId::new("carol");
        let ws = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();
        manager.memberships().add_member(&ws.id, &bob, None, false).unwrap();
        manager.memberships().add_member(&ws.id, &carol, Some("admin"), false).unwrap();

        // Neither a member nor an admin may hand the workspace to themselves
        for actor in [&bob, &carol] {
            assert!(matches!(
                manager.transfer_ownership(&ws.id, actor, Some(actor), true),
                Err(WorkspaceError::AccessDenied(_))
            ));
        }

        let ws = manager.get(&ws.id).unwrap();
        assert!(ws.is_owned_by(&alice));
        assert_eq!(manager.memberships().role_in(&alice, &ws.id).unwrap().as_deref(), Some("owner"));
        assert_eq!(manager.memberships().role_in(&bob, &ws.id).unwrap().as_deref(), Some("member"));

        manager.transfer_ownership(&ws.id, &carol, Some(&alice), true).unwrap();
        assert!(manager.get(&ws.id).unwrap().is_owned_by(&carol));
    }

    #[test]
    fn test_manager_events() {
        let manager = manager();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let mut rx = manager.memberships().events().subscribe();

        let ws = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            WorkspaceEvent::WorkspaceCreated {
                workspace_id: ws.id.clone(),
                owner_id: Some(alice.clone()),
                personal: false,
            }
        );

        manager.memberships().add_member(&ws.id, &bob, None, false).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), WorkspaceEvent::MemberAdded { .. }));

        // A refused transfer emits nothing
        assert!(manager.transfer_ownership(&ws.id, &bob, Some(&bob), true).is_err());
        assert!(rx.try_recv().is_err());

        manager.transfer_ownership(&ws.id, &bob, Some(&alice), true).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            WorkspaceEvent::OwnershipTransferred {
                workspace_id: ws.id.clone(),
                previous_owner: Some(alice.clone()),
                new_owner: bob.clone(),
            }
        );

        assert!(manager.delete_workspace(&ws.id, false).unwrap());
        assert_eq!(
            rx.try_recv().unwrap(),
            WorkspaceEvent::WorkspaceDeleted {
                workspace_id: ws.id.clone(),
                force: false,
            }
        );

        // Already soft-deleted: nothing happens, nothing is emitted
        assert!(!manager.delete_workspace(&ws.id, false).unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rename_and_settings() {
        let manager = manager();
        let alice = UserId::new("alice");
        let ws = manager.create_workspace(NewWorkspace::named("Acme"), &alice).unwrap();

        let renamed = manager.rename(&ws.id, "Acme Labs").unwrap();
        assert_eq!(renamed.name, "Acme Labs");
        assert_eq!(renamed.slug, "acme");

        let updated = manager
            .update_settings(&ws.id, serde_json::json!({"plan": "team"}))
            .unwrap();
        assert_eq!(updated.setting("plan"), Some(&serde_json::json!("team")));
        assert_eq!(manager.get(&ws.id).unwrap().settings["plan"], "team");
    }

    #[test]
    fn test_registration_hook() {
        let manager = manager().with_registration(RegistrationConfig {
            auto_create_workspace: true,
            ..RegistrationConfig::default()
        });
        let alice = UserId::new("alice");

        let ws = manager.on_user_registered(&alice, "Alice").unwrap().unwrap();
        assert_eq!(ws.name, "Alice's Workspace");
        assert!(ws.personal);
        assert_eq!(
            manager.memberships().current_workspace(&alice).unwrap().map(|w| w.id),
            Some(ws.id)
        );

        // Second call is skipped: the user already has a workspace
        assert!(manager.on_user_registered(&alice, "Alice").unwrap().is_none());
    }

    #[test]
    fn test_registration_hook_disabled() {
        let manager = manager();
        assert!(manager
            .on_user_registered(&UserId::new("alice"), "Alice")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unowned_workspace_has_no_members() {
        let manager = manager();
        let ws = manager.create_unowned_workspace(NewWorkspace::named("Shared")).unwrap();
        assert!(ws.owner_id.is_none());
        assert!(manager.memberships().members_of(&ws.id).unwrap().is_empty());
    }
}

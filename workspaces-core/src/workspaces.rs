//! Wiring: every component built from one [`Config`] over one store

use crate::config::Config;
use crate::core_access::guard::AccessGuard;
use crate::core_access::provider::PermissionManager;
use crate::core_access::roles::RoleDirectory;
use crate::core_tenancy::chain::ContextResolutionChain;
use crate::core_tenancy::context::{Principal, WorkspaceContext};
use crate::core_tenancy::request::RequestContext;
use crate::core_tenancy::scope::TenancyScope;
use crate::core_workspace::account::UserAccount;
use crate::core_workspace::events::{EventBroadcaster, WorkspaceEvent};
use crate::core_workspace::invitation::InvitationLifecycle;
use crate::core_workspace::manager::WorkspaceManager;
use crate::core_workspace::membership::MembershipStore;
use crate::core_workspace::storage::{StoreError, WorkspaceSqlStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// The assembled workspace services. Clones share the store and role table.
#[derive(Clone)]
pub struct Workspaces {
    store: WorkspaceSqlStore,
    roles: Arc<RoleDirectory>,
    events: EventBroadcaster,
    memberships: MembershipStore,
    manager: WorkspaceManager,
    invitations: InvitationLifecycle,
    permissions: PermissionManager,
    guard: AccessGuard,
    scope: TenancyScope,
    chain: Arc<ContextResolutionChain>,
}

impl Workspaces {
    /// Open the configured database and build every component
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        let store = WorkspaceSqlStore::open(&config.store)?;
        info!(path = %config.store.database_path.display(), "Opened workspace store");
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: WorkspaceSqlStore, config: &Config) -> Self {
        let roles = Arc::new(RoleDirectory::from_config(&config.roles));
        let events = EventBroadcaster::default();
        let memberships = MembershipStore::new(store.clone(), roles.clone()).with_events(events.clone());
        let manager = WorkspaceManager::new(memberships.clone()).with_registration(config.registration.clone());
        let invitations = InvitationLifecycle::new(memberships.clone(), config.invitations.clone());
        let permissions = PermissionManager::from_memberships(memberships.clone());
        let guard = AccessGuard::new(memberships.clone(), permissions.clone());
        let chain = ContextResolutionChain::from_config(&config.context, Arc::new(store.clone()));

        Self {
            store,
            roles,
            events,
            memberships,
            manager,
            invitations,
            permissions,
            guard,
            scope: TenancyScope::new(&config.scope),
            chain: Arc::new(chain),
        }
    }

    pub fn store(&self) -> &WorkspaceSqlStore {
        &self.store
    }

    pub fn roles(&self) -> &RoleDirectory {
        &self.roles
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }

    pub fn memberships(&self) -> &MembershipStore {
        &self.memberships
    }

    pub fn manager(&self) -> &WorkspaceManager {
        &self.manager
    }

    pub fn invitations(&self) -> &InvitationLifecycle {
        &self.invitations
    }

    pub fn permissions(&self) -> &PermissionManager {
        &self.permissions
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn scope(&self) -> &TenancyScope {
        &self.scope
    }

    pub fn chain(&self) -> &ContextResolutionChain {
        &self.chain
    }

    pub fn account(&self, principal: Principal) -> UserAccount {
        UserAccount::new(principal, self.memberships.clone())
    }

    /// A fresh per-request context, bound to whatever the chain resolves
    pub fn context_for(&self, request: &mut dyn RequestContext) -> WorkspaceContext {
        let mut ctx = WorkspaceContext::new();
        self.chain.bind(request, &mut ctx);
        ctx
    }
}

//! Ordered resolver chain: the first resolver with an answer wins

use super::context::WorkspaceContext;
use super::request::RequestContext;
use super::resolver::{build_resolver, ContextResolver, WorkspaceDirectory};
use crate::config::ContextConfig;
use crate::core_workspace::workspace::Workspace;
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
pub struct ContextResolutionChain {
    resolvers: Vec<Box<dyn ContextResolver>>,
}

impl ContextResolutionChain {
    pub fn new(resolvers: Vec<Box<dyn ContextResolver>>) -> Self {
        Self { resolvers }
    }

    /// Chain in the configured resolver order
    pub fn from_config(config: &ContextConfig, directory: Arc<dyn WorkspaceDirectory>) -> Self {
        let resolvers = config
            .resolvers
            .iter()
            .map(|kind| build_resolver(*kind, config, directory.clone()))
            .collect();
        Self { resolvers }
    }

    /// Try after all existing resolvers
    pub fn push(mut self, resolver: Box<dyn ContextResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Try before all existing resolvers
    pub fn prepend(mut self, resolver: Box<dyn ContextResolver>) -> Self {
        self.resolvers.insert(0, resolver);
        self
    }

    pub fn resolver_names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Ask each resolver in turn. Never fails: resolver errors are logged
    /// and count as "no match".
    pub fn resolve(&self, request: &mut dyn RequestContext) -> Option<Workspace> {
        for resolver in &self.resolvers {
            match resolver.resolve(request) {
                Ok(Some(workspace)) => {
                    metrics::record_resolved(resolver.name());
                    debug!(resolver = resolver.name(), workspace_id = %workspace.id, "Resolved current workspace");
                    return Some(workspace);
                }
                Ok(None) => debug!(resolver = resolver.name(), "Resolver found no workspace"),
                Err(e) => warn!(resolver = resolver.name(), error = %e, "Resolver lookup failed"),
            }
        }

        metrics::record(metrics::CONTEXT_UNRESOLVED);
        debug!("No resolver produced a workspace");
        None
    }

    /// Resolve and bind the result to `ctx`, leaving it untouched when
    /// nothing resolves
    pub fn bind(&self, request: &mut dyn RequestContext, ctx: &mut WorkspaceContext) -> bool {
        match self.resolve(request) {
            Some(workspace) => {
                ctx.set(workspace);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverKind;
    use crate::core_access::roles::RoleDirectory;
    use crate::core_tenancy::context::Principal;
    use crate::core_tenancy::request::RequestParts;
    use crate::core_workspace::error::WorkspaceError;
    use crate::core_workspace::membership::MembershipStore;
    use crate::core_workspace::storage::WorkspaceSqlStore;
    use crate::core_workspace::types::UserId;
    use crate::core_workspace::workspace::NewWorkspace;
    use crate::core_workspace::WorkspaceManager;

    struct Failing;

    impl ContextResolver for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn resolve(&self, _: &mut dyn RequestContext) -> Result<Option<Workspace>, WorkspaceError> {
            Err(WorkspaceError::NotFound("boom".into()))
        }
    }

    fn setup() -> (Arc<dyn WorkspaceDirectory>, WorkspaceManager) {
        let store = WorkspaceSqlStore::memory().unwrap();
        let manager = WorkspaceManager::new(MembershipStore::new(store.clone(), Arc::new(RoleDirectory::default())));
        (Arc::new(store), manager)
    }

    #[test]
    fn test_from_config_keeps_order() {
        let (directory, _) = setup();
        let config = ContextConfig {
            resolvers: vec![ResolverKind::Header, ResolverKind::AuthUser, ResolverKind::Session],
            ..ContextConfig::default()
        };
        let chain = ContextResolutionChain::from_config(&config, directory);
        assert_eq!(chain.resolver_names(), vec!["header", "auth_user", "session"]);
    }

    #[test]
    fn test_first_match_wins() {
        let (directory, manager) = setup();
        let alice = Principal::new(UserId::new("alice"), "alice@example.com");
        let home = manager.create_workspace(NewWorkspace::named("Home"), &alice.id).unwrap();
        let work = manager.create_workspace(NewWorkspace::named("Work"), &alice.id).unwrap();
        manager.memberships().switch_current(&alice.id, &home.id).unwrap();

        let config = ContextConfig {
            resolvers: vec![ResolverKind::Header, ResolverKind::AuthUser],
            ..ContextConfig::default()
        };
        let chain = ContextResolutionChain::from_config(&config, directory);

        let mut with_header = RequestParts::new()
            .with_principal(alice.clone())
            .with_header("X-Workspace-Id", work.id.as_str());
        assert_eq!(chain.resolve(&mut with_header).map(|w| w.id), Some(work.id.clone()));

        let mut without_header = RequestParts::new().with_principal(alice.clone());
        assert_eq!(chain.resolve(&mut without_header).map(|w| w.id), Some(home.id.clone()));
    }

    #[test]
    fn test_errors_fall_through() {
        let (directory, manager) = setup();
        let alice = Principal::new(UserId::new("alice"), "alice@example.com");
        let home = manager.create_workspace(NewWorkspace::named("Home"), &alice.id).unwrap();

        let chain = ContextResolutionChain::from_config(&ContextConfig::default(), directory)
            .prepend(Box::new(Failing));
        let mut request = RequestParts::new().with_principal(alice);

        let mut ctx = WorkspaceContext::new();
        assert!(chain.bind(&mut request, &mut ctx));
        assert_eq!(ctx.current_id(), Some(&home.id));
    }

    #[test]
    fn test_empty_chain_resolves_nothing() {
        let chain = ContextResolutionChain::default().push(Box::new(Failing));
        let mut ctx = WorkspaceContext::new();
        assert!(!chain.bind(&mut RequestParts::new(), &mut ctx));
        assert!(!ctx.has_current());
    }
}

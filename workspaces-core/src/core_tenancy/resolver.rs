//! Strategies for finding the current workspace of a request
//!
//! A resolver that finds nothing, or whose candidate fails a membership
//! check, returns `Ok(None)` so the chain moves on. `Err` is reserved for
//! storage failures, which the chain logs and treats as no match.

use super::request::{RequestContext, RouteParam};
use crate::config::{ContextConfig, LookupField, ResolverKind};
use crate::core_workspace::error::WorkspaceError;
use crate::core_workspace::storage::sql_store as sql;
use crate::core_workspace::storage::WorkspaceSqlStore;
use crate::core_workspace::types::{UserId, WorkspaceId};
use crate::core_workspace::workspace::Workspace;
use std::sync::Arc;
use tracing::debug;

/// Workspace lookups the resolvers need. Deleted workspaces are never returned.
pub trait WorkspaceDirectory: Send + Sync {
    fn find_by_id(&self, id: &WorkspaceId) -> Result<Option<Workspace>, WorkspaceError>;

    fn find_by_slug(&self, slug: &str) -> Result<Option<Workspace>, WorkspaceError>;

    /// The workspace flagged current for `user`
    fn current_for(&self, user: &UserId) -> Result<Option<Workspace>, WorkspaceError>;

    fn is_member(&self, user: &UserId, workspace: &WorkspaceId) -> Result<bool, WorkspaceError>;
}

impl WorkspaceDirectory for WorkspaceSqlStore {
    fn find_by_id(&self, id: &WorkspaceId) -> Result<Option<Workspace>, WorkspaceError> {
        Ok(self.read(|conn| sql::get_workspace(conn, id))?)
    }

    fn find_by_slug(&self, slug: &str) -> Result<Option<Workspace>, WorkspaceError> {
        Ok(self.read(|conn| sql::get_workspace_by_slug(conn, slug))?)
    }

    fn current_for(&self, user: &UserId) -> Result<Option<Workspace>, WorkspaceError> {
        Ok(self.read(|conn| sql::get_current_workspace(conn, user))?)
    }

    fn is_member(&self, user: &UserId, workspace: &WorkspaceId) -> Result<bool, WorkspaceError> {
        Ok(self.read(|conn| sql::get_membership(conn, workspace, user))?.is_some())
    }
}

/// One way of finding the current workspace
pub trait ContextResolver: Send + Sync {
    /// Label used in logs and metrics
    fn name(&self) -> &'static str;

    fn resolve(&self, request: &mut dyn RequestContext) -> Result<Option<Workspace>, WorkspaceError>;
}

/// The workspace flagged current on the principal's memberships
pub struct AuthUserResolver {
    directory: Arc<dyn WorkspaceDirectory>,
}

impl AuthUserResolver {
    pub fn new(directory: Arc<dyn WorkspaceDirectory>) -> Self {
        Self { directory }
    }
}

impl ContextResolver for AuthUserResolver {
    fn name(&self) -> &'static str {
        ResolverKind::AuthUser.as_str()
    }

    fn resolve(&self, request: &mut dyn RequestContext) -> Result<Option<Workspace>, WorkspaceError> {
        match request.principal() {
            Some(principal) => self.directory.current_for(&principal.id),
            None => Ok(None),
        }
    }
}

/// `acme.example.com` resolves the workspace with slug `acme`
pub struct SubdomainResolver {
    directory: Arc<dyn WorkspaceDirectory>,
    domain: Option<String>,
}

impl SubdomainResolver {
    pub fn new(directory: Arc<dyn WorkspaceDirectory>, domain: Option<String>) -> Self {
        let domain = domain
            .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty());
        Self { directory, domain }
    }

    /// The single label in front of the base domain, if it is a plausible slug
    pub fn extract_subdomain(host: &str, domain: &str) -> Option<String> {
        let host = host.trim().to_ascii_lowercase();
        let host = match host.rsplit_once(':') {
            Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name.to_string(),
            _ => host.clone(),
        };

        let label = host.strip_suffix(domain)?.strip_suffix('.')?;
        let valid = !label.is_empty()
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| label.to_string())
    }
}

impl ContextResolver for SubdomainResolver {
    fn name(&self) -> &'static str {
        ResolverKind::Subdomain.as_str()
    }

    fn resolve(&self, request: &mut dyn RequestContext) -> Result<Option<Workspace>, WorkspaceError> {
        let (Some(domain), Some(host)) = (self.domain.as_deref(), request.host()) else {
            return Ok(None);
        };
        match Self::extract_subdomain(host, domain) {
            Some(slug) => self.directory.find_by_slug(&slug),
            None => {
                debug!(host, domain, "Host does not carry a workspace subdomain");
                Ok(None)
            }
        }
    }
}

/// A named route parameter, matched by id or slug
pub struct RouteParameterResolver {
    directory: Arc<dyn WorkspaceDirectory>,
    name: String,
    field: LookupField,
}

impl RouteParameterResolver {
    pub fn new(directory: Arc<dyn WorkspaceDirectory>, name: impl Into<String>, field: LookupField) -> Self {
        Self {
            directory,
            name: name.into(),
            field,
        }
    }
}

impl ContextResolver for RouteParameterResolver {
    fn name(&self) -> &'static str {
        ResolverKind::RouteParameter.as_str()
    }

    fn resolve(&self, request: &mut dyn RequestContext) -> Result<Option<Workspace>, WorkspaceError> {
        match request.route_param(&self.name) {
            None => Ok(None),
            Some(RouteParam::Workspace(workspace)) => Ok((!workspace.is_deleted()).then(|| workspace.clone())),
            Some(RouteParam::Value(value)) if value.trim().is_empty() => Ok(None),
            Some(RouteParam::Value(value)) => match self.field {
                LookupField::Id => self.directory.find_by_id(&WorkspaceId::new(value.trim())),
                LookupField::Slug => self.directory.find_by_slug(value.trim()),
            },
        }
    }
}

/// A workspace id in a header. An authenticated caller must be a member.
pub struct HeaderResolver {
    directory: Arc<dyn WorkspaceDirectory>,
    header: String,
}

impl HeaderResolver {
    pub fn new(directory: Arc<dyn WorkspaceDirectory>, header: impl Into<String>) -> Self {
        Self {
            directory,
            header: header.into(),
        }
    }
}

impl ContextResolver for HeaderResolver {
    fn name(&self) -> &'static str {
        ResolverKind::Header.as_str()
    }

    fn resolve(&self, request: &mut dyn RequestContext) -> Result<Option<Workspace>, WorkspaceError> {
        let Some(id) = request.header(&self.header).map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let Some(workspace) = self.directory.find_by_id(&WorkspaceId::new(id))? else {
            return Ok(None);
        };

        if let Some(principal) = request.principal() {
            if !self.directory.is_member(&principal.id, &workspace.id)? {
                debug!(
                    user_id = %principal.id,
                    workspace_id = %workspace.id,
                    "Header names a workspace the caller does not belong to"
                );
                return Ok(None);
            }
        }
        Ok(Some(workspace))
    }
}

/// A workspace id stored in the session. A stale entry is removed when
/// the caller is no longer a member.
pub struct SessionResolver {
    directory: Arc<dyn WorkspaceDirectory>,
    key: String,
}

impl SessionResolver {
    pub fn new(directory: Arc<dyn WorkspaceDirectory>, key: impl Into<String>) -> Self {
        Self {
            directory,
            key: key.into(),
        }
    }
}

impl ContextResolver for SessionResolver {
    fn name(&self) -> &'static str {
        ResolverKind::Session.as_str()
    }

    fn resolve(&self, request: &mut dyn RequestContext) -> Result<Option<Workspace>, WorkspaceError> {
        let Some(id) = request
            .session_get(&self.key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(WorkspaceId::new)
        else {
            return Ok(None);
        };
        let Some(workspace) = self.directory.find_by_id(&id)? else {
            return Ok(None);
        };

        let member = match request.principal() {
            Some(principal) => self.directory.is_member(&principal.id, &workspace.id)?,
            None => true,
        };
        if !member {
            debug!(workspace_id = %workspace.id, key = %self.key, "Clearing stale session workspace");
            request.session_forget(&self.key);
            return Ok(None);
        }
        Ok(Some(workspace))
    }
}

/// Build the resolver for `kind` from the context configuration
pub fn build_resolver(
    kind: ResolverKind,
    config: &ContextConfig,
    directory: Arc<dyn WorkspaceDirectory>,
) -> Box<dyn ContextResolver> {
    match kind {
        ResolverKind::AuthUser => Box::new(AuthUserResolver::new(directory)),
        ResolverKind::Subdomain => Box::new(SubdomainResolver::new(directory, config.subdomain.domain.clone())),
        ResolverKind::RouteParameter => Box::new(RouteParameterResolver::new(
            directory,
            config.route_parameter.name.clone(),
            config.route_parameter.field,
        )),
        ResolverKind::Header => Box::new(HeaderResolver::new(directory, config.header.name.clone())),
        ResolverKind::Session => Box::new(SessionResolver::new(directory, config.session.key.clone())),
    }
}

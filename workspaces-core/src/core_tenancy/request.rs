//! What the resolvers can see of an incoming request

use super::context::Principal;
use crate::core_workspace::workspace::Workspace;
use std::collections::HashMap;

/// A route parameter, either raw or already bound to a workspace by the router
#[derive(Debug, Clone, PartialEq)]
pub enum RouteParam {
    Value(String),
    Workspace(Workspace),
}

/// Read access to the parts of a request that can identify a workspace.
///
/// Only the session is writable, so a resolver can drop a stale entry.
pub trait RequestContext {
    /// The authenticated principal, if any
    fn principal(&self) -> Option<&Principal>;

    /// Host name, possibly with a port
    fn host(&self) -> Option<&str>;

    fn route_param(&self, name: &str) -> Option<&RouteParam>;

    /// Header lookup; names are case-insensitive
    fn header(&self, name: &str) -> Option<&str>;

    fn session_get(&self, key: &str) -> Option<&str>;

    fn session_forget(&mut self, key: &str);
}

/// A plain in-memory request, for hosts without their own request type
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    principal: Option<Principal>,
    host: Option<String>,
    headers: HashMap<String, String>,
    route_params: HashMap<String, RouteParam>,
    session: HashMap<String, String>,
}

impl RequestParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_route_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.route_params.insert(name.into(), RouteParam::Value(value.into()));
        self
    }

    pub fn with_bound_workspace(mut self, name: impl Into<String>, workspace: Workspace) -> Self {
        self.route_params.insert(name.into(), RouteParam::Workspace(workspace));
        self
    }

    pub fn with_session(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.session.insert(key.into(), value.into());
        self
    }
}

impl RequestContext for RequestParts {
    fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn route_param(&self, name: &str) -> Option<&RouteParam> {
        self.route_params.get(name)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn session_get(&self, key: &str) -> Option<&str> {
        self.session.get(key).map(String::as_str)
    }

    fn session_forget(&mut self, key: &str) {
        self.session.remove(key);
    }
}

//! Tenancy context: finding the current workspace of a request and
//! confining data access to it

pub mod chain;
pub mod context;
pub mod request;
pub mod resolver;
pub mod scope;

pub use chain::ContextResolutionChain;
pub use context::{Principal, WorkspaceContext};
pub use request::{RequestContext, RequestParts, RouteParam};
pub use resolver::{
    AuthUserResolver, ContextResolver, HeaderResolver, RouteParameterResolver, SessionResolver, SubdomainResolver,
    WorkspaceDirectory,
};
pub use scope::{ScopePredicate, ScopedQuery, TenancyScope, TenantScoped};

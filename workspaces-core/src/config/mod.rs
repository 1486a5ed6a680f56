//! Configuration management
//!
//! Configuration is loaded from a TOML file (or defaults), then overridden by
//! environment variables of the form `WORKSPACES_<SECTION>_<KEY>`, then
//! validated. Everything here is a read-only input to the core.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Current-workspace resolution
    pub context: ContextConfig,

    /// Tenancy scope behaviour
    pub scope: ScopeConfig,

    /// Role and permission table
    pub roles: RolesConfig,

    /// Invitation lifecycle
    pub invitations: InvitationConfig,

    /// Workspace auto-creation for new users
    pub registration: RegistrationConfig,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Maximum pooled connections
    pub pool_size: u32,

    /// How long a writer waits on a locked database
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

/// Resolver strategies, in the order they are consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    AuthUser,
    Subdomain,
    RouteParameter,
    Header,
    Session,
}

impl ResolverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolverKind::AuthUser => "auth_user",
            ResolverKind::Subdomain => "subdomain",
            ResolverKind::RouteParameter => "route_parameter",
            ResolverKind::Header => "header",
            ResolverKind::Session => "session",
        }
    }
}

impl FromStr for ResolverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auth_user" => Ok(ResolverKind::AuthUser),
            "subdomain" => Ok(ResolverKind::Subdomain),
            "route_parameter" => Ok(ResolverKind::RouteParameter),
            "header" => Ok(ResolverKind::Header),
            "session" => Ok(ResolverKind::Session),
            other => Err(ConfigError::invalid("context.resolvers", format!("unknown resolver '{other}'"))),
        }
    }
}

/// Workspace field a route parameter is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupField {
    Id,
    Slug,
}

impl FromStr for LookupField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(LookupField::Id),
            "slug" => Ok(LookupField::Slug),
            other => Err(ConfigError::invalid(
                "context.route_parameter.field",
                format!("unknown field '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Ordered resolver chain
    pub resolvers: Vec<ResolverKind>,

    pub subdomain: SubdomainConfig,
    pub route_parameter: RouteParameterConfig,
    pub header: HeaderConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubdomainConfig {
    /// Base domain, e.g. `example.com`
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteParameterConfig {
    pub name: String,
    pub field: LookupField,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Raise `MissingTenancyContext` instead of returning zero rows
    pub strict: bool,
}

/// One configured role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Display name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Permission strings; `*` and `prefix.*` are wildcards
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    /// Role given to a workspace creator
    pub owner_role: String,

    /// Role assigned when none is specified
    pub default_role: String,

    /// Every permission the application knows about
    pub available_permissions: Vec<String>,

    /// Role key -> definition
    pub definitions: BTreeMap<String, RoleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvitationConfig {
    pub enabled: bool,

    /// Lifetime of a new invitation
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Acceptance link template; `{token}` is substituted
    pub acceptance_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Create a personal workspace when a user registers
    pub auto_create_workspace: bool,

    /// Name of the personal workspace; `{name}` is substituted
    pub name_template: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/workspaces.db"),
            pool_size: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            resolvers: vec![ResolverKind::AuthUser, ResolverKind::Session],
            subdomain: SubdomainConfig::default(),
            route_parameter: RouteParameterConfig::default(),
            header: HeaderConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for RouteParameterConfig {
    fn default() -> Self {
        Self {
            name: "workspace".to_string(),
            field: LookupField::Slug,
        }
    }
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            name: "X-Workspace-Id".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: "current_workspace_id".to_string(),
        }
    }
}

fn role(name: &str, description: &str, permissions: &[&str]) -> RoleConfig {
    RoleConfig {
        name: name.to_string(),
        description: description.to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    }
}

impl Default for RolesConfig {
    fn default() -> Self {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            "owner".to_string(),
            role("Owner", "Full access to all workspace features", &["*"]),
        );
        definitions.insert(
            "admin".to_string(),
            role(
                "Admin",
                "Can manage members and settings",
                &["workspace.view", "workspace.update", "members.*", "invitations.*", "settings.*"],
            ),
        );
        definitions.insert(
            "member".to_string(),
            role(
                "Member",
                "Standard workspace member",
                &["workspace.view", "members.view", "invitations.view", "settings.view"],
            ),
        );
        definitions.insert(
            "guest".to_string(),
            role("Guest", "Limited read-only access", &["workspace.view"]),
        );

        let available_permissions = [
            "workspace.view",
            "workspace.update",
            "workspace.delete",
            "members.view",
            "members.invite",
            "members.remove",
            "members.update",
            "invitations.view",
            "invitations.create",
            "invitations.cancel",
            "settings.view",
            "settings.update",
        ]
        .iter()
        .map(|p| p.to_string())
        .collect();

        Self {
            owner_role: "owner".to_string(),
            default_role: "member".to_string(),
            available_permissions,
            definitions,
        }
    }
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
            acceptance_path: "/invitations/{token}/accept".to_string(),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            auto_create_workspace: false,
            name_template: "{name}'s Workspace".to_string(),
        }
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::invalid(key, e))
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| ConfigError::invalid(key, e))
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    ///
    /// Environment variables follow the pattern: WORKSPACES_<SECTION>_<KEY>
    /// Example: WORKSPACES_SCOPE_STRICT=true
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::parse_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// File (or defaults) first, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| env::var(key).ok())
    }

    /// Like [`Config::load`], reading overrides through `lookup`. Validation
    /// runs once, after the overrides, so a variable can repair a file value.
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::parse_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `WORKSPACES_*` overrides read through `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        // Store
        if let Some(path) = lookup("WORKSPACES_STORE_DATABASE_PATH") {
            self.store.database_path = PathBuf::from(path);
        }
        if let Some(size) = lookup("WORKSPACES_STORE_POOL_SIZE") {
            self.store.pool_size = parse_value("store.pool_size", &size)?;
        }
        if let Some(timeout) = lookup("WORKSPACES_STORE_BUSY_TIMEOUT") {
            self.store.busy_timeout = parse_duration("store.busy_timeout", &timeout)?;
        }

        // Logging
        if let Some(level) = lookup("WORKSPACES_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("WORKSPACES_LOG_JSON") {
            self.logging.json_format = parse_value("logging.json_format", &json)?;
        }

        // Context
        if let Some(list) = lookup("WORKSPACES_CONTEXT_RESOLVERS") {
            self.context.resolvers = list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(ResolverKind::from_str)
                .collect::<Result<_, _>>()?;
        }
        if let Some(domain) = lookup("WORKSPACES_CONTEXT_SUBDOMAIN_DOMAIN") {
            self.context.subdomain.domain = Some(domain);
        }
        if let Some(name) = lookup("WORKSPACES_CONTEXT_ROUTE_PARAMETER_NAME") {
            self.context.route_parameter.name = name;
        }
        if let Some(field) = lookup("WORKSPACES_CONTEXT_ROUTE_PARAMETER_FIELD") {
            self.context.route_parameter.field = field.parse()?;
        }
        if let Some(name) = lookup("WORKSPACES_CONTEXT_HEADER_NAME") {
            self.context.header.name = name;
        }
        if let Some(key) = lookup("WORKSPACES_CONTEXT_SESSION_KEY") {
            self.context.session.key = key;
        }

        // Scope
        if let Some(strict) = lookup("WORKSPACES_SCOPE_STRICT") {
            self.scope.strict = parse_value("scope.strict", &strict)?;
        }

        // Invitations
        if let Some(enabled) = lookup("WORKSPACES_INVITATIONS_ENABLED") {
            self.invitations.enabled = parse_value("invitations.enabled", &enabled)?;
        }
        if let Some(ttl) = lookup("WORKSPACES_INVITATIONS_TTL") {
            self.invitations.ttl = parse_duration("invitations.ttl", &ttl)?;
        }
        if let Some(path) = lookup("WORKSPACES_INVITATIONS_ACCEPTANCE_PATH") {
            self.invitations.acceptance_path = path;
        }

        // Registration
        if let Some(auto) = lookup("WORKSPACES_REGISTRATION_AUTO_CREATE_WORKSPACE") {
            self.registration.auto_create_workspace = parse_value("registration.auto_create_workspace", &auto)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "store.pool_size must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        if self.context.resolvers.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "context.resolvers must list at least one resolver".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for kind in &self.context.resolvers {
            if !seen.insert(kind) {
                return Err(ConfigError::ValidationFailed(format!(
                    "resolver '{}' is listed twice",
                    kind.as_str()
                )));
            }
        }
        if self.context.resolvers.contains(&ResolverKind::Subdomain) {
            let domain = self.context.subdomain.domain.as_deref().unwrap_or("").trim();
            if domain.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "subdomain resolver requires context.subdomain.domain".to_string(),
                ));
            }
        }

        for (key, role) in [
            ("roles.owner_role", &self.roles.owner_role),
            ("roles.default_role", &self.roles.default_role),
        ] {
            if !self.roles.definitions.contains_key(role) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{key} '{role}' is not defined in roles.definitions"
                )));
            }
        }

        if self.invitations.ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "invitations.ttl must be greater than 0".to_string(),
            ));
        }
        if !self.invitations.acceptance_path.contains("{token}") {
            return Err(ConfigError::ValidationFailed(
                "invitations.acceptance_path must contain {token}".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}

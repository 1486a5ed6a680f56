//! Tenancy scoping for workspace-owned records
//!
//! With a current workspace, queries are restricted to its rows and new
//! records are stamped with its id. Without one, a scoped query matches
//! nothing, or fails with `MissingTenancyContext` in strict mode. It never
//! falls back to the whole table. Cross-tenant access goes through the
//! explicit [`TenancyScope::without_scope`], [`TenancyScope::all_workspaces`]
//! and [`TenancyScope::for_workspace`].

use super::context::WorkspaceContext;
use crate::config::ScopeConfig;
use crate::core_workspace::error::WorkspaceError;
use crate::core_workspace::storage::StoreError;
use crate::core_workspace::types::WorkspaceId;
use crate::metrics;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use tracing::debug;

/// A record owned by one workspace
pub trait TenantScoped {
    fn tenant_key(&self) -> Option<&WorkspaceId>;

    fn set_tenant_key(&mut self, workspace: WorkspaceId);
}

/// Row filter on the tenant column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopePredicate {
    Workspace(WorkspaceId),
    /// Explicit bypass: every row
    Unscoped,
    /// Fail-closed: no row
    Nothing,
}

impl ScopePredicate {
    /// SQL fragment and its parameters
    pub fn to_sql(&self, column: &str) -> (String, Vec<Value>) {
        match self {
            ScopePredicate::Workspace(id) => (
                format!("{} = ?", quote_ident(column)),
                vec![Value::Text(id.as_str().to_string())],
            ),
            ScopePredicate::Unscoped => ("1 = 1".to_string(), Vec::new()),
            ScopePredicate::Nothing => ("1 = 0".to_string(), Vec::new()),
        }
    }

    pub fn matches(&self, tenant: Option<&WorkspaceId>) -> bool {
        match self {
            ScopePredicate::Workspace(id) => tenant == Some(id),
            ScopePredicate::Unscoped => true,
            ScopePredicate::Nothing => false,
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TenancyScope {
    strict: bool,
}

impl TenancyScope {
    pub fn new(config: &ScopeConfig) -> Self {
        Self { strict: config.strict }
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Predicate for the request's current workspace
    pub fn predicate(&self, ctx: &WorkspaceContext) -> Result<ScopePredicate, WorkspaceError> {
        match ctx.current_id() {
            Some(id) => Ok(ScopePredicate::Workspace(id.clone())),
            None => {
                metrics::record(metrics::SCOPE_DENIED);
                if self.strict {
                    Err(WorkspaceError::MissingTenancyContext)
                } else {
                    debug!("Scoped query without a current workspace matches nothing");
                    Ok(ScopePredicate::Nothing)
                }
            }
        }
    }

    pub fn without_scope(&self) -> ScopePredicate {
        ScopePredicate::Unscoped
    }

    pub fn all_workspaces(&self) -> ScopePredicate {
        self.without_scope()
    }

    pub fn for_workspace(&self, workspace: &WorkspaceId) -> ScopePredicate {
        ScopePredicate::Workspace(workspace.clone())
    }

    /// Give a new record the current workspace if it has none.
    ///
    /// Returns whether the record was stamped. An explicit tenant is kept.
    pub fn stamp<T: TenantScoped>(&self, ctx: &WorkspaceContext, record: &mut T) -> Result<bool, WorkspaceError> {
        if record.tenant_key().is_some() {
            return Ok(false);
        }
        match ctx.current_id() {
            Some(id) => {
                record.set_tenant_key(id.clone());
                Ok(true)
            }
            None if self.strict => Err(WorkspaceError::MissingTenancyContext),
            None => Ok(false),
        }
    }

    /// Keep the records visible in the request's current workspace
    pub fn filter<T: TenantScoped>(&self, ctx: &WorkspaceContext, records: Vec<T>) -> Result<Vec<T>, WorkspaceError> {
        let predicate = self.predicate(ctx)?;
        Ok(records
            .into_iter()
            .filter(|r| predicate.matches(r.tenant_key()))
            .collect())
    }

    /// Start a query on `table` scoped to the current workspace
    pub fn query(&self, ctx: &WorkspaceContext, table: &str) -> Result<ScopedQuery, WorkspaceError> {
        Ok(ScopedQuery::new(table, self.predicate(ctx)?))
    }
}

/// `SELECT ... FROM table WHERE <scope> [AND column = ?]...`
#[derive(Debug, Clone)]
pub struct ScopedQuery {
    table: String,
    tenant_column: String,
    columns: Vec<String>,
    predicate: ScopePredicate,
    filters: Vec<(String, Value)>,
    order_by: Option<String>,
}

impl ScopedQuery {
    pub fn new(table: impl Into<String>, predicate: ScopePredicate) -> Self {
        Self {
            table: table.into(),
            tenant_column: "workspace_id".to_string(),
            columns: Vec::new(),
            predicate,
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn tenant_column(mut self, column: impl Into<String>) -> Self {
        self.tenant_column = column.into();
        self
    }

    /// Select these columns instead of `*`
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add an equality condition
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn predicate(&self) -> &ScopePredicate {
        &self.predicate
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let (scope, mut params) = self.predicate.to_sql(&self.tenant_column);
        let mut clause = scope;
        for (column, value) in &self.filters {
            clause.push_str(&format!(" AND {} = ?", quote_ident(column)));
            params.push(value.clone());
        }
        (clause, params)
    }

    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
        };
        let (clause, params) = self.where_clause();
        let mut sql = format!("SELECT {} FROM {} WHERE {}", columns, quote_ident(&self.table), clause);
        if let Some(order) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {}", quote_ident(order)));
        }
        (sql, params)
    }

    pub fn fetch<T>(
        &self,
        conn: &Connection,
        mut map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, StoreError> {
        let (sql, params) = self.to_sql();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| map(row))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn count(&self, conn: &Connection) -> Result<usize, StoreError> {
        let (clause, params) = self.where_clause();
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", quote_ident(&self.table), clause);
        let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_workspace::types::Timestamp;
    use crate::core_workspace::workspace::Workspace;

    #[derive(Debug, Clone, PartialEq)]
    struct Project {
        name: String,
        workspace_id: Option<WorkspaceId>,
    }

    impl Project {
        fn new(name: &str, workspace: Option<&str>) -> Self {
            Self {
                name: name.to_string(),
                workspace_id: workspace.map(WorkspaceId::new),
            }
        }
    }

    impl TenantScoped for Project {
        fn tenant_key(&self) -> Option<&WorkspaceId> {
            self.workspace_id.as_ref()
        }

        fn set_tenant_key(&mut self, workspace: WorkspaceId) {
            self.workspace_id = Some(workspace);
        }
    }

    fn bound(id: &str) -> WorkspaceContext {
        WorkspaceContext::bound_to(Workspace {
            id: WorkspaceId::new(id),
            name: id.to_string(),
            slug: id.to_string(),
            owner_id: None,
            settings: serde_json::json!({}),
            personal: false,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
            deleted_at: None,
        })
    }

    fn projects_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE projects (id INTEGER PRIMARY KEY, workspace_id TEXT, name TEXT NOT NULL);
             INSERT INTO projects (workspace_id, name) VALUES
                ('ws-a', 'alpha'), ('ws-a', 'beta'), ('ws-b', 'gamma'), (NULL, 'orphan');",
        )
        .unwrap();
        conn
    }

    fn names(conn: &Connection, query: &ScopedQuery) -> Vec<String> {
        query.fetch(conn, |row| row.get("name")).unwrap()
    }

    #[test]
    fn test_scoped_query_current_workspace() {
        let conn = projects_db();
        let scope = TenancyScope::default();
        let query = scope.query(&bound("ws-a"), "projects").unwrap().order_by("name");

        assert_eq!(names(&conn, &query), vec!["alpha", "beta"]);
        assert_eq!(query.count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_fail_closed_without_context() {
        let conn = projects_db();
        let scope = TenancyScope::default();
        let query = scope.query(&WorkspaceContext::new(), "projects").unwrap();

        assert_eq!(query.predicate(), &ScopePredicate::Nothing);
        assert!(names(&conn, &query).is_empty());
        assert_eq!(query.count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_strict_mode_raises() {
        let scope = TenancyScope::new(&ScopeConfig { strict: true });
        assert!(matches!(
            scope.query(&WorkspaceContext::new(), "projects"),
            Err(WorkspaceError::MissingTenancyContext)
        ));
        assert!(matches!(
            scope.stamp(&WorkspaceContext::new(), &mut Project::new("x", None)),
            Err(WorkspaceError::MissingTenancyContext)
        ));
    }

    #[test]
    fn test_escape_hatches() {
        let conn = projects_db();
        let scope = TenancyScope::strict();

        let all = ScopedQuery::new("projects", scope.without_scope());
        assert_eq!(all.count(&conn).unwrap(), 4);
        assert_eq!(ScopedQuery::new("projects", scope.all_workspaces()).count(&conn).unwrap(), 4);

        let other = ScopedQuery::new("projects", scope.for_workspace(&WorkspaceId::new("ws-b")));
        assert_eq!(names(&conn, &other), vec!["gamma"]);
    }

    #[test]
    fn test_extra_filters_stay_scoped() {
        let conn = projects_db();
        let query = TenancyScope::default()
            .query(&bound("ws-b"), "projects")
            .unwrap()
            .filter("name", "alpha".to_string());
        assert!(names(&conn, &query).is_empty());

        let (sql, params) = query.to_sql();
        assert_eq!(sql, r#"SELECT * FROM "projects" WHERE "workspace_id" = ? AND "name" = ?"#);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_identifiers_are_quoted() {
        let query = ScopedQuery::new("projects\"; DROP TABLE projects; --", ScopePredicate::Unscoped);
        let (sql, _) = query.to_sql();
        assert!(sql.starts_with(r#"SELECT * FROM "projects""; DROP"#));
    }

    #[test]
    fn test_stamp_on_create() {
        let scope = TenancyScope::default();
        let ctx = bound("ws-a");

        let mut fresh = Project::new("new", None);
        assert!(scope.stamp(&ctx, &mut fresh).unwrap());
        assert_eq!(fresh.workspace_id, Some(WorkspaceId::new("ws-a")));

        let mut explicit = Project::new("explicit", Some("ws-b"));
        assert!(!scope.stamp(&ctx, &mut explicit).unwrap());
        assert_eq!(explicit.workspace_id, Some(WorkspaceId::new("ws-b")));

        let mut unbound = Project::new("unbound", None);
        assert!(!scope.stamp(&WorkspaceContext::new(), &mut unbound).unwrap());
        assert!(unbound.workspace_id.is_none());
    }

    #[test]
    fn test_in_memory_filter() {
        let scope = TenancyScope::default();
        let records = vec![
            Project::new("alpha", Some("ws-a")),
            Project::new("gamma", Some("ws-b")),
            Project::new("orphan", None),
        ];

        let visible = scope.filter(&bound("ws-a"), records.clone()).unwrap();
        assert_eq!(visible, vec![Project::new("alpha", Some("ws-a"))]);
        assert!(scope.filter(&WorkspaceContext::new(), records).unwrap().is_empty());
    }
}

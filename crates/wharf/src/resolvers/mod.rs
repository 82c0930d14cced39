//! Resolvers for the object kinds wharf manages.
//!
//! Each submodule implements [`Resolver`](crate::Resolver) for one kind.
//! Shared introspection helpers live here.

mod database;
pub use database::{DatabaseResolver, ExistingDatabase};

mod function;
pub use function::{ExistingFunction, FunctionResolver};

mod masking_policy;
pub use masking_policy::{ExistingMaskingPolicy, MaskingPolicyResolver};

mod primary_key;
pub use primary_key::{ExistingPrimaryKey, PrimaryKeyResolver};

mod role;
pub use role::{ExistingRole, RoleResolver};

mod schema;
pub use schema::{ExistingSchema, SchemaResolver};

mod table;
pub use table::{ColumnChange, ExistingTable, TableResolver, diff_columns};

mod view;
pub use view::{ExistingView, ViewResolver};

mod warehouse;
pub use warehouse::{ExistingWarehouse, WarehouseResolver};

use wharf_sql::{SqlParams, format_sql};

use crate::transport::Row;
use crate::{DatabaseIdent, Engine, Identifier, ObjectKind, Result, SchemaIdent};

/// Render a template, turning formatter failures into [`crate::Error`].
pub(crate) fn render(template: &str, params: &SqlParams) -> Result<String> {
    Ok(format_sql(template, params)?)
}

/// `COMMENT = '...'` or nothing.
pub(crate) fn comment_clause(comment: Option<&str>) -> Result<Option<String>> {
    comment
        .map(|c| render("COMMENT = {comment}", &SqlParams::new().bind("comment", c)))
        .transpose()
}

/// Whether a `SHOW` options column (`TRANSIENT, MANAGED ACCESS`) lists `option`.
pub(crate) fn has_option(row: &Row, option: &str) -> bool {
    row.get_str("options").is_some_and(|opts| {
        opts.split(',')
            .any(|o| o.trim().eq_ignore_ascii_case(option))
    })
}

/// Every database this environment owns, with its `SHOW DATABASES` row.
///
/// Databases imported from shares are not ours to manage and are left out.
pub(crate) fn show_databases(engine: &Engine) -> Result<Vec<(DatabaseIdent, Row)>> {
    let prefix = engine.env_prefix();
    let mut out = Vec::new();

    for row in engine.execute_meta("SHOW DATABASES")? {
        let Some(name) = row.get_str("name") else {
            continue;
        };
        if row.get_str("origin").is_some() || !name.starts_with(prefix) {
            continue;
        }
        match DatabaseIdent::parse(prefix, name) {
            Ok(ident) => out.push((ident, row)),
            Err(_) => engine
                .intentions()
                .mark_invalid_name(ObjectKind::Database, name),
        }
    }
    Ok(out)
}

/// Databases to introspect for schemas: existing and not being dropped.
pub(crate) fn database_scopes(engine: &Engine) -> Result<Vec<DatabaseIdent>> {
    Ok(show_databases(engine)?
        .into_iter()
        .map(|(ident, _)| ident)
        .filter(|db| {
            !engine
                .intentions()
                .is_marked_drop(ObjectKind::Database, &db.text())
        })
        .collect())
}

/// Schemas to introspect for schema objects: existing, owned by this
/// environment, and not being dropped along with their database.
pub(crate) fn schema_scopes(engine: &Engine) -> Result<Vec<SchemaIdent>> {
    let prefix = engine.env_prefix();
    let intentions = engine.intentions();
    let mut out = Vec::new();

    for row in engine.execute_meta("SHOW SCHEMAS IN ACCOUNT")? {
        let (Some(db), Some(name)) = (row.get_str("database_name"), row.get_str("name")) else {
            continue;
        };
        if name.eq_ignore_ascii_case("INFORMATION_SCHEMA") || !db.starts_with(prefix) {
            continue;
        }
        let schema = match SchemaIdent::parse(prefix, &format!("{db}.{name}")) {
            Ok(schema) => schema,
            Err(_) => {
                intentions.mark_invalid_name(ObjectKind::Schema, &format!("{db}.{name}"));
                continue;
            }
        };
        let text = schema.text();
        if intentions.is_marked_drop(ObjectKind::Schema, &text)
            || intentions.is_parent_marked_drop(ObjectKind::Schema, &text)
        {
            continue;
        }
        out.push(schema);
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use wharf_config::Settings;

    use crate::transport::{ColumnMeta, ExecutionError, Row, Transport};
    use crate::{Config, Engine};

    /// Answers statements by prefix and records everything it is sent.
    /// The first registered prefix that matches wins; anything else gets no
    /// rows.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Vec<(String, Vec<Row>)>,
        failing: Vec<String>,
        pub statements: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn respond(mut self, prefix: &str, rows: Vec<Row>) -> Self {
            self.responses.push((prefix.to_string(), rows));
            self
        }

        pub(crate) fn fail(mut self, prefix: &str) -> Self {
            self.failing.push(prefix.to_string());
            self
        }

        /// Statements that were not introspection.
        pub(crate) fn ddl(&self) -> Vec<String> {
            self.statements
                .lock()
                .unwrap()
                .iter()
                .filter(|s| !(s.starts_with("SHOW") || s.starts_with("DESC") || s.starts_with("SELECT")))
                .cloned()
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, sql: &str) -> std::result::Result<Vec<Row>, ExecutionError> {
            self.statements.lock().unwrap().push(sql.to_string());
            if self.failing.iter().any(|p| sql.starts_with(p.as_str())) {
                return Err(ExecutionError::new("rejected", sql));
            }
            Ok(self
                .responses
                .iter()
                .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default())
        }

        fn describe(&self, _sql: &str) -> std::result::Result<Vec<ColumnMeta>, ExecutionError> {
            Ok(Vec::new())
        }
    }

    pub(crate) fn engine(
        transport: &Arc<ScriptedTransport>,
        config: Config,
        settings: Settings,
    ) -> Arc<Engine> {
        Arc::new(Engine::new(transport.clone(), config, settings).unwrap())
    }
}

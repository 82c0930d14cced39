#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use wharf::transport::{ColumnMeta, ExecutionError, Row, Transport};
use wharf::{Config, Engine, Settings};

/// Log to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// A warehouse that answers introspection from a script and records every
/// statement it receives.
///
/// Responses are matched by statement prefix, first match wins. Unmatched
/// statements succeed with no rows.
#[derive(Default)]
pub struct FakeWarehouse {
    responses: Vec<(String, Vec<Row>)>,
    failing: Vec<String>,
    statements: Mutex<Vec<String>>,
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, prefix: &str, rows: Vec<Row>) -> Self {
        self.responses.push((prefix.to_string(), rows));
        self
    }

    pub fn fail(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Everything that was not introspection.
    pub fn ddl(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| !(s.starts_with("SHOW") || s.starts_with("DESC") || s.starts_with("SELECT")))
            .collect()
    }
}

impl Transport for FakeWarehouse {
    fn execute(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        self.statements.lock().unwrap().push(sql.to_string());
        if self.failing.iter().any(|p| sql.starts_with(p.as_str())) {
            return Err(ExecutionError::new("SQL compilation error", sql));
        }
        Ok(self
            .responses
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn describe(&self, _sql: &str) -> Result<Vec<ColumnMeta>, ExecutionError> {
        Ok(Vec::new())
    }
}

pub fn engine(warehouse: &Arc<FakeWarehouse>, config: Config, settings: Settings) -> Arc<Engine> {
    init_tracing();
    Arc::new(Engine::new(warehouse.clone(), config, settings).unwrap())
}

/// Rows for `SHOW SCHEMAS IN ACCOUNT`.
pub fn account_schemas(schemas: &[(&str, &str)]) -> Vec<Row> {
    schemas
        .iter()
        .map(|(db, name)| Row::new().with("database_name", *db).with("name", *name))
        .collect()
}

/// Rows for `DESC TABLE`: name, type, nullable.
pub fn columns(columns: &[(&str, &str, bool)]) -> Vec<Row> {
    columns
        .iter()
        .map(|(name, data_type, nullable)| {
            Row::new()
                .with("name", *name)
                .with("type", *data_type)
                .with("null?", if *nullable { "Y" } else { "N" })
        })
        .collect()
}

/// The literal stored by `COMMENT = '...'` in a statement.
pub fn comment_of(sql: &str) -> Option<String> {
    let start = sql.find("COMMENT = '")? + "COMMENT = '".len();
    let end = sql[start..].find('\'')?;
    Some(sql[start..start + end].to_string())
}

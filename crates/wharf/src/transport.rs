//! The warehouse connection contract.
//!
//! The engine only needs two calls: run a statement and get rows back, and
//! describe a statement's result columns without running it. Both are
//! synchronous; the engine runs them on blocking worker threads.

use std::fmt;

use indexmap::IndexMap;

/// A single cell of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One result row. Column names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and fake transports.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<Value>) {
        self.columns.insert(column.to_lowercase(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(&column.to_lowercase())
    }

    /// Text value; empty strings read as absent.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        match self.get(column)? {
            Value::Text(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Booleans come back as `true`, `Y`, `ON` or numbers depending on the
    /// statement, so all of those are accepted.
    pub fn get_bool(&self, column: &str) -> bool {
        match self.get(column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Int(n)) => *n != 0,
            Some(Value::Text(s)) => matches!(
                s.to_uppercase().as_str(),
                "TRUE" | "Y" | "YES" | "ON" | "1"
            ),
            _ => false,
        }
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_u32(&self, column: &str) -> Option<u32> {
        self.get_i64(column).and_then(|n| u32::try_from(n).ok())
    }
}

/// Result column metadata from `describe`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// A statement rejected by the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError {
    pub message: String,
    pub sql: String,
    pub code: Option<i64>,
    pub sql_state: Option<String>,
    pub request_id: Option<String>,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql: sql.into(),
            code: None,
            sql_state: None,
            request_id: None,
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = self.code {
            write!(f, " (code {code}")?;
            if let Some(state) = &self.sql_state {
                write!(f, ", state {state}")?;
            }
            write!(f, ")")?;
        }
        if let Some(id) = &self.request_id {
            write!(f, " [request {id}]")?;
        }
        write!(f, "\n  sql: {}", self.sql)
    }
}

impl std::error::Error for ExecutionError {}

/// A synchronous warehouse client.
pub trait Transport: Send + Sync {
    fn execute(&self, sql: &str) -> Result<Vec<Row>, ExecutionError>;

    fn describe(&self, sql: &str) -> Result<Vec<ColumnMeta>, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_columns_are_case_insensitive() {
        let row = Row::new().with("Name", "ACME").with("retention_time", "7");
        assert_eq!(row.get_str("NAME"), Some("ACME"));
        assert_eq!(row.get_u32("RETENTION_TIME"), Some(7));
        assert_eq!(row.get_str("comment"), None);
    }

    #[test]
    fn test_row_bool_forms() {
        let row = Row::new()
            .with("a", "Y")
            .with("b", true)
            .with("c", "false")
            .with("d", 1i64);
        assert!(row.get_bool("a"));
        assert!(row.get_bool("b"));
        assert!(!row.get_bool("c"));
        assert!(row.get_bool("d"));
        assert!(!row.get_bool("missing"));
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError {
            code: Some(2003),
            sql_state: Some("02000".to_string()),
            request_id: Some("abc".to_string()),
            ..ExecutionError::new("Object does not exist", "DROP TABLE \"T\"")
        };
        insta::assert_snapshot!(err.to_string(), @r#"
        Object does not exist (code 2003, state 02000) [request abc]
          sql: DROP TABLE "T"
        "#);
    }
}

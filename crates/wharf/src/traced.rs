//! Traced transport wrapper.
//!
//! Wraps any [`Transport`] and logs every statement via tracing.

use std::sync::Arc;

use crate::transport::{ColumnMeta, ExecutionError, Row, Transport};

/// A transport whose calls each run inside a `debug` span.
///
/// # Example
///
/// ```ignore
/// use wharf::TracedTransport;
///
/// let transport = TracedTransport::new(Arc::new(client));
///
/// // Every statement is recorded with its row count
/// transport.execute("SHOW DATABASES")?;
/// ```
#[derive(Clone)]
pub struct TracedTransport {
    inner: Arc<dyn Transport>,
}

impl TracedTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }

    /// Get the wrapped transport.
    pub fn inner(&self) -> &Arc<dyn Transport> {
        &self.inner
    }
}

impl Transport for TracedTransport {
    fn execute(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        let span = tracing::debug_span!(
            "warehouse.execute",
            sql = %sql,
            rows = tracing::field::Empty,
            error = tracing::field::Empty,
        );
        let _guard = span.enter();
        match self.inner.execute(sql) {
            Ok(rows) => {
                span.record("rows", rows.len());
                Ok(rows)
            }
            Err(e) => {
                span.record("error", tracing::field::display(&e.message));
                Err(e)
            }
        }
    }

    fn describe(&self, sql: &str) -> Result<Vec<ColumnMeta>, ExecutionError> {
        let span = tracing::debug_span!(
            "warehouse.describe",
            sql = %sql,
            columns = tracing::field::Empty,
        );
        let _guard = span.enter();
        let columns = self.inner.describe(sql)?;
        span.record("columns", columns.len());
        Ok(columns)
    }
}

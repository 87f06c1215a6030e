//! Per-table statement execution with metrics and logging

use crate::session::{Query, Row, Session};
use tracevault_common::{Error, MetricsFactory, Result, TableMetrics};
use tracing::error;

/// Executes writes against one table, recording attempts, inserts and errors
#[derive(Debug, Clone)]
pub struct TableWriter {
    metrics: TableMetrics,
}

impl TableWriter {
    pub fn new(factory: &dyn MetricsFactory, table: &str) -> Self {
        Self {
            metrics: TableMetrics::new(factory, table),
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        self.metrics.table()
    }

    /// Execute `query`; each call counts exactly one insert or one error
    pub async fn exec(&self, session: &dyn Session, query: &Query) -> Result<()> {
        self.metrics.record_attempt();
        match session.execute(query).await {
            Ok(()) => {
                self.metrics.record_insert();
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error();
                error!(query = %query, error = %e, "Failed to exec query");
                Err(Error::exec(query.to_string(), e))
            }
        }
    }
}

/// Iterate all rows of `query`, decoding each with `decode`.
///
/// Iteration stops at the first row the cursor cannot produce or `decode`
/// rejects. A cursor error on close discards everything read so far.
pub async fn read_rows<T>(
    session: &dyn Session,
    query: &Query,
    table: &str,
    decode: impl Fn(&Row) -> Option<T> + Send,
) -> Result<Vec<T>> {
    let mut iter = session.iter(query).await;
    let mut out = Vec::new();
    while let Some(row) = iter.scan().await {
        match decode(&row) {
            Some(item) => out.push(item),
            None => break,
        }
    }
    iter.close().await.map_err(|e| Error::read(table, e))?;
    Ok(out)
}

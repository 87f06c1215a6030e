//! Operation-name index on the column-family backend
//!
//! Two table shapes exist in deployed keyspaces. The newer one carries the
//! span kind; the older one does not. Which one is used is decided once, by
//! probing for the newer table when the store is built.

use crate::session::{Query, Row, Session};
use crate::table::{TableWriter, read_rows};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracevault_common::{
    MetricsFactory, Operation, OperationName, OperationQueryParameters, Result, WriteCache,
};
use tracing::debug;

pub const PREVIOUS_TABLE: &str = "operation_names";
pub const LATEST_TABLE: &str = "operation_names_v2";

const INSERT_PREVIOUS: &str =
    "INSERT INTO operation_names(service_name, operation_name) VALUES (?, ?)";
const QUERY_PREVIOUS: &str = "SELECT operation_name FROM operation_names WHERE service_name = ?";

const INSERT_LATEST: &str =
    "INSERT INTO operation_names_v2(service_name, span_kind, operation_name) VALUES (?, ?, ?)";
const QUERY_LATEST: &str =
    "SELECT span_kind, operation_name FROM operation_names_v2 WHERE service_name = ?";
const QUERY_LATEST_BY_KIND: &str = "SELECT span_kind, operation_name FROM operation_names_v2 WHERE service_name = ? AND span_kind = ?";

/// Table shape detected at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// `operation_names`: (service, operation)
    Previous,
    /// `operation_names_v2`: (service, kind, operation)
    Latest,
}

impl SchemaVersion {
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Previous => PREVIOUS_TABLE,
            Self::Latest => LATEST_TABLE,
        }
    }

    /// Probe for the newer table; any failure means it is absent
    pub async fn detect(session: &dyn Session) -> Self {
        let probe = Query::new(format!("SELECT * from {LATEST_TABLE} limit 1"));
        match session.execute(&probe).await {
            Ok(()) => Self::Latest,
            Err(e) => {
                debug!(error = %e, "{} not found, using {}", LATEST_TABLE, PREVIOUS_TABLE);
                Self::Previous
            }
        }
    }

    fn key(self, operation: &Operation) -> OperationKey {
        match self {
            Self::Previous => OperationKey::Previous {
                service: operation.service_name.clone(),
                operation: operation.operation_name.clone(),
            },
            Self::Latest => OperationKey::Latest {
                service: operation.service_name.clone(),
                kind: operation.span_kind.clone(),
                operation: operation.operation_name.clone(),
            },
        }
    }

    fn insert(self, operation: &Operation) -> Query {
        match self {
            Self::Previous => Query::new(INSERT_PREVIOUS)
                .bind(operation.service_name.as_str())
                .bind(operation.operation_name.as_str()),
            Self::Latest => Query::new(INSERT_LATEST)
                .bind(operation.service_name.as_str())
                .bind(operation.span_kind.as_str())
                .bind(operation.operation_name.as_str()),
        }
    }

    fn select(self, params: &OperationQueryParameters) -> Query {
        match (self, params.span_kind.as_deref()) {
            (Self::Previous, _) => Query::new(QUERY_PREVIOUS).bind(params.service_name.as_str()),
            (Self::Latest, None | Some("")) => {
                Query::new(QUERY_LATEST).bind(params.service_name.as_str())
            }
            (Self::Latest, Some(kind)) => Query::new(QUERY_LATEST_BY_KIND)
                .bind(params.service_name.as_str())
                .bind(kind),
        }
    }

    fn decode(self, row: &Row) -> Option<OperationName> {
        match self {
            Self::Previous => Some(OperationName {
                span_kind: String::new(),
                name: row.text(0)?.to_string(),
            }),
            Self::Latest => Some(OperationName {
                span_kind: row.text(0)?.to_string(),
                name: row.text(1)?.to_string(),
            }),
        }
    }
}

/// Dedup key, shaped after the active table's primary key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKey {
    Previous { service: String, operation: String },
    Latest {
        service: String,
        kind: String,
        operation: String,
    },
}

/// Write-through store for service operation names
pub struct OperationNamesStorage {
    session: Arc<dyn Session>,
    schema: SchemaVersion,
    writer: TableWriter,
    cache: WriteCache<OperationKey>,
}

impl OperationNamesStorage {
    /// Build the store, probing the backend once for the table shape.
    ///
    /// A zero `write_cache_ttl` sends every write to the backend.
    pub async fn new(
        session: Arc<dyn Session>,
        write_cache_ttl: Duration,
        metrics: &dyn MetricsFactory,
    ) -> Self {
        let schema = SchemaVersion::detect(session.as_ref()).await;
        Self {
            writer: TableWriter::new(metrics, schema.table()),
            cache: WriteCache::new(write_cache_ttl),
            session,
            schema,
        }
    }

    #[must_use]
    pub const fn schema(&self) -> SchemaVersion {
        self.schema
    }

    /// Record an operation unless it was written within the cache TTL
    pub async fn write(&self, operation: &Operation) -> Result<()> {
        let key = self.schema.key(operation);
        if !self.cache.should_write(&key) {
            return Ok(());
        }
        let query = self.schema.insert(operation);
        self.writer.exec(self.session.as_ref(), &query).await?;
        self.cache.mark_written(key, Instant::now());
        Ok(())
    }

    /// Operations of a service in backend order.
    ///
    /// The previous table has no kind column, so a kind filter is ignored
    /// and every returned kind is empty.
    pub async fn get_operations(
        &self,
        params: &OperationQueryParameters,
    ) -> Result<Vec<OperationName>> {
        let schema = self.schema;
        read_rows(
            self.session.as_ref(),
            &schema.select(params),
            schema.table(),
            move |row| schema.decode(row),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Row, Value};
    use crate::testing::{FakeSession, LogBuffer};
    use tracevault_common::{Error, LocalMetrics};

    fn op(service: &str, kind: &str, name: &str) -> Operation {
        Operation {
            service_name: service.to_string(),
            span_kind: kind.to_string(),
            operation_name: name.to_string(),
        }
    }

    async fn storage(
        session: &Arc<FakeSession>,
        ttl: Duration,
        metrics: &LocalMetrics,
    ) -> OperationNamesStorage {
        let session: Arc<dyn Session> = Arc::clone(session) as Arc<dyn Session>;
        OperationNamesStorage::new(session, ttl, metrics).await
    }

    #[tokio::test]
    async fn test_detect_selects_schema() {
        let metrics = LocalMetrics::new();
        let latest = storage(&Arc::new(FakeSession::latest()), Duration::ZERO, &metrics).await;
        assert_eq!(latest.schema(), SchemaVersion::Latest);

        let previous = storage(&Arc::new(FakeSession::previous()), Duration::ZERO, &metrics).await;
        assert_eq!(previous.schema(), SchemaVersion::Previous);
    }

    #[tokio::test]
    async fn test_write_is_deduplicated_within_ttl() {
        for session in [FakeSession::previous(), FakeSession::latest()] {
            let session = Arc::new(session);
            let metrics = LocalMetrics::new();
            let store = storage(&session, Duration::from_secs(60), &metrics).await;
            let table = store.schema().table();

            store.write(&op("service-a", "", "Operation-b")).await.unwrap();
            assert_eq!(
                metrics.counter_value(&format!("inserts|table={table}")),
                Some(1)
            );

            store.write(&op("service-a", "", "Operation-b")).await.unwrap();
            assert_eq!(
                metrics.counter_value(&format!("inserts|table={table}")),
                Some(1)
            );
            assert_eq!(
                metrics.counter_value(&format!("attempts|table={table}")),
                Some(1)
            );
            assert_eq!(session.executed_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_latest_schema_keys_on_kind() {
        let session = Arc::new(FakeSession::latest());
        let metrics = LocalMetrics::new();
        let store = storage(&session, Duration::from_secs(60), &metrics).await;

        store.write(&op("svc", "server", "GET")).await.unwrap();
        store.write(&op("svc", "client", "GET")).await.unwrap();
        assert_eq!(session.executed_count(), 2);

        let executed = session.executed.lock();
        assert_eq!(executed[0].statement(), INSERT_LATEST);
        assert_eq!(
            executed[0].values(),
            &[
                Value::from("svc"),
                Value::from("server"),
                Value::from("GET")
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_ttl_writes_every_time() {
        let session = Arc::new(FakeSession::previous());
        let metrics = LocalMetrics::new();
        let store = storage(&session, Duration::ZERO, &metrics).await;

        for _ in 0..3 {
            store.write(&op("service-a", "", "Operation-b")).await.unwrap();
        }
        assert_eq!(session.executed_count(), 3);
        assert_eq!(metrics.counter_value("inserts|table=operation_names"), Some(3));
    }

    #[tokio::test]
    async fn test_write_failure_is_logged_counted_and_wrapped() {
        let logs = LogBuffer::default();
        let _guard = logs.install();

        let session = Arc::new(FakeSession {
            exec_error: Some("exec error".to_string()),
            ..FakeSession::previous()
        });
        let metrics = LocalMetrics::new();
        let store = storage(&session, Duration::from_secs(60), &metrics).await;

        let err = store
            .write(&op("service-c", "", "operation-d"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exec { .. }));
        assert_eq!(
            err.to_string(),
            format!("failed to Exec query '{INSERT_PREVIOUS}': exec error")
        );
        assert_eq!(metrics.counter_value("errors|table=operation_names"), Some(1));
        assert_eq!(metrics.counter_value("inserts|table=operation_names"), None);

        let line = logs
            .lines()
            .into_iter()
            .find(|l| l["message"] == "Failed to exec query")
            .unwrap();
        assert_eq!(line["level"], "ERROR");
        assert_eq!(line["query"], INSERT_PREVIOUS);
        assert_eq!(line["error"], "exec error");

        // A failed write is not cached: the next call reaches the backend again
        let _ = store.write(&op("service-c", "", "operation-d")).await;
        assert_eq!(session.executed_count(), 2);
    }

    #[tokio::test]
    async fn test_get_operations_latest() {
        let session = Arc::new(FakeSession::latest());
        *session.rows.lock() = vec![
            Row::new(vec![Value::from("server"), Value::from("GET /a")]),
            Row::new(vec![Value::from("client"), Value::from("call")]),
        ];
        let metrics = LocalMetrics::new();
        let store = storage(&session, Duration::ZERO, &metrics).await;

        let params = OperationQueryParameters {
            service_name: "svc".to_string(),
            span_kind: Some("server".to_string()),
        };
        let ops = store.get_operations(&params).await.unwrap();
        assert_eq!(
            ops,
            vec![
                OperationName {
                    span_kind: "server".to_string(),
                    name: "GET /a".to_string()
                },
                OperationName {
                    span_kind: "client".to_string(),
                    name: "call".to_string()
                },
            ]
        );
        assert_eq!(session.queried.lock()[0].statement(), QUERY_LATEST_BY_KIND);
    }

    #[tokio::test]
    async fn test_get_operations_previous_ignores_kind() {
        let session = Arc::new(FakeSession::previous());
        *session.rows.lock() = vec![Row::new(vec![Value::from("operation-a")])];
        let metrics = LocalMetrics::new();
        let store = storage(&session, Duration::ZERO, &metrics).await;

        let params = OperationQueryParameters {
            service_name: "svc".to_string(),
            span_kind: Some("server".to_string()),
        };
        let ops = store.get_operations(&params).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].name, "operation-a");
        assert_eq!(ops[0].span_kind, "");
        assert_eq!(session.queried.lock()[0].statement(), QUERY_PREVIOUS);
    }

    #[tokio::test]
    async fn test_scan_stops_at_undecodable_row() {
        let session = Arc::new(FakeSession::previous());
        *session.rows.lock() = vec![
            Row::new(vec![Value::from("first")]),
            Row::new(vec![Value::Null]),
            Row::new(vec![Value::from("never reached")]),
        ];
        let metrics = LocalMetrics::new();
        let store = storage(&session, Duration::ZERO, &metrics).await;

        let ops = store
            .get_operations(&OperationQueryParameters::default())
            .await
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].name, "first");
    }

    #[tokio::test]
    async fn test_close_error_discards_rows() {
        let session = Arc::new(FakeSession {
            close_error: Some("scan error".to_string()),
            ..FakeSession::latest()
        });
        *session.rows.lock() = vec![Row::new(vec![Value::from(""), Value::from("a")])];
        let metrics = LocalMetrics::new();
        let store = storage(&session, Duration::ZERO, &metrics).await;

        let err = store
            .get_operations(&OperationQueryParameters::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "error reading operation_names_v2 from storage: scan error"
        );
    }
}

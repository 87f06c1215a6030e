//! Service-name index on the column-family backend

use crate::session::{Query, Session};
use crate::table::{TableWriter, read_rows};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracevault_common::{MetricsFactory, Result, WriteCache};

pub const TABLE: &str = "service_names";

const INSERT: &str = "INSERT INTO service_names(service_name) VALUES (?)";
const QUERY: &str = "SELECT service_name FROM service_names";

/// Write-through store for service names
pub struct ServiceNamesStorage {
    session: Arc<dyn Session>,
    writer: TableWriter,
    cache: WriteCache<String>,
}

impl ServiceNamesStorage {
    pub fn new(
        session: Arc<dyn Session>,
        write_cache_ttl: Duration,
        metrics: &dyn MetricsFactory,
    ) -> Self {
        Self {
            session,
            writer: TableWriter::new(metrics, TABLE),
            cache: WriteCache::new(write_cache_ttl),
        }
    }

    pub async fn write(&self, service_name: &str) -> Result<()> {
        let key = service_name.to_string();
        if !self.cache.should_write(&key) {
            return Ok(());
        }
        let query = Query::new(INSERT).bind(service_name);
        self.writer.exec(self.session.as_ref(), &query).await?;
        self.cache.mark_written(key, Instant::now());
        Ok(())
    }

    pub async fn get_services(&self) -> Result<Vec<String>> {
        read_rows(self.session.as_ref(), &Query::new(QUERY), TABLE, |row| {
            row.text(0).map(str::to_string)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Row, Value};
    use crate::testing::FakeSession;
    use tracevault_common::LocalMetrics;

    fn store(
        session: &Arc<FakeSession>,
        ttl: Duration,
        metrics: &LocalMetrics,
    ) -> ServiceNamesStorage {
        ServiceNamesStorage::new(Arc::clone(session) as Arc<dyn Session>, ttl, metrics)
    }

    #[tokio::test]
    async fn test_service_write_dedup() {
        let session = Arc::new(FakeSession::default());
        let metrics = LocalMetrics::new();
        let services = store(&session, Duration::from_secs(3600), &metrics);

        services.write("frontend").await.unwrap();
        services.write("frontend").await.unwrap();
        services.write("backend").await.unwrap();

        assert_eq!(session.executed_count(), 2);
        assert_eq!(metrics.counter_value("attempts|table=service_names"), Some(2));
        assert_eq!(metrics.counter_value("inserts|table=service_names"), Some(2));
        assert_eq!(session.executed.lock()[0].values(), &[Value::from("frontend")]);
    }

    #[tokio::test]
    async fn test_service_write_error() {
        let session = Arc::new(FakeSession {
            exec_error: Some("timeout".to_string()),
            ..FakeSession::default()
        });
        let metrics = LocalMetrics::new();
        let services = store(&session, Duration::from_secs(3600), &metrics);

        let err = services.write("frontend").await.unwrap_err();
        assert_eq!(err.to_string(), format!("failed to Exec query '{INSERT}': timeout"));
        assert_eq!(metrics.counter_value("errors|table=service_names"), Some(1));
    }

    #[tokio::test]
    async fn test_get_services() {
        let session = Arc::new(FakeSession::default());
        *session.rows.lock() = vec![
            Row::new(vec![Value::from("frontend")]),
            Row::new(vec![Value::from("backend")]),
        ];
        let metrics = LocalMetrics::new();
        let services = store(&session, Duration::ZERO, &metrics);

        assert_eq!(
            services.get_services().await.unwrap(),
            vec!["frontend".to_string(), "backend".to_string()]
        );
    }
}

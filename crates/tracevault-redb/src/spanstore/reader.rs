//! Span reader

use crate::engine::Engine;
use crate::error::StoreResult;
use crate::spanstore::cache::CacheStore;
use std::sync::Arc;
use std::time::SystemTime;
use tracevault_common::{
    Error, OperationName, OperationQueryParameters, Trace, TraceId, unix_micros,
};

pub struct SpanReader {
    engine: Arc<Engine>,
    cache: Arc<CacheStore>,
}

impl SpanReader {
    #[must_use]
    pub const fn new(engine: Arc<Engine>, cache: Arc<CacheStore>) -> Self {
        Self { engine, cache }
    }

    /// Known services, sorted
    pub fn get_services(&self) -> StoreResult<Vec<String>> {
        Ok(self.cache.services(now()))
    }

    /// Operations of a service, sorted by kind then name
    pub fn get_operations(
        &self,
        params: &OperationQueryParameters,
    ) -> StoreResult<Vec<OperationName>> {
        Ok(self
            .cache
            .operations(&params.service_name, params.span_kind.as_deref(), now()))
    }

    /// All live spans of a trace
    pub fn get_trace(&self, trace_id: TraceId) -> StoreResult<Trace> {
        let spans = self.engine.trace_spans(trace_id, now())?;
        if spans.is_empty() {
            return Err(Error::TraceNotFound(trace_id).into());
        }
        Ok(Trace { spans })
    }

    /// Traces with at least one span starting in `[start, end]`
    pub fn trace_ids_between(
        &self,
        start: SystemTime,
        end: SystemTime,
    ) -> StoreResult<Vec<TraceId>> {
        self.engine
            .trace_ids_between(unix_micros(start), unix_micros(end))
    }
}

fn now() -> u64 {
    unix_micros(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{options, span};
    use crate::spanstore::writer::SpanWriter;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;
    use tracevault_common::LocalMetrics;

    fn setup(dir: &TempDir) -> (SpanWriter, SpanReader) {
        let engine = Arc::new(Engine::open(options(dir)).unwrap());
        let cache = Arc::new(CacheStore::new(Duration::from_secs(3600)));
        let writer = SpanWriter::new(
            Arc::clone(&engine),
            Arc::clone(&cache),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            &LocalMetrics::new(),
        );
        (writer, SpanReader::new(engine, cache))
    }

    #[test]
    fn test_get_trace_and_not_found() {
        let dir = TempDir::new().unwrap();
        let (writer, reader) = setup(&dir);
        writer.write_span(&span(7, 1, None, "a", 100)).unwrap();

        let trace = reader.get_trace(TraceId::new(7)).unwrap();
        assert_eq!(trace.spans.len(), 1);

        let err = reader.get_trace(TraceId::new(8)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_expired_trace_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (writer, reader) = setup(&dir);
        // Received two hours ago with a one hour TTL
        let received = SystemTime::now() - Duration::from_secs(7200);
        writer
            .write_span_at(&span(7, 1, None, "a", 100), received)
            .unwrap();
        assert!(reader.get_trace(TraceId::new(7)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_services_operations_and_time_range() {
        let dir = TempDir::new().unwrap();
        let (writer, reader) = setup(&dir);
        writer.write_span(&span(1, 1, None, "b", 1_000)).unwrap();
        writer.write_span(&span(2, 1, None, "a", 2_000)).unwrap();

        assert_eq!(
            reader.get_services().unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        let params = OperationQueryParameters {
            service_name: "a".to_string(),
            span_kind: None,
        };
        assert_eq!(reader.get_operations(&params).unwrap()[0].name, "op-1");

        let start = UNIX_EPOCH + Duration::from_micros(1_500);
        let end = UNIX_EPOCH + Duration::from_micros(2_500);
        assert_eq!(
            reader.trace_ids_between(start, end).unwrap(),
            vec![TraceId::new(2)]
        );
    }
}

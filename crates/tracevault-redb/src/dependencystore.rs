//! Service dependency links derived from stored traces

use crate::error::StoreResult;
use crate::spanstore::SpanReader;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracevault_common::{DependencyLink, Trace};

pub struct DependencyStore {
    reader: Arc<SpanReader>,
}

impl DependencyStore {
    #[must_use]
    pub const fn new(reader: Arc<SpanReader>) -> Self {
        Self { reader }
    }

    /// Call counts between services for traces active in `[end - lookback, end]`
    pub fn get_dependencies(
        &self,
        end: SystemTime,
        lookback: Duration,
    ) -> StoreResult<Vec<DependencyLink>> {
        let start = end.checked_sub(lookback).unwrap_or(UNIX_EPOCH);
        let mut counts: BTreeMap<(String, String), u64> = BTreeMap::new();

        for trace_id in self.reader.trace_ids_between(start, end)? {
            match self.reader.get_trace(trace_id) {
                Ok(trace) => count_calls(&trace, &mut counts),
                // Expired between the index scan and the read
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(counts
            .into_iter()
            .map(|((parent, child), call_count)| DependencyLink {
                parent,
                child,
                call_count,
            })
            .collect())
    }
}

fn count_calls(trace: &Trace, counts: &mut BTreeMap<(String, String), u64>) {
    let services: HashMap<_, _> = trace
        .spans
        .iter()
        .map(|span| (span.span_id, span.service_name.as_str()))
        .collect();

    for span in &trace.spans {
        let Some(parent) = span.parent_span_id.and_then(|id| services.get(&id)) else {
            continue;
        };
        *counts
            .entry(((*parent).to_string(), span.service_name.clone()))
            .or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::engine::tests::{options, span};
    use crate::spanstore::{CacheStore, SpanWriter};
    use tempfile::TempDir;
    use tracevault_common::LocalMetrics;

    #[test]
    fn test_dependencies_counted_and_sorted() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(Engine::open(options(&dir)).unwrap());
        let cache = Arc::new(CacheStore::new(Duration::from_secs(60)));
        let writer = SpanWriter::new(
            Arc::clone(&engine),
            Arc::clone(&cache),
            Duration::from_secs(3600),
            Duration::from_secs(60),
            &LocalMetrics::new(),
        );
        let reader = Arc::new(SpanReader::new(engine, cache));
        let store = DependencyStore::new(reader);

        let now = SystemTime::now();
        let start = tracevault_common::unix_micros(now) - 1_000;
        // trace 1: frontend -> backend -> db, frontend -> backend
        writer.write_span(&span(1, 1, None, "frontend", start)).unwrap();
        writer.write_span(&span(1, 2, Some(1), "backend", start)).unwrap();
        writer.write_span(&span(1, 3, Some(2), "db", start)).unwrap();
        writer.write_span(&span(1, 4, Some(1), "backend", start)).unwrap();
        // trace 2: orphan child only, parent missing
        writer.write_span(&span(2, 2, Some(9), "backend", start)).unwrap();

        let links = store
            .get_dependencies(now, Duration::from_secs(60))
            .unwrap();
        assert_eq!(
            links,
            vec![
                DependencyLink {
                    parent: "backend".to_string(),
                    child: "db".to_string(),
                    call_count: 1
                },
                DependencyLink {
                    parent: "frontend".to_string(),
                    child: "backend".to_string(),
                    call_count: 2
                },
            ]
        );

        // Window that ends before the spans started
        let earlier = now - Duration::from_secs(3600);
        assert!(
            store
                .get_dependencies(earlier, Duration::from_secs(60))
                .unwrap()
                .is_empty()
        );
    }
}

//! Span writer

use crate::engine::Engine;
use crate::error::StoreResult;
use crate::spanstore::cache::CacheStore;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracevault_common::{MetricsFactory, Operation, Span, TableMetrics, unix_micros};
use tracing::error;

pub const SPANS_TABLE: &str = "spans";

/// Persists spans and keeps the service/operation indexes current
pub struct SpanWriter {
    engine: Arc<Engine>,
    cache: Arc<CacheStore>,
    span_ttl: Duration,
    index_ttl: Duration,
    metrics: TableMetrics,
}

impl SpanWriter {
    pub fn new(
        engine: Arc<Engine>,
        cache: Arc<CacheStore>,
        span_ttl: Duration,
        index_ttl: Duration,
        metrics: &dyn MetricsFactory,
    ) -> Self {
        Self {
            engine,
            cache,
            span_ttl,
            index_ttl,
            metrics: TableMetrics::new(metrics, SPANS_TABLE),
        }
    }

    pub fn write_span(&self, span: &Span) -> StoreResult<()> {
        self.write_span_at(span, SystemTime::now())
    }

    /// Write `span` as if received at `now`
    pub fn write_span_at(&self, span: &Span, now: SystemTime) -> StoreResult<()> {
        self.metrics.record_attempt();
        match self.persist(span, now) {
            Ok(()) => {
                self.metrics.record_insert();
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error();
                error!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    error = %e,
                    "Failed to write span"
                );
                Err(e)
            }
        }
    }

    fn persist(&self, span: &Span, now: SystemTime) -> StoreResult<()> {
        let expires_at = expiry(now, &[self.span_ttl]);
        self.engine.put_span(span, expires_at)?;

        let operation = Operation {
            service_name: span.service_name.clone(),
            span_kind: span.span_kind.clone(),
            operation_name: span.operation_name.clone(),
        };
        if self.cache.should_write_index(&operation) {
            // Index rows outlive the spans they point to by one cache window
            let index_expires_at = expiry(now, &[self.span_ttl, self.index_ttl]);
            self.engine.put_operation(&operation, index_expires_at)?;
            self.cache.update(&operation, index_expires_at);
            self.cache.mark_index_written(operation, Instant::now());
        }
        Ok(())
    }
}

/// Expiry in epoch micros of `now` plus every ttl, saturating at `u64::MAX`
fn expiry(now: SystemTime, ttls: &[Duration]) -> u64 {
    ttls.iter()
        .try_fold(now, |at, ttl| at.checked_add(*ttl))
        .map_or(u64::MAX, unix_micros)
}

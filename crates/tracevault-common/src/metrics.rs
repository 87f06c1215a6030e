//! Metrics recording for storage backends
//!
//! Storage components never talk to a metrics registry directly. They are
//! handed a [`MetricsFactory`] and keep the [`Counter`] / [`Gauge`] handles it
//! returns. Two factories are provided:
//!
//! - [`GlobalMetrics`] forwards to the `metrics` facade, so whichever
//!   recorder the process installed (e.g. a Prometheus exporter) sees them.
//! - [`LocalMetrics`] keeps values in memory and can be snapshotted. Keys in
//!   a snapshot are `name|tag=value` with tags sorted by name.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic counter
pub trait CounterHandle: Send + Sync {
    fn inc(&self, delta: u64);
}

/// Point-in-time value
pub trait GaugeHandle: Send + Sync {
    fn update(&self, value: i64);
}

pub type Counter = Arc<dyn CounterHandle>;
pub type Gauge = Arc<dyn GaugeHandle>;

/// Source of counter and gauge handles
pub trait MetricsFactory: Send + Sync {
    fn counter(&self, name: &str, tags: &[(&str, &str)]) -> Counter;
    fn gauge(&self, name: &str, tags: &[(&str, &str)]) -> Gauge;
}

// ---- metrics facade ----

impl CounterHandle for metrics::Counter {
    fn inc(&self, delta: u64) {
        self.increment(delta);
    }
}

impl GaugeHandle for metrics::Gauge {
    #[allow(clippy::cast_precision_loss)]
    fn update(&self, value: i64) {
        self.set(value as f64);
    }
}

/// Factory backed by the process-wide `metrics` recorder
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalMetrics;

impl GlobalMetrics {
    fn labels(tags: &[(&str, &str)]) -> Vec<metrics::Label> {
        tags.iter()
            .map(|(k, v)| metrics::Label::new((*k).to_string(), (*v).to_string()))
            .collect()
    }
}

impl MetricsFactory for GlobalMetrics {
    fn counter(&self, name: &str, tags: &[(&str, &str)]) -> Counter {
        Arc::new(metrics::counter!(name.to_string(), Self::labels(tags)))
    }

    fn gauge(&self, name: &str, tags: &[(&str, &str)]) -> Gauge {
        Arc::new(metrics::gauge!(name.to_string(), Self::labels(tags)))
    }
}

// ---- in-memory ----

#[derive(Debug, Default)]
struct LocalValue(AtomicI64);

impl CounterHandle for LocalValue {
    fn inc(&self, delta: u64) {
        self.0
            .fetch_add(i64::try_from(delta).unwrap_or(i64::MAX), Ordering::Relaxed);
    }
}

impl GaugeHandle for LocalValue {
    fn update(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }
}

/// In-memory metrics factory with snapshot support
#[derive(Debug, Default)]
pub struct LocalMetrics {
    counters: RwLock<BTreeMap<String, Arc<LocalValue>>>,
    gauges: RwLock<BTreeMap<String, Arc<LocalValue>>>,
}

impl LocalMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the snapshot key for a metric name and its tags
    #[must_use]
    pub fn key(name: &str, tags: &[(&str, &str)]) -> String {
        let mut sorted: Vec<_> = tags.to_vec();
        sorted.sort_unstable();
        let mut key = name.to_string();
        for (k, v) in sorted {
            key.push('|');
            key.push_str(k);
            key.push('=');
            key.push_str(v);
        }
        key
    }

    fn get_or_create(
        map: &RwLock<BTreeMap<String, Arc<LocalValue>>>,
        key: String,
    ) -> Arc<LocalValue> {
        if let Some(existing) = map.read().get(&key) {
            return Arc::clone(existing);
        }
        Arc::clone(map.write().entry(key).or_default())
    }

    /// Current counter and gauge values
    #[must_use]
    pub fn snapshot(&self) -> (HashMap<String, i64>, HashMap<String, i64>) {
        let read = |map: &RwLock<BTreeMap<String, Arc<LocalValue>>>| -> HashMap<String, i64> {
            map.read()
                .iter()
                .map(|(k, v)| (k.clone(), v.0.load(Ordering::Relaxed)))
                .collect()
        };
        (read(&self.counters), read(&self.gauges))
    }

    /// Value of a single counter, if it was ever created
    #[must_use]
    pub fn counter_value(&self, key: &str) -> Option<i64> {
        self.counters
            .read()
            .get(key)
            .map(|v| v.0.load(Ordering::Relaxed))
    }

    /// Value of a single gauge, if it was ever created
    #[must_use]
    pub fn gauge_value(&self, key: &str) -> Option<i64> {
        self.gauges
            .read()
            .get(key)
            .map(|v| v.0.load(Ordering::Relaxed))
    }
}

impl MetricsFactory for LocalMetrics {
    fn counter(&self, name: &str, tags: &[(&str, &str)]) -> Counter {
        Self::get_or_create(&self.counters, Self::key(name, tags))
    }

    fn gauge(&self, name: &str, tags: &[(&str, &str)]) -> Gauge {
        Self::get_or_create(&self.gauges, Self::key(name, tags))
    }
}

// ---- per-table counters ----

/// Attempt/insert/error counters for one table or collection.
///
/// A write suppressed before reaching the backend touches none of them.
#[derive(Clone)]
pub struct TableMetrics {
    table: String,
    attempts: Counter,
    inserts: Counter,
    errors: Counter,
}

impl TableMetrics {
    pub fn new(factory: &dyn MetricsFactory, table: &str) -> Self {
        let tags = [("table", table)];
        Self {
            table: table.to_string(),
            attempts: factory.counter("attempts", &tags),
            inserts: factory.counter("inserts", &tags),
            errors: factory.counter("errors", &tags),
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn record_attempt(&self) {
        self.attempts.inc(1);
    }

    pub fn record_insert(&self) {
        self.inserts.inc(1);
    }

    pub fn record_error(&self) {
        self.errors.inc(1);
    }
}

impl std::fmt::Debug for TableMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMetrics")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

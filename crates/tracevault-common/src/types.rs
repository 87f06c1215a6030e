//! Core type definitions for TraceVault
//!
//! The storage layer only needs a thin slice of the trace model: identifiers,
//! the fields it indexes on, and the read-side projections handed back to
//! query callers.

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 128-bit trace identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct TraceId(u128);

impl TraceId {
    #[must_use]
    pub const fn new(id: u128) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({:032x})", self.0)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// 64-bit span identifier, unique within a trace
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct SpanId(u64);

impl SpanId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({:016x})", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A single span as persisted by the storage backends
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    /// Parent span within the same trace (None for a root span)
    pub parent_span_id: Option<SpanId>,
    pub service_name: String,
    pub operation_name: String,
    /// Span kind ("server", "client", ...); empty when unknown
    pub span_kind: String,
    /// Start time in microseconds since the Unix epoch
    pub start_time: u64,
    /// Duration in microseconds
    pub duration: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Span {
    /// Start time as a `SystemTime`
    #[must_use]
    pub fn start_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(self.start_time)
    }
}

/// All spans of one trace
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    pub spans: Vec<Span>,
}

/// Write-side record for the operation-name index
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Operation {
    pub service_name: String,
    /// Empty when the writer does not know the span kind
    pub span_kind: String,
    pub operation_name: String,
}

/// Read-side projection of an indexed operation
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationName {
    pub span_kind: String,
    pub name: String,
}

/// Query parameters for operation lookups
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperationQueryParameters {
    pub service_name: String,
    /// Restrict results to one span kind, when the backend can filter on it
    pub span_kind: Option<String>,
}

/// Aggregated call count between two services
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    pub call_count: u64,
}

/// Throughput observed for one service operation by one collector
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub service: String,
    pub operation: String,
    pub count: i64,
    /// Sampling probabilities in effect while the throughput was observed
    #[serde(default)]
    pub probabilities: Vec<String>,
}

/// service -> operation -> sampling probability
pub type ServiceOperationProbabilities = HashMap<String, HashMap<String, f64>>;

/// service -> operation -> observed QPS
pub type ServiceOperationQps = HashMap<String, HashMap<String, f64>>;

/// Microseconds since the Unix epoch (saturating at zero for pre-epoch times)
#[must_use]
pub fn unix_micros(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
}

/// Nanoseconds since the Unix epoch, the unit of the timestamp gauges
#[must_use]
pub fn unix_nanos(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}

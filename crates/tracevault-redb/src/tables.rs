//! Redb table definitions for span storage.
//!
//! Timestamps in keys and values are microseconds since the Unix epoch.

use redb::TableDefinition;

// ---- keys.redb (indexes) ----

/// service name -> expiry
pub const SERVICES: TableDefinition<&str, u64> = TableDefinition::new("services");
/// (service, span kind, operation) -> expiry
pub const OPERATIONS: TableDefinition<(&str, &str, &str), u64> =
    TableDefinition::new("operations");
/// (start time, trace id, span id)
pub const START_TIME_INDEX: TableDefinition<(u64, u128, u64), ()> =
    TableDefinition::new("start_time_index");

// ---- values.redb (payloads) ----

/// (trace id, span id) -> bincode `StoredSpan`
pub const SPANS: TableDefinition<(u128, u64), &[u8]> = TableDefinition::new("spans");
/// (expiry, trace id, span id)
pub const SPAN_EXPIRY: TableDefinition<(u64, u128, u64), ()> =
    TableDefinition::new("span_expiry");
/// (timestamp, sequence) -> bincode `Vec<Throughput>`
pub const THROUGHPUT: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("throughput");
/// (timestamp, sequence) -> bincode `StoredProbabilities`
pub const PROBABILITIES: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("probabilities");

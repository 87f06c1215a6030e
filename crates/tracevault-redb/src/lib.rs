//! TraceVault Redb - embedded storage backend
//!
//! Spans, their indexes and adaptive-sampling state are kept in two local
//! redb files. The [`Factory`] owns the engine for its whole lifetime and
//! runs two background tasks next to it: periodic space reclamation, and a
//! copier that republishes engine counters as gauges.

pub mod dependencystore;
pub mod diskstat;
pub mod engine;
pub mod error;
pub mod factory;
pub mod harvester;
pub mod lock;
pub mod maintenance;
pub mod samplingstore;
pub mod spanstore;
pub mod stats;
pub mod tables;

// Re-exports
pub use dependencystore::DependencyStore;
pub use engine::{Engine, EngineOptions, Reclaimer};
pub use error::{ReclaimError, StoreError, StoreResult};
pub use factory::Factory;
pub use lock::Lock;
pub use samplingstore::SamplingStore;
pub use spanstore::{CacheStore, SpanReader, SpanWriter};
pub use stats::{StatValue, StatsRegistry, StatsSource};

//! TraceVault Common - Shared types and utilities
//!
//! This crate provides the trace model, error definitions, configuration,
//! metrics factories and the write dedup cache used by every TraceVault
//! storage backend.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use crate::cache::WriteCache;
pub use crate::config::{CassandraConfig, Config, RedbConfig};
pub use crate::error::{Error, Result};
pub use crate::metrics::{Counter, Gauge, GlobalMetrics, LocalMetrics, MetricsFactory, TableMetrics};
pub use crate::types::*;

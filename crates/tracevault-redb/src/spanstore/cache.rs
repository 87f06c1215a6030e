//! In-memory view of the service and operation indexes
//!
//! Readers answer service/operation queries from here instead of scanning
//! the key file. Writers consult the embedded [`WriteCache`] to skip index
//! rows they already wrote recently.

use crate::engine::Engine;
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};
use tracevault_common::{Operation, OperationName, WriteCache, unix_micros};

/// Shared by every reader and writer of one factory
pub struct CacheStore {
    /// service -> expiry
    services: RwLock<HashMap<String, u64>>,
    /// service -> (kind, operation) -> expiry
    operations: RwLock<HashMap<String, HashMap<OperationName, u64>>>,
    index_writes: WriteCache<Operation>,
}

impl CacheStore {
    /// Empty cache; `index_cache_ttl` bounds how long index rewrites are skipped
    #[must_use]
    pub fn new(index_cache_ttl: Duration) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            index_writes: WriteCache::new(index_cache_ttl),
        }
    }

    /// Load every unexpired index row from the engine
    pub fn prefill(&self, engine: &Engine) -> StoreResult<()> {
        let now = unix_micros(SystemTime::now());
        for (service, expires_at) in engine.live_services(now)? {
            self.services.write().insert(service, expires_at);
        }
        for (operation, expires_at) in engine.live_operations(now)? {
            self.update(&operation, expires_at);
        }
        Ok(())
    }

    /// Record that `operation` is indexed until `expires_at`
    pub fn update(&self, operation: &Operation, expires_at: u64) {
        self.services
            .write()
            .insert(operation.service_name.clone(), expires_at);
        self.operations
            .write()
            .entry(operation.service_name.clone())
            .or_default()
            .insert(
                OperationName {
                    span_kind: operation.span_kind.clone(),
                    name: operation.operation_name.clone(),
                },
                expires_at,
            );
    }

    /// Unexpired services, sorted
    #[must_use]
    pub fn services(&self, now: u64) -> Vec<String> {
        let mut services: Vec<String> = self
            .services
            .read()
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(name, _)| name.clone())
            .collect();
        services.sort_unstable();
        services
    }

    /// Unexpired operations of `service`, sorted by kind then name
    #[must_use]
    pub fn operations(&self, service: &str, kind: Option<&str>, now: u64) -> Vec<OperationName> {
        let operations = self.operations.read();
        let Some(by_name) = operations.get(service) else {
            return Vec::new();
        };
        let mut result: Vec<OperationName> = by_name
            .iter()
            .filter(|(op, expires_at)| {
                **expires_at > now && kind.is_none_or(|k| k.is_empty() || op.span_kind == k)
            })
            .map(|(op, _)| op.clone())
            .collect();
        result.sort_unstable();
        result
    }

    /// Forget every service and operation
    pub fn clear(&self) {
        self.services.write().clear();
        self.operations.write().clear();
        self.index_writes.clear();
    }

    /// False if the index rows of `operation` were written within the TTL
    pub fn should_write_index(&self, operation: &Operation) -> bool {
        self.index_writes.should_write(operation)
    }

    pub fn mark_index_written(&self, operation: Operation, now: Instant) {
        self.index_writes.mark_written(operation, now);
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("services", &self.services.read().len())
            .field("index_writes", &self.index_writes.len())
            .finish()
    }
}

//! Introspection registry for engine-internal counters
//!
//! Engines publish named values here; the metrics harvester enumerates them
//! by name prefix. A process-wide instance is available through
//! [`StatsRegistry::global`], but every consumer also accepts an injected
//! registry.

use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

/// A published value
#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Int(i64),
    Float(f64),
    /// Nested values keyed by a dynamic name (e.g. a file path)
    Map(Vec<(String, StatValue)>),
}

/// Something that publishes named values
pub trait StatsSource: Send + Sync {
    fn visit(&self, f: &mut dyn FnMut(&str, &StatValue));
}

/// Enumerable set of stats sources
#[derive(Default)]
pub struct StatsRegistry {
    sources: RwLock<Vec<Arc<dyn StatsSource>>>,
}

static GLOBAL: OnceLock<Arc<StatsRegistry>> = OnceLock::new();

impl StatsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    pub fn register(&self, source: Arc<dyn StatsSource>) {
        self.sources.write().push(source);
    }

    pub fn unregister(&self, source: &Arc<dyn StatsSource>) {
        self.sources.write().retain(|s| !Arc::ptr_eq(s, source));
    }

    /// Visit every published value
    pub fn visit(&self, f: &mut dyn FnMut(&str, &StatValue)) {
        for source in self.sources.read().iter() {
            source.visit(f);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }
}

impl std::fmt::Debug for StatsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsRegistry")
            .field("sources", &self.len())
            .finish()
    }
}

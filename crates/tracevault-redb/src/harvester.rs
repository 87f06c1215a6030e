//! Republishes engine introspection counters as gauges.
//!
//! The set of gauges is fixed by one discovery scan at startup: every
//! prefixed integer, and every prefixed map holding an integer entry, gets a
//! gauge named after it. Later scans only update those gauges. Names that
//! appear after discovery are ignored, so the number of exported series
//! cannot grow at runtime.

use crate::stats::{StatValue, StatsRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracevault_common::{Gauge, MetricsFactory};

/// Name prefix of the engine's published stats
pub const ENGINE_STATS_PREFIX: &str = "redb";

pub struct MetricsCopier {
    registry: Arc<StatsRegistry>,
    prefix: String,
    gauges: HashMap<String, Gauge>,
}

impl MetricsCopier {
    /// Scan `registry` once and register a gauge per harvestable entry
    pub fn discover(
        registry: Arc<StatsRegistry>,
        prefix: &str,
        factory: &dyn MetricsFactory,
    ) -> Self {
        let mut gauges = HashMap::new();
        registry.visit(&mut |name, value| {
            if name.starts_with(prefix) && int_value(value).is_some() {
                gauges
                    .entry(name.to_string())
                    .or_insert_with(|| factory.gauge(name, &[]));
            }
        });
        Self {
            registry,
            prefix: prefix.to_string(),
            gauges,
        }
    }

    /// Names of the gauges found at discovery
    #[must_use]
    pub fn gauge_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.gauges.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Copy current values into the discovered gauges
    pub fn copy(&self) {
        self.registry.visit(&mut |name, value| {
            if !name.starts_with(&self.prefix) {
                return;
            }
            let Some(gauge) = self.gauges.get(name) else {
                return;
            };
            match value {
                StatValue::Int(v) => gauge.update(*v),
                // Maps carry a single entry with a dynamic name; the last int wins
                StatValue::Map(entries) => {
                    for (_, inner) in entries {
                        if let StatValue::Int(v) = inner {
                            gauge.update(*v);
                        }
                    }
                }
                StatValue::Float(_) => {}
            }
        });
    }
}

fn int_value(value: &StatValue) -> Option<i64> {
    match value {
        StatValue::Int(v) => Some(*v),
        StatValue::Map(entries) => entries.iter().find_map(|(_, inner)| match inner {
            StatValue::Int(v) => Some(*v),
            _ => None,
        }),
        StatValue::Float(_) => None,
    }
}

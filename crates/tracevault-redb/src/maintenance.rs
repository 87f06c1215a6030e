//! Background space reclamation and health gauges
//!
//! Both background tasks of the factory share [`run_every`]: a timer whose
//! first tick fires one period after start, raced against the shared
//! cancellation token. Cancellation is only observed between ticks; a tick
//! in progress always runs to completion.

use crate::diskstat;
use crate::engine::Reclaimer;
use crate::error::ReclaimError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracevault_common::{Gauge, MetricsFactory, unix_nanos};
use tracing::{debug, error, warn};

pub const VALUE_LOG_SPACE_AVAILABLE: &str = "redb_value_log_bytes_available";
pub const KEY_LOG_SPACE_AVAILABLE: &str = "redb_key_log_bytes_available";
pub const LAST_MAINTENANCE_RUN: &str = "redb_storage_maintenance_last_run";
pub const LAST_VALUE_LOG_CLEANED: &str = "redb_storage_valueloggc_last_run";

/// Engine health gauges registered at initialization
pub struct HealthGauges {
    pub value_log_space_available: Gauge,
    pub key_log_space_available: Gauge,
    /// Unix nanoseconds
    pub last_maintenance_run: Gauge,
    /// Unix nanoseconds
    pub last_value_log_cleaned: Gauge,
}

impl HealthGauges {
    pub fn new(factory: &dyn MetricsFactory) -> Self {
        Self {
            value_log_space_available: factory.gauge(VALUE_LOG_SPACE_AVAILABLE, &[]),
            key_log_space_available: factory.gauge(KEY_LOG_SPACE_AVAILABLE, &[]),
            last_maintenance_run: factory.gauge(LAST_MAINTENANCE_RUN, &[]),
            last_value_log_cleaned: factory.gauge(LAST_VALUE_LOG_CLEANED, &[]),
        }
    }
}

/// Periodic reclamation job
pub struct Maintenance {
    reclaimer: Arc<dyn Reclaimer>,
    threshold: f64,
    gauges: HealthGauges,
    key_directory: PathBuf,
    value_directory: PathBuf,
}

impl Maintenance {
    pub fn new(
        reclaimer: Arc<dyn Reclaimer>,
        threshold: f64,
        gauges: HealthGauges,
        key_directory: PathBuf,
        value_directory: PathBuf,
    ) -> Self {
        Self {
            reclaimer,
            threshold,
            gauges,
            key_directory,
            value_directory,
        }
    }

    /// Run one maintenance tick observed at `at`. Blocks while reclaiming.
    pub fn tick(&self, at: SystemTime) {
        // Keep reclaiming until a pass reports no work (or fails)
        let outcome = loop {
            if let Err(e) = self.reclaimer.reclaim(self.threshold) {
                break e;
            }
        };
        match outcome {
            ReclaimError::NothingToReclaim => {
                self.gauges.last_value_log_cleaned.update(unix_nanos(at));
            }
            ReclaimError::Store(e) => error!(error = %e, "Failed to run value log GC"),
        }

        self.gauges.last_maintenance_run.update(unix_nanos(at));
        self.update_disk_statistics();
    }

    fn update_disk_statistics(&self) {
        for (dir, gauge) in [
            (&self.value_directory, &self.gauges.value_log_space_available),
            (&self.key_directory, &self.gauges.key_log_space_available),
        ] {
            match diskstat::available_bytes(dir) {
                Ok(bytes) => gauge.update(bytes),
                Err(e) => warn!(directory = ?dir, error = %e, "Failed to read disk statistics"),
            }
        }
    }
}

/// Call `work` on a blocking thread every `period` until `token` is cancelled
pub async fn run_every<F>(name: &'static str, period: Duration, token: CancellationToken, work: F)
where
    F: Fn(SystemTime) + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(task = name, ?period, "Background task started");

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let at = SystemTime::now();
                let work = Arc::clone(&work);
                if let Err(e) = tokio::task::spawn_blocking(move || work(at)).await {
                    error!(task = name, error = %e, "Background tick panicked");
                }
            }
        }
    }
    debug!(task = name, "Background task stopped");
}

//! Configuration types for TraceVault
//!
//! Every section deserializes with defaults for missing fields, so a config
//! file only needs to mention what it overrides. Durations are expressed in
//! whole seconds.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "TRACEVAULT";

/// Root configuration for TraceVault storage backends
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Embedded engine backend
    pub redb: RedbConfig,
    /// Column-family backend
    pub cassandra: CassandraConfig,
}

impl Config {
    /// Load configuration: defaults, then the optional file, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            debug!("Loading configuration from {:?}", path);
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the backends cannot run with
    pub fn validate(&self) -> Result<()> {
        self.redb.validate()
    }
}

/// Embedded key-value engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RedbConfig {
    /// Store data in a temporary directory removed at shutdown
    pub ephemeral: bool,
    /// Directory holding the index (key) database
    pub key_directory: PathBuf,
    /// Directory holding the span payload (value) database
    pub value_directory: PathBuf,
    /// Open existing databases without write access
    pub read_only: bool,
    /// Fsync every commit
    pub sync_writes: bool,
    /// How long spans are kept (seconds)
    pub span_store_ttl_secs: u64,
    /// Window in which repeated service/operation index writes are skipped (seconds)
    pub index_cache_ttl_secs: u64,
    /// Space reclamation interval (seconds)
    pub maintenance_interval_secs: u64,
    /// Engine statistics copy interval (seconds)
    pub metrics_update_interval_secs: u64,
    /// Minimum discardable fraction of the value file before it is rewritten
    pub reclaim_threshold: f64,
}

impl Default for RedbConfig {
    fn default() -> Self {
        Self {
            ephemeral: true,
            key_directory: PathBuf::from("./data/keys"),
            value_directory: PathBuf::from("./data/values"),
            read_only: false,
            sync_writes: false,
            span_store_ttl_secs: 72 * 60 * 60, // 72 hours
            index_cache_ttl_secs: 60 * 60,     // 1 hour
            maintenance_interval_secs: 5 * 60, // 5 minutes
            metrics_update_interval_secs: 10,
            reclaim_threshold: 0.5,
        }
    }
}

impl RedbConfig {
    #[must_use]
    pub const fn span_store_ttl(&self) -> Duration {
        Duration::from_secs(self.span_store_ttl_secs)
    }

    #[must_use]
    pub const fn index_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.index_cache_ttl_secs)
    }

    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    #[must_use]
    pub const fn metrics_update_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_update_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.reclaim_threshold > 0.0 && self.reclaim_threshold < 1.0) {
            return Err(Error::configuration(format!(
                "reclaim_threshold must be in (0, 1), got {}",
                self.reclaim_threshold
            )));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(Error::configuration("maintenance_interval_secs must be positive"));
        }
        if self.metrics_update_interval_secs == 0 {
            return Err(Error::configuration(
                "metrics_update_interval_secs must be positive",
            ));
        }
        Ok(())
    }
}

/// Column-family backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CassandraConfig {
    /// Dedup window for index writes (seconds, 0 disables the write cache)
    pub write_cache_ttl_secs: u64,
}

impl Default for CassandraConfig {
    fn default() -> Self {
        Self {
            write_cache_ttl_secs: 12 * 60 * 60, // 12 hours
        }
    }
}

impl CassandraConfig {
    #[must_use]
    pub const fn write_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.write_cache_ttl_secs)
    }
}

//! Storage factory: owns the engine and its background tasks
//!
//! [`Factory::initialize`] opens the engine, builds the shared cache, wires
//! up health and engine gauges, and spawns the maintenance loop and the
//! metrics copier on the current tokio runtime. [`Factory::close`] stops
//! both tasks, closes the engine and, in ephemeral mode, removes the
//! temporary directory. Readers and writers created in between share the
//! one engine handle and the one cache.

use crate::dependencystore::DependencyStore;
use crate::engine::{Engine, EngineOptions, Reclaimer};
use crate::error::{StoreError, StoreResult};
use crate::harvester::{ENGINE_STATS_PREFIX, MetricsCopier};
use crate::lock::Lock;
use crate::maintenance::{HealthGauges, Maintenance, run_every};
use crate::samplingstore::SamplingStore;
use crate::spanstore::{CacheStore, SpanReader, SpanWriter};
use crate::stats::{StatsRegistry, StatsSource};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracevault_common::{Error, MetricsFactory, RedbConfig};
use tracing::{debug, info, warn};

/// Everything that exists only between initialize and close
struct Running {
    engine: Arc<Engine>,
    cache: Arc<CacheStore>,
    metrics: Arc<dyn MetricsFactory>,
    stats_source: Arc<dyn StatsSource>,
    token: CancellationToken,
    tasks: JoinSet<()>,
    temp_dir: Option<TempDir>,
}

pub struct Factory {
    config: RedbConfig,
    registry: Arc<StatsRegistry>,
    running: Option<Running>,
}

impl Factory {
    /// Uninitialized factory publishing engine stats to the global registry.
    ///
    /// Every engine registered there publishes the same `redb_v2_*` names,
    /// so with more than one factory per process the harvested gauges mix
    /// their values. Give each factory its own registry through
    /// [`with_stats_registry`](Self::with_stats_registry) in that case.
    #[must_use]
    pub fn new(config: RedbConfig) -> Self {
        Self {
            config,
            registry: StatsRegistry::global(),
            running: None,
        }
    }

    /// Publish and harvest engine stats through `registry` instead
    #[must_use]
    pub fn with_stats_registry(mut self, registry: Arc<StatsRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Construct and initialize in one step
    pub fn from_config(config: RedbConfig, metrics: Arc<dyn MetricsFactory>) -> StoreResult<Self> {
        let mut factory = Self::new(config);
        factory.initialize(metrics)?;
        Ok(factory)
    }

    #[must_use]
    pub const fn config(&self) -> &RedbConfig {
        &self.config
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    /// Resolved engine options, once initialized
    #[must_use]
    pub fn engine_options(&self) -> Option<&EngineOptions> {
        self.running.as_ref().map(|r| r.engine.options())
    }

    /// Open the engine and start background maintenance.
    ///
    /// Must be called from within a tokio runtime. On failure nothing is
    /// started and the factory stays uninitialized.
    pub fn initialize(&mut self, metrics: Arc<dyn MetricsFactory>) -> StoreResult<()> {
        if self.running.is_some() {
            return Err(Error::invalid_argument("storage factory is already initialized").into());
        }
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;

        let (options, temp_dir) = if self.config.ephemeral {
            let dir = tempfile::Builder::new().prefix("redb").tempdir()?;
            let options = EngineOptions {
                key_directory: dir.path().to_path_buf(),
                value_directory: dir.path().to_path_buf(),
                read_only: false,
                sync_writes: false,
            };
            (options, Some(dir))
        } else {
            // Failures here resurface when the engine opens the files
            initialize_dir(&self.config.key_directory);
            initialize_dir(&self.config.value_directory);
            let options = EngineOptions {
                key_directory: self.config.key_directory.clone(),
                value_directory: self.config.value_directory.clone(),
                read_only: self.config.read_only,
                sync_writes: self.config.sync_writes,
            };
            (options, None)
        };

        let engine = Arc::new(Engine::open(options.clone())?);

        let cache = Arc::new(CacheStore::new(self.config.index_cache_ttl()));
        cache.prefill(&engine)?;

        let health = HealthGauges::new(metrics.as_ref());

        let stats_source: Arc<dyn StatsSource> = engine.stats();
        self.registry.register(Arc::clone(&stats_source));
        let copier = MetricsCopier::discover(
            Arc::clone(&self.registry),
            ENGINE_STATS_PREFIX,
            metrics.as_ref(),
        );
        debug!(gauges = ?copier.gauge_names(), "Discovered engine gauges");

        let maintenance = Maintenance::new(
            Arc::clone(&engine) as Arc<dyn Reclaimer>,
            self.config.reclaim_threshold,
            health,
            options.key_directory.clone(),
            options.value_directory.clone(),
        );

        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();
        tasks.spawn_on(
            run_every(
                "maintenance",
                self.config.maintenance_interval(),
                token.clone(),
                move |at| maintenance.tick(at),
            ),
            &runtime,
        );
        tasks.spawn_on(
            run_every(
                "metrics_copier",
                self.config.metrics_update_interval(),
                token.clone(),
                move |_| copier.copy(),
            ),
            &runtime,
        );

        info!(configuration = ?options, "Redb storage configuration");

        self.running = Some(Running {
            engine,
            cache,
            metrics,
            stats_source,
            token,
            tasks,
            temp_dir,
        });
        Ok(())
    }

    pub fn create_span_reader(&self) -> StoreResult<SpanReader> {
        let running = self.running()?;
        Ok(SpanReader::new(
            Arc::clone(&running.engine),
            Arc::clone(&running.cache),
        ))
    }

    pub fn create_span_writer(&self) -> StoreResult<SpanWriter> {
        let running = self.running()?;
        Ok(SpanWriter::new(
            Arc::clone(&running.engine),
            Arc::clone(&running.cache),
            self.config.span_store_ttl(),
            self.config.index_cache_ttl(),
            running.metrics.as_ref(),
        ))
    }

    pub fn create_dependency_reader(&self) -> StoreResult<DependencyStore> {
        Ok(DependencyStore::new(Arc::new(self.create_span_reader()?)))
    }

    pub fn create_sampling_store(&self) -> StoreResult<SamplingStore> {
        Ok(SamplingStore::new(Arc::clone(&self.running()?.engine)))
    }

    pub fn create_lock(&self) -> StoreResult<Lock> {
        self.running()?;
        Ok(Lock)
    }

    /// Stop background tasks, close the engine, remove ephemeral data.
    ///
    /// An engine close error wins over a directory removal error. Closing a
    /// factory that was never initialized succeeds.
    pub async fn close(&mut self) -> StoreResult<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        running.token.cancel();
        while let Some(result) = running.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.registry.unregister(&running.stats_source);

        let engine = Arc::clone(&running.engine);
        let closed = tokio::task::spawn_blocking(move || engine.close()).await?;
        let removed = running.temp_dir.map_or(Ok(()), TempDir::close);
        close_outcome(closed, removed)
    }

    /// Delete all stored data. Destructive; meant for tests and resets.
    pub async fn purge(&self) -> StoreResult<()> {
        let running = self.running()?;
        let engine = Arc::clone(&running.engine);
        tokio::task::spawn_blocking(move || engine.drop_all()).await??;
        running.cache.clear();
        Ok(())
    }

    fn running(&self) -> StoreResult<&Running> {
        self.running.as_ref().ok_or(StoreError::NotInitialized)
    }
}

impl Drop for Factory {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.token.cancel();
        }
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

/// The engine close error wins; a removal error surfaces only after a clean close
fn close_outcome(closed: StoreResult<()>, removed: io::Result<()>) -> StoreResult<()> {
    closed?;
    removed?;
    Ok(())
}

/// Create `path` and its parents with owner-only permissions, best effort
fn initialize_dir(path: &Path) {
    if path.exists() {
        return;
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    if let Err(e) = builder.create(path) {
        debug!(directory = ?path, error = %e, "Failed to create directory");
    }
}

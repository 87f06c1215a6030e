//! Redb-backed span engine.
//!
//! Index rows live in `keys.redb` under the key directory, span payloads
//! and sampling records in `values.redb` under the value directory. The two
//! handles are opened together and closed together; after [`Engine::close`]
//! every call returns [`StoreError::Closed`].

use crate::error::{ReclaimError, StoreError, StoreResult};
use crate::stats::{StatValue, StatsSource};
use crate::tables;
use parking_lot::RwLock;
use redb::{Database, Durability, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::SystemTime;
use tracevault_common::{Operation, Span, TraceId, unix_micros};
use tracing::{debug, info};

pub const KEYS_FILE: &str = "keys.redb";
pub const VALUES_FILE: &str = "values.redb";

/// Upper bound of expired spans removed by one reclamation pass
pub const EVICTION_BATCH: usize = 1024;

/// Value files smaller than this are never compacted
pub const MIN_COMPACTION_BYTES: u64 = 1 << 20;

/// Resolved open options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub key_directory: PathBuf,
    pub value_directory: PathBuf,
    pub read_only: bool,
    pub sync_writes: bool,
}

impl EngineOptions {
    #[must_use]
    pub fn key_file(&self) -> PathBuf {
        self.key_directory.join(KEYS_FILE)
    }

    #[must_use]
    pub fn value_file(&self) -> PathBuf {
        self.value_directory.join(VALUES_FILE)
    }
}

/// Something that can reclaim storage space in bounded passes
pub trait Reclaimer: Send + Sync {
    /// One pass; `NothingToReclaim` once there is no work left
    fn reclaim(&self, threshold: f64) -> Result<(), ReclaimError>;
}

#[derive(Serialize, Deserialize)]
struct StoredSpan {
    expires_at: u64,
    span: Span,
}

struct Databases {
    keys: Database,
    values: Database,
}

/// Shared handle to the opened key and value databases
pub struct Engine {
    options: EngineOptions,
    dbs: RwLock<Option<Databases>>,
    stats: Arc<EngineStats>,
    seq: AtomicU64,
}

impl Engine {
    /// Open (or, unless read-only, create) both database files
    pub fn open(options: EngineOptions) -> StoreResult<Self> {
        let key_file = options.key_file();
        let value_file = options.value_file();

        let dbs = if options.read_only {
            Databases {
                keys: Database::open(&key_file)?,
                values: Database::open(&value_file)?,
            }
        } else {
            let keys = Database::create(&key_file)?;
            let values = Database::create(&value_file)?;
            // Create all tables eagerly so later read txns don't fail
            let txn = keys.begin_write()?;
            create_key_tables(&txn)?;
            txn.commit()?;
            let txn = values.begin_write()?;
            create_value_tables(&txn)?;
            txn.commit()?;
            Databases { keys, values }
        };
        debug!("Opened redb files {:?} and {:?}", key_file, value_file);

        Ok(Self {
            stats: Arc::new(EngineStats::new(key_file, value_file)),
            options,
            dbs: RwLock::new(Some(dbs)),
            seq: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Counters published to the stats registry
    #[must_use]
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.dbs.read().is_none()
    }

    /// Flush and release both databases. Later calls are no-ops.
    pub fn close(&self) -> StoreResult<()> {
        let Some(dbs) = self.dbs.write().take() else {
            return Ok(());
        };
        if !self.options.read_only {
            // Make eventual-durability commits durable before release
            for db in [&dbs.keys, &dbs.values] {
                let mut txn = db.begin_write()?;
                txn.set_durability(Durability::Immediate);
                txn.commit()?;
            }
        }
        info!("Closed redb engine at {:?}", self.options.key_directory);
        Ok(())
    }

    /// Delete every row of every table
    pub fn drop_all(&self) -> StoreResult<()> {
        self.ensure_writable()?;
        self.with_dbs(|dbs| {
            let txn = self.begin_write(&dbs.keys)?;
            txn.delete_table(tables::SERVICES)?;
            txn.delete_table(tables::OPERATIONS)?;
            txn.delete_table(tables::START_TIME_INDEX)?;
            create_key_tables(&txn)?;
            txn.commit()?;

            let txn = self.begin_write(&dbs.values)?;
            txn.delete_table(tables::SPANS)?;
            txn.delete_table(tables::SPAN_EXPIRY)?;
            txn.delete_table(tables::THROUGHPUT)?;
            txn.delete_table(tables::PROBABILITIES)?;
            create_value_tables(&txn)?;
            txn.commit()?;
            Ok(())
        })
    }

    // ---- Spans ----

    /// Store a span payload with its expiry and start-time index rows
    pub fn put_span(&self, span: &Span, expires_at: u64) -> StoreResult<()> {
        self.ensure_writable()?;
        let bytes = bincode::serialize(&StoredSpan {
            expires_at,
            span: span.clone(),
        })?;
        let trace_id = span.trace_id.as_u128();
        let span_id = span.span_id.as_u64();

        self.with_dbs(|dbs| {
            let txn = self.begin_write(&dbs.values)?;
            {
                let mut spans = txn.open_table(tables::SPANS)?;
                spans.insert((trace_id, span_id), bytes.as_slice())?;
                let mut expiry = txn.open_table(tables::SPAN_EXPIRY)?;
                expiry.insert((expires_at, trace_id, span_id), ())?;
            }
            txn.commit()?;

            let txn = self.begin_write(&dbs.keys)?;
            {
                let mut index = txn.open_table(tables::START_TIME_INDEX)?;
                index.insert((span.start_time, trace_id, span_id), ())?;
            }
            txn.commit()?;
            Ok(())
        })?;

        self.stats.put_num.fetch_add(1, Ordering::Relaxed);
        self.stats
            .written_bytes
            .fetch_add(saturating_i64(bytes.len()), Ordering::Relaxed);
        Ok(())
    }

    /// Store service and operation index rows
    pub fn put_operation(&self, operation: &Operation, expires_at: u64) -> StoreResult<()> {
        self.ensure_writable()?;
        self.with_dbs(|dbs| {
            let txn = self.begin_write(&dbs.keys)?;
            {
                let mut services = txn.open_table(tables::SERVICES)?;
                services.insert(operation.service_name.as_str(), expires_at)?;
                let mut operations = txn.open_table(tables::OPERATIONS)?;
                operations.insert(
                    (
                        operation.service_name.as_str(),
                        operation.span_kind.as_str(),
                        operation.operation_name.as_str(),
                    ),
                    expires_at,
                )?;
            }
            txn.commit()?;
            Ok(())
        })
    }

    /// Unexpired spans of a trace, ordered by span id
    pub fn trace_spans(&self, trace_id: TraceId, now: u64) -> StoreResult<Vec<Span>> {
        let id = trace_id.as_u128();
        let (spans, read_bytes) = self.with_dbs(|dbs| {
            let txn = dbs.values.begin_read()?;
            let table = txn.open_table(tables::SPANS)?;
            let mut spans = Vec::new();
            let mut read_bytes = 0usize;
            for entry in table.range((id, 0u64)..=(id, u64::MAX))? {
                let (_, value) = entry?;
                let bytes = value.value();
                read_bytes += bytes.len();
                let stored: StoredSpan = bincode::deserialize(bytes)?;
                if stored.expires_at > now {
                    spans.push(stored.span);
                }
            }
            Ok((spans, read_bytes))
        })?;

        self.stats
            .get_num
            .fetch_add(saturating_i64(spans.len()), Ordering::Relaxed);
        self.stats
            .read_bytes
            .fetch_add(saturating_i64(read_bytes), Ordering::Relaxed);
        Ok(spans)
    }

    /// Distinct trace ids with a span starting in `[start, end]`, by start time
    pub fn trace_ids_between(&self, start: u64, end: u64) -> StoreResult<Vec<TraceId>> {
        if start > end {
            return Ok(Vec::new());
        }
        self.with_dbs(|dbs| {
            let txn = dbs.keys.begin_read()?;
            let table = txn.open_table(tables::START_TIME_INDEX)?;
            let mut seen = HashSet::new();
            let mut ids = Vec::new();
            for entry in table.range((start, 0u128, 0u64)..=(end, u128::MAX, u64::MAX))? {
                let (key, _) = entry?;
                let id = TraceId::new(key.value().1);
                if seen.insert(id) {
                    ids.push(id);
                }
            }
            Ok(ids)
        })
    }

    /// Services whose index row has not expired, with their expiry
    pub fn live_services(&self, now: u64) -> StoreResult<Vec<(String, u64)>> {
        self.with_dbs(|dbs| {
            let txn = dbs.keys.begin_read()?;
            let table = txn.open_table(tables::SERVICES)?;
            let mut result = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                if value.value() > now {
                    result.push((key.value().to_string(), value.value()));
                }
            }
            Ok(result)
        })
    }

    /// Operations whose index row has not expired, with their expiry
    pub fn live_operations(&self, now: u64) -> StoreResult<Vec<(Operation, u64)>> {
        self.with_dbs(|dbs| {
            let txn = dbs.keys.begin_read()?;
            let table = txn.open_table(tables::OPERATIONS)?;
            let mut result = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                if value.value() > now {
                    let (service, kind, name) = key.value();
                    result.push((
                        Operation {
                            service_name: service.to_string(),
                            span_kind: kind.to_string(),
                            operation_name: name.to_string(),
                        },
                        value.value(),
                    ));
                }
            }
            Ok(result)
        })
    }

    // ---- Timestamped records (sampling) ----

    /// Append a record under `timestamp`; records never overwrite each other
    pub fn put_record(
        &self,
        table_def: TableDefinition<(u64, u64), &[u8]>,
        timestamp: u64,
        bytes: &[u8],
    ) -> StoreResult<()> {
        self.ensure_writable()?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.with_dbs(|dbs| {
            let txn = self.begin_write(&dbs.values)?;
            {
                let mut table = txn.open_table(table_def)?;
                table.insert((timestamp, seq), bytes)?;
            }
            txn.commit()?;
            Ok(())
        })?;
        self.stats.put_num.fetch_add(1, Ordering::Relaxed);
        self.stats
            .written_bytes
            .fetch_add(saturating_i64(bytes.len()), Ordering::Relaxed);
        Ok(())
    }

    /// Records with a timestamp in `[start, end]`, oldest first
    pub fn records_between(
        &self,
        table_def: TableDefinition<(u64, u64), &[u8]>,
        start: u64,
        end: u64,
    ) -> StoreResult<Vec<Vec<u8>>> {
        if start > end {
            return Ok(Vec::new());
        }
        self.with_dbs(|dbs| {
            let txn = dbs.values.begin_read()?;
            let table = txn.open_table(table_def)?;
            let mut result = Vec::new();
            for entry in table.range((start, 0u64)..=(end, u64::MAX))? {
                let (_, value) = entry?;
                result.push(value.value().to_vec());
            }
            Ok(result)
        })
    }

    /// Most recently timestamped record
    pub fn latest_record(
        &self,
        table_def: TableDefinition<(u64, u64), &[u8]>,
    ) -> StoreResult<Option<Vec<u8>>> {
        self.with_dbs(|dbs| {
            let txn = dbs.values.begin_read()?;
            let table = txn.open_table(table_def)?;
            Ok(table.last()?.map(|(_, value)| value.value().to_vec()))
        })
    }

    // ---- Space reclamation ----

    /// One reclamation pass evaluated at `now`.
    ///
    /// Evicts up to [`EVICTION_BATCH`] expired spans, then compacts the value
    /// file if its discardable fraction is at least `threshold`.
    pub fn reclaim_at(&self, threshold: f64, now: u64) -> Result<(), ReclaimError> {
        if self.options.read_only {
            return Err(ReclaimError::NothingToReclaim);
        }
        let evicted = self.evict_expired(now, EVICTION_BATCH)?;
        let compacted = self.compact_values(threshold)?;
        if evicted > 0 || compacted {
            Ok(())
        } else {
            Err(ReclaimError::NothingToReclaim)
        }
    }

    /// Discardable fraction of the value file
    pub fn fragmentation(&self) -> StoreResult<f64> {
        self.with_dbs(|dbs| Ok(value_file_usage(&dbs.values)?.ratio()))
    }

    fn evict_expired(&self, now: u64, limit: usize) -> StoreResult<usize> {
        let evicted = self.with_dbs(|dbs| {
            let txn = self.begin_write(&dbs.values)?;
            let mut start_keys = Vec::new();
            {
                let mut expiry = txn.open_table(tables::SPAN_EXPIRY)?;
                let expired: Vec<(u64, u128, u64)> = expiry
                    .range(..=(now, u128::MAX, u64::MAX))?
                    .take(limit)
                    .map(|entry| entry.map(|(key, _)| key.value()))
                    .collect::<Result<_, _>>()?;

                let mut spans = txn.open_table(tables::SPANS)?;
                for key in expired {
                    expiry.remove(key)?;
                    let (_, trace_id, span_id) = key;
                    if let Some(value) = spans.remove((trace_id, span_id))? {
                        let stored: StoredSpan = bincode::deserialize(value.value())?;
                        start_keys.push((stored.span.start_time, trace_id, span_id));
                    }
                }
            }
            txn.commit()?;

            let txn = self.begin_write(&dbs.keys)?;
            let mut index_rows = 0;
            {
                let mut index = txn.open_table(tables::START_TIME_INDEX)?;
                for key in &start_keys {
                    index.remove(key)?;
                }

                let mut services = txn.open_table(tables::SERVICES)?;
                let expired: Vec<String> = services
                    .iter()?
                    .filter_map(|entry| match entry {
                        Ok((key, value)) if value.value() <= now => {
                            Some(Ok(key.value().to_string()))
                        }
                        Ok(_) => None,
                        Err(e) => Some(Err(e)),
                    })
                    .take(limit)
                    .collect::<Result<_, _>>()?;
                for service in &expired {
                    services.remove(service.as_str())?;
                }
                index_rows += expired.len();

                let mut operations = txn.open_table(tables::OPERATIONS)?;
                let expired: Vec<(String, String, String)> = operations
                    .iter()?
                    .filter_map(|entry| match entry {
                        Ok((key, value)) if value.value() <= now => {
                            let (s, k, o) = key.value();
                            Some(Ok((s.to_string(), k.to_string(), o.to_string())))
                        }
                        Ok(_) => None,
                        Err(e) => Some(Err(e)),
                    })
                    .take(limit)
                    .collect::<Result<_, _>>()?;
                for (s, k, o) in &expired {
                    operations.remove((s.as_str(), k.as_str(), o.as_str()))?;
                }
                index_rows += expired.len();
            }
            txn.commit()?;
            Ok((start_keys.len(), index_rows))
        })?;

        let (spans, index_rows) = evicted;
        if spans > 0 || index_rows > 0 {
            debug!(spans, index_rows, "Evicted expired rows");
        }
        self.stats
            .evicted_spans
            .fetch_add(saturating_i64(spans), Ordering::Relaxed);
        Ok(spans + index_rows)
    }

    /// Compact the value file when fragmented enough; true if space was freed
    fn compact_values(&self, threshold: f64) -> StoreResult<bool> {
        let mut guard = self.dbs.write();
        let dbs = guard.as_mut().ok_or(StoreError::Closed)?;

        let before = value_file_usage(&dbs.values)?;
        self.stats.set_fragmentation(before.ratio());
        if before.fragmented < MIN_COMPACTION_BYTES || before.ratio() < threshold {
            return Ok(false);
        }

        dbs.values.compact()?;
        let after = value_file_usage(&dbs.values)?;
        self.stats.set_fragmentation(after.ratio());
        if after.fragmented >= before.fragmented {
            return Ok(false);
        }

        self.stats.compactions.fetch_add(1, Ordering::Relaxed);
        info!(
            fragmented_before = before.fragmented,
            fragmented_after = after.fragmented,
            "Compacted redb value file"
        );
        Ok(true)
    }

    // ---- Helpers ----

    const fn durability(&self) -> Durability {
        if self.options.sync_writes {
            Durability::Immediate
        } else {
            Durability::Eventual
        }
    }

    fn begin_write(&self, db: &Database) -> StoreResult<WriteTransaction> {
        let mut txn = db.begin_write()?;
        txn.set_durability(self.durability());
        Ok(txn)
    }

    const fn ensure_writable(&self) -> StoreResult<()> {
        if self.options.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn with_dbs<R>(&self, f: impl FnOnce(&Databases) -> StoreResult<R>) -> StoreResult<R> {
        let guard = self.dbs.read();
        let dbs = guard.as_ref().ok_or(StoreError::Closed)?;
        f(dbs)
    }
}

impl Reclaimer for Engine {
    fn reclaim(&self, threshold: f64) -> Result<(), ReclaimError> {
        self.reclaim_at(threshold, unix_micros(SystemTime::now()))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn create_key_tables(txn: &WriteTransaction) -> StoreResult<()> {
    let _t = txn.open_table(tables::SERVICES)?;
    let _t = txn.open_table(tables::OPERATIONS)?;
    let _t = txn.open_table(tables::START_TIME_INDEX)?;
    Ok(())
}

fn create_value_tables(txn: &WriteTransaction) -> StoreResult<()> {
    let _t = txn.open_table(tables::SPANS)?;
    let _t = txn.open_table(tables::SPAN_EXPIRY)?;
    let _t = txn.open_table(tables::THROUGHPUT)?;
    let _t = txn.open_table(tables::PROBABILITIES)?;
    Ok(())
}

struct FileUsage {
    live: u64,
    fragmented: u64,
}

impl FileUsage {
    #[allow(clippy::cast_precision_loss)]
    fn ratio(&self) -> f64 {
        let total = self.live + self.fragmented;
        if total == 0 {
            0.0
        } else {
            self.fragmented as f64 / total as f64
        }
    }
}

fn value_file_usage(db: &Database) -> StoreResult<FileUsage> {
    let txn = db.begin_write()?;
    let stats = txn.stats()?;
    txn.abort()?;
    Ok(FileUsage {
        live: stats.stored_bytes() + stats.metadata_bytes(),
        fragmented: stats.fragmented_bytes(),
    })
}

fn saturating_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn file_len(path: &Path) -> i64 {
    std::fs::metadata(path).map_or(0, |m| i64::try_from(m.len()).unwrap_or(i64::MAX))
}

/// Engine counters, published under the `redb_v2_` prefix
#[derive(Debug)]
pub struct EngineStats {
    put_num: AtomicI64,
    get_num: AtomicI64,
    written_bytes: AtomicI64,
    read_bytes: AtomicI64,
    compactions: AtomicI64,
    evicted_spans: AtomicI64,
    fragmentation_bits: AtomicU64,
    key_file: PathBuf,
    value_file: PathBuf,
}

impl EngineStats {
    fn new(key_file: PathBuf, value_file: PathBuf) -> Self {
        Self {
            put_num: AtomicI64::new(0),
            get_num: AtomicI64::new(0),
            written_bytes: AtomicI64::new(0),
            read_bytes: AtomicI64::new(0),
            compactions: AtomicI64::new(0),
            evicted_spans: AtomicI64::new(0),
            fragmentation_bits: AtomicU64::new(0f64.to_bits()),
            key_file,
            value_file,
        }
    }

    fn set_fragmentation(&self, ratio: f64) {
        self.fragmentation_bits
            .store(ratio.to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn evicted_spans(&self) -> i64 {
        self.evicted_spans.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn compactions(&self) -> i64 {
        self.compactions.load(Ordering::Relaxed)
    }
}

impl StatsSource for EngineStats {
    fn visit(&self, f: &mut dyn FnMut(&str, &StatValue)) {
        let ints = [
            ("redb_v2_put_num", &self.put_num),
            ("redb_v2_get_num", &self.get_num),
            ("redb_v2_written_bytes", &self.written_bytes),
            ("redb_v2_read_bytes", &self.read_bytes),
            ("redb_v2_compactions", &self.compactions),
            ("redb_v2_evicted_spans", &self.evicted_spans),
        ];
        for (name, value) in ints {
            f(name, &StatValue::Int(value.load(Ordering::Relaxed)));
        }
        for (name, path) in [
            ("redb_v2_size_bytes_keys", &self.key_file),
            ("redb_v2_size_bytes_values", &self.value_file),
        ] {
            f(
                name,
                &StatValue::Map(vec![(
                    path.display().to_string(),
                    StatValue::Int(file_len(path)),
                )]),
            );
        }
        f(
            "redb_v2_fragmentation_ratio",
            &StatValue::Float(f64::from_bits(
                self.fragmentation_bits.load(Ordering::Relaxed),
            )),
        );
    }
}

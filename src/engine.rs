//! Engine Module
//!
//! The content store facade that coordinates all components.
//!
//! ## Responsibilities
//! - Own the data directory (advisory lock) and its layout
//! - Replay the index log and cache journal before serving
//! - Route `set`/`get`/`delete` through segments, index and cache
//! - Run index compaction, segment compaction and cache snapshots in the
//!   background

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};

use crate::cache::{BoundedCache, EvictionCallback};
use crate::compactor::{CompactionStats, Compactor};
use crate::config::{Config, Provider};
use crate::error::{FragError, Result};
use crate::index::{IndexCompaction, IndexEntry, IndexStore};
use crate::scheduler::PeriodicTask;
use crate::segment::SegmentStore;

/// Attempts to resolve a key whose segment vanished under a concurrent
/// compaction
const READ_ATTEMPTS: usize = 3;

/// Background maintenance jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maintenance {
    IndexCompaction,
    SegmentCompaction,
    CacheSnapshot,
}

impl Maintenance {
    fn task_name(self) -> &'static str {
        match self {
            Maintenance::IndexCompaction => "index-compaction",
            Maintenance::SegmentCompaction => "segment-compaction",
            Maintenance::CacheSnapshot => "cache-snapshot",
        }
    }
}

/// Point-in-time engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub keys: usize,
    pub segments: usize,
    pub segment_bytes: u64,
    pub index_log_bytes: u64,
    pub cache_entries: usize,
    pub cache_weight: usize,
}

/// The content store engine
///
/// ## Concurrency Model
///
/// - **set**: segment write (single-writer lock, or a pooled writer), then
///   the index log append + map update. Holds `reclaim_guard` shared so the
///   compactor can't delete a segment between the two.
/// - **get**: cache lookup, index read lock, positional file read. Never
///   blocked by other readers.
/// - **publish**: orders index updates with cache updates, so a cached value
///   always matches what the index resolves to. Readers only `try_lock` it
///   when filling the cache, so they never queue behind a writer.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Advisory lock on the data directory, held for the engine's lifetime
    _dir_lock: File,

    segments: Arc<SegmentStore>,
    index: Arc<IndexStore>,
    cache: Option<Arc<BoundedCache>>,
    compactor: Arc<Compactor>,

    reclaim_guard: Arc<RwLock<()>>,
    publish: Mutex<()>,

    /// Running background tasks
    tasks: Mutex<Vec<(Maintenance, PeriodicTask)>>,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LOCK_FILENAME: &'static str = "LOCK";
    const INDEX_FILENAME: &'static str = "index";
    const INDEX_TEMP_FILENAME: &'static str = "indexTemp";
    const CACHE_FILENAME: &'static str = "rdb";
    const SEGMENT_DIR: &'static str = "segments";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory and take its lock
    /// 2. Recover writable segments
    /// 3. Replay the index log
    /// 4. Replay the cache journal (persistent LRU provider only)
    /// 5. Start background tasks
    pub fn open(config: Config) -> Result<Self> {
        Self::open_inner(config, None)
    }

    /// Open with a callback invoked for every key the cache evicts
    pub fn open_with_eviction_callback(config: Config, on_evict: EvictionCallback) -> Result<Self> {
        Self::open_inner(config, Some(on_evict))
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        config.data_dir = path.to_path_buf();
        Self::open(config)
    }

    fn open_inner(config: Config, on_evict: Option<EvictionCallback>) -> Result<Self> {
        config.validate()?;

        // Step 1: Directory and lock
        let data_dir = config.data_dir.clone();
        fs::create_dir_all(&data_dir)?;
        let dir_lock = Self::lock_dir(&data_dir)?;

        // Step 2: Segments
        let segments = Arc::new(SegmentStore::open(
            &data_dir.join(Self::SEGMENT_DIR),
            config.max_segment_size,
            config.writer_mode,
            config.sync_strategy,
        )?);

        // Step 3: Index
        let (index, replay) = IndexStore::open(
            &data_dir.join(Self::INDEX_FILENAME),
            &data_dir.join(Self::INDEX_TEMP_FILENAME),
            config.sync_strategy,
        )?;
        let index = Arc::new(index);

        // Step 4: Cache
        let cache = match &config.provider {
            Provider::File => None,
            Provider::LruFile(cache_config) => {
                let cache = if cache_config.persist {
                    let cache = BoundedCache::open(
                        cache_config.policy,
                        &data_dir.join(Self::CACHE_FILENAME),
                        config.sync_strategy,
                    )?;
                    // The journal and the index log sync independently, so
                    // restored values may predate the replayed index.
                    let dropped = cache.reconcile(|key| index.get(key).is_some())?;
                    if dropped > 0 {
                        tracing::info!(dropped, "dropped cached keys missing from the index");
                    }
                    cache
                } else {
                    BoundedCache::new(cache_config.policy)
                };
                let cache = match on_evict {
                    Some(on_evict) => cache.with_eviction_callback(on_evict),
                    None => cache,
                };
                Some(Arc::new(cache))
            }
        };

        let reclaim_guard = Arc::new(RwLock::new(()));
        let lifetime = config.defrag.map(|d| d.lifetime).unwrap_or_default();
        let compactor = Arc::new(Compactor::new(
            Arc::clone(&segments),
            Arc::clone(&index),
            lifetime,
            Arc::clone(&reclaim_guard),
        ));

        tracing::info!(
            data_dir = %data_dir.display(),
            keys = index.len(),
            index_records = replay.records,
            cache_entries = cache.as_ref().map_or(0, |c| c.len()),
            "engine opened"
        );

        let engine = Self {
            config,
            _dir_lock: dir_lock,
            segments,
            index,
            cache,
            compactor,
            reclaim_guard,
            publish: Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        };

        // Step 5: Background tasks
        engine.start_tasks()?;

        Ok(engine)
    }

    /// Store `value` under `key`, replacing any previous value
    ///
    /// Steps:
    /// 1. Append the record to a writable segment
    /// 2. Append the new location to the index log, then publish it
    /// 3. Refresh the cache
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let _shared = self.reclaim_guard.read();

        // Step 1: Content first; the index never points at unwritten bytes
        let entry = self.segments.write(key.as_bytes(), value)?;

        // Steps 2-3
        let _publish = self.publish.lock();
        self.index.put(key, entry)?;
        if let Some(cache) = &self.cache {
            cache.put(key, Bytes::copy_from_slice(value))?;
        }

        Ok(())
    }

    /// Get the value stored under `key`
    ///
    /// Search order:
    /// 1. Cache (refreshes recency)
    /// 2. Index → segment read
    pub fn get(&self, key: &str) -> Result<Bytes> {
        if let Some(value) = self.cache.as_ref().and_then(|c| c.get(key)) {
            return Ok(value);
        }

        for _ in 0..READ_ATTEMPTS {
            let entry = self.index.get(key).ok_or(FragError::KeyNotFound)?;

            match self.segments.read(&entry) {
                Ok(value) => {
                    self.fill_cache(key, &entry, &value);
                    return Ok(value);
                }
                // Relocated and retired between lookup and read: resolve again.
                Err(e) if e.is_missing_file() && self.index.get(key).as_ref() != Some(&entry) => {
                    tracing::debug!(key = %key, segment = %entry.segment, "segment retired mid-read, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(FragError::Storage(format!(
            "key {} kept moving during {} read attempts",
            key, READ_ATTEMPTS
        )))
    }

    /// Remove `key`; true if it existed
    ///
    /// Only the index entry (and cache entry) goes away. The record's segment
    /// space is reclaimed by a later compaction.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let _publish = self.publish.lock();
        let removed = self.index.remove(key)?.is_some();
        if let Some(cache) = &self.cache {
            cache.remove(key)?;
        }
        Ok(removed)
    }

    /// Whether `key` currently resolves to a value
    pub fn contains(&self, key: &str) -> bool {
        self.index.get(key).is_some()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rewrite the index log without superseded entries
    pub fn compact_index(&self) -> Result<IndexCompaction> {
        self.index.compact()
    }

    /// Reclaim space from old, full segments
    pub fn defragment(&self) -> Result<CompactionStats> {
        self.compactor.run()
    }

    /// Snapshot a persistent cache; `None` without one
    pub fn snapshot_cache(&self) -> Result<Option<u64>> {
        match &self.cache {
            Some(cache) => cache.snapshot(),
            None => Ok(None),
        }
    }

    /// Run a background task now and wait for it
    ///
    /// Returns false if that task is not running.
    pub fn trigger(&self, job: Maintenance) -> bool {
        self.tasks
            .lock()
            .iter()
            .find(|(kind, _)| *kind == job)
            .map_or(false, |(_, task)| task.trigger())
    }

    /// Close the engine gracefully
    ///
    /// Stops background tasks, syncs writers and snapshots the cache
    pub fn close(self) -> Result<()> {
        for (_, mut task) in self.tasks.lock().drain(..) {
            task.shutdown();
        }

        self.segments.sync()?;
        self.index.sync()?;

        if let Some(cache) = &self.cache {
            if cache.is_persistent() {
                cache.snapshot()?;
            }
            cache.sync()?;
        }

        tracing::info!(data_dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the segments directory path
    pub fn segment_dir(&self) -> &Path {
        self.segments.dir()
    }

    /// Current index location of `key`
    pub fn locate(&self, key: &str) -> Option<IndexEntry> {
        self.index.get(key)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn segments(&self) -> &SegmentStore {
        &self.segments
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn cache(&self) -> Option<&BoundedCache> {
        self.cache.as_deref()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let segments = self.segments.segments()?;
        Ok(EngineStats {
            keys: self.index.len(),
            segments: segments.len(),
            segment_bytes: segments.iter().map(|s| s.size).sum(),
            index_log_bytes: self.index.log_len(),
            cache_entries: self.cache.as_ref().map_or(0, |c| c.len()),
            cache_weight: self.cache.as_ref().map_or(0, |c| c.weight()),
        })
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn lock_dir(data_dir: &Path) -> Result<File> {
        let lock_path = data_dir.join(Self::LOCK_FILENAME);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(FragError::Locked(data_dir.display().to_string()));
        }
        Ok(lock_file)
    }

    /// Cache a value read from disk, unless the key moved meanwhile
    ///
    /// Skipped while a writer is publishing; the next miss fills it instead.
    fn fill_cache(&self, key: &str, entry: &IndexEntry, value: &Bytes) {
        let Some(cache) = &self.cache else {
            return;
        };

        let Some(_publish) = self.publish.try_lock() else {
            tracing::trace!(key = %key, "writer publishing, cache fill skipped");
            return;
        };
        if self.index.get(key).as_ref() != Some(entry) {
            return;
        }
        if let Err(e) = cache.put(key, value.clone()) {
            tracing::warn!(key = %key, error = %e, "failed to cache value");
        }
    }

    fn start_tasks(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();

        if let Some(interval) = self.config.index_compaction_interval {
            let index = Arc::clone(&self.index);
            let job = Maintenance::IndexCompaction;
            tasks.push((
                job,
                PeriodicTask::spawn(job.task_name(), interval, move || index.compact().map(|_| ()))?,
            ));
        }

        if let Some(defrag) = self.config.defrag {
            let compactor = Arc::clone(&self.compactor);
            let job = Maintenance::SegmentCompaction;
            tasks.push((
                job,
                PeriodicTask::spawn(job.task_name(), defrag.interval, move || {
                    compactor.run().map(|_| ())
                })?,
            ));
        }

        if let (Some(cache), Provider::LruFile(cache_config)) = (&self.cache, &self.config.provider) {
            if let (true, Some(interval)) = (cache.is_persistent(), cache_config.snapshot_interval) {
                let cache = Arc::clone(cache);
                let job = Maintenance::CacheSnapshot;
                tasks.push((
                    job,
                    PeriodicTask::spawn(job.task_name(), interval, move || {
                        cache.snapshot().map(|_| ())
                    })?,
                ));
            }
        }

        Ok(())
    }
}

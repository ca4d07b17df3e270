//! Configuration for fragstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FragError, Result};

/// Main configuration for a fragstore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── LOCK
    ///     ├── index        (index log)
    ///     ├── indexTemp    (index compaction staging)
    ///     ├── rdb          (cache snapshot, LruFile provider only)
    ///     └── segments/    (content segments)
    pub data_dir: PathBuf,

    /// Segment rotation threshold (in bytes)
    pub max_segment_size: u64,

    /// How writers share the writable segments
    pub writer_mode: WriterMode,

    /// How often segment and log writes are fsynced
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Maintenance Configuration
    // -------------------------------------------------------------------------
    /// Segment defragmentation; `None` disables the background task
    pub defrag: Option<DefragConfig>,

    /// Index log compaction period; `None` disables the background task
    pub index_compaction_interval: Option<Duration>,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Storage provider: plain file-backed, or fronted by a bounded LRU
    pub provider: Provider,
}

/// Segment writer discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterMode {
    /// One active segment, writes serialized behind a single lock
    SingleWriter,

    /// Up to `max_idle` writable segments kept in an idle pool; concurrent
    /// writers each check one out. Trades strict global append order for
    /// bounded write parallelism.
    Pooled { max_idle: usize },
}

/// Sync strategy shared by segment, index log and cache journal writers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N writes to the same file
    EveryNWrites { count: usize },

    /// Leave flushing to the OS page cache
    OsManaged,
}

/// Background segment defragmentation settings
#[derive(Debug, Clone, Copy)]
pub struct DefragConfig {
    /// Scan period
    pub interval: Duration,

    /// Minimum segment age before it is considered for reclamation
    pub lifetime: Duration,
}

/// Storage provider selected at construction time
#[derive(Debug, Clone)]
pub enum Provider {
    /// Segments + index only
    File,

    /// Segments + index, fronted by a bounded LRU cache
    LruFile(CacheConfig),
}

/// Bounded cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Capacity and how entries are weighed against it
    pub policy: CapacityPolicy,

    /// Journal mutations to `rdb` and replay them at startup
    pub persist: bool,

    /// Snapshot period for a persisted cache; `None` snapshots only on close
    pub snapshot_interval: Option<Duration>,
}

/// How cache entries count against capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// At most `n` keys
    Count(usize),

    /// At most `n` bytes of serialized (key + value) records
    Size(usize),
}

impl CapacityPolicy {
    /// The configured capacity, in the policy's unit
    pub fn capacity(&self) -> usize {
        match *self {
            CapacityPolicy::Count(n) | CapacityPolicy::Size(n) => n,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CapacityPolicy::Count(1024),
            persist: false,
            snapshot_interval: None,
        }
    }
}

impl Default for DefragConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lifetime: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./fragstore_data"),
            max_segment_size: 64 * 1024 * 1024, // 64 MB
            writer_mode: WriterMode::SingleWriter,
            sync_strategy: SyncStrategy::EveryNWrites { count: 100 },
            defrag: Some(DefragConfig::default()),
            index_compaction_interval: Some(Duration::from_secs(10 * 60)),
            provider: Provider::File,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_segment_size == 0 {
            return Err(FragError::Config("max_segment_size must be > 0".into()));
        }
        if let WriterMode::Pooled { max_idle: 0 } = self.writer_mode {
            return Err(FragError::Config("pooled writer mode needs max_idle > 0".into()));
        }
        if let SyncStrategy::EveryNWrites { count: 0 } = self.sync_strategy {
            return Err(FragError::Config("sync count must be > 0".into()));
        }
        if let Some(defrag) = &self.defrag {
            if defrag.interval.is_zero() {
                return Err(FragError::Config("defrag interval must be > 0".into()));
            }
        }
        if matches!(self.index_compaction_interval, Some(d) if d.is_zero()) {
            return Err(FragError::Config("index compaction interval must be > 0".into()));
        }
        if let Provider::LruFile(cache) = &self.provider {
            if cache.policy.capacity() == 0 {
                return Err(FragError::Config("cache capacity must be > 0".into()));
            }
            if matches!(cache.snapshot_interval, Some(d) if d.is_zero()) {
                return Err(FragError::Config("cache snapshot interval must be > 0".into()));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the segment rotation threshold (in bytes)
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.config.max_segment_size = size;
        self
    }

    /// Set the segment writer discipline
    pub fn writer_mode(mut self, mode: WriterMode) -> Self {
        self.config.writer_mode = mode;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Enable or disable background segment defragmentation
    pub fn defrag(mut self, defrag: Option<DefragConfig>) -> Self {
        self.config.defrag = defrag;
        self
    }

    /// Enable or disable background index log compaction
    pub fn index_compaction_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.index_compaction_interval = interval;
        self
    }

    /// Front the store with a bounded LRU cache
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.provider = Provider::LruFile(cache);
        self
    }

    /// Set the storage provider
    pub fn provider(mut self, provider: Provider) -> Self {
        self.config.provider = provider;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

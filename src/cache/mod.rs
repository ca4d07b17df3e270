//! Cache Module
//!
//! A bounded LRU over the hot working set, optionally durable.
//!
//! ## Responsibilities
//! - Track recency of keys touched by `set`/`get`
//! - Bound the working set by key count or by serialized record size
//! - Report evictions to a caller-supplied callback
//! - Persist contents to `rdb` (journal + periodic snapshot) and replay at
//!   startup
//!
//! Eviction only forgets the key here. Reclaiming the segment space behind
//! it is left to the compactor.

mod journal;
mod lru;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::{CapacityPolicy, SyncStrategy};
use crate::error::Result;

use journal::{Journal, JournalOp};
use lru::LruList;

/// Invoked with each evicted key, outside the cache lock
pub type EvictionCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct CacheInner {
    lru: LruList,
    journal: Option<Journal>,
}

/// Capacity-bounded, recency-ordered cache
///
/// One lock guards both the ordering and the journal, so journal order is
/// always the order mutations were applied in.
pub struct BoundedCache {
    inner: Mutex<CacheInner>,
    on_evict: EvictionCallback,
}

impl BoundedCache {
    /// In-memory cache with a no-op eviction callback
    pub fn new(policy: CapacityPolicy) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruList::new(policy),
                journal: None,
            }),
            on_evict: Arc::new(|_| {}),
        }
    }

    /// Durable cache backed by the journal at `path`, replayed before return
    pub fn open(policy: CapacityPolicy, path: &Path, strategy: SyncStrategy) -> Result<Self> {
        let (journal, ops) = Journal::open(path, strategy)?;

        let mut lru = LruList::new(policy);
        for op in ops {
            match op {
                JournalOp::Put { key, value } => {
                    lru.put(&key, Some(value));
                }
                JournalOp::Touch { key } => {
                    lru.touch(&key);
                }
                JournalOp::Remove { key } => {
                    lru.remove(&key);
                }
            }
        }

        tracing::debug!(entries = lru.len(), weight = lru.weight(), "cache restored");

        Ok(Self {
            inner: Mutex::new(CacheInner {
                lru,
                journal: Some(journal),
            }),
            on_evict: Arc::new(|_| {}),
        })
    }

    /// Replace the eviction callback
    pub fn with_eviction_callback(mut self, on_evict: EvictionCallback) -> Self {
        self.on_evict = on_evict;
        self
    }

    /// Mark `key` as most recently used, inserting it if absent.
    /// Returns whether it was already cached.
    pub fn touch(&self, key: &str) -> Result<bool> {
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.lru.contains(key) {
                inner.lru.touch(key);
                return Ok(true);
            }
            if let Some(journal) = inner.journal.as_mut() {
                journal.append_touch(key)?;
            }
            inner.lru.touch(key).1
        };
        self.notify(evicted);
        Ok(false)
    }

    /// Cache `value` under `key` as most recently used
    pub fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let evicted = {
            let mut inner = self.inner.lock();
            if let Some(journal) = inner.journal.as_mut() {
                journal.append_put(key, &value)?;
            }
            inner.lru.put(key, Some(value))
        };
        self.notify(evicted);
        Ok(())
    }

    /// Cached value for `key`, refreshing its recency on a hit
    ///
    /// Key-only entries (from `touch`) refresh recency but yield `None`.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.lock().lru.get(key).flatten()
    }

    /// Whether `key` is tracked, without touching recency
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    /// Forget `key`; true if it was tracked
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.lru.remove(key) {
            return Ok(false);
        }
        if let Some(journal) = inner.journal.as_mut() {
            journal.append_remove(key)?;
        }
        Ok(true)
    }

    /// Align restored contents with the authoritative key set
    ///
    /// Keys rejected by `is_live` are dropped. Surviving entries keep their
    /// recency but lose their value, so the next `get` reloads it from disk.
    /// The journal is rewritten to match. Returns the number of dropped keys.
    pub fn reconcile(&self, is_live: impl Fn(&str) -> bool) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut dropped = 0;
        for (key, _) in inner.lru.entries_lru_first() {
            if is_live(&key) {
                inner.lru.demote(&key);
            } else {
                inner.lru.remove(&key);
                dropped += 1;
            }
        }

        let entries = inner.lru.entries_lru_first();
        if let Some(journal) = inner.journal.as_mut() {
            journal.rewrite(&entries)?;
        }
        tracing::debug!(entries = entries.len(), dropped, "cache reconciled");
        Ok(dropped)
    }

    /// Rewrite the journal as a snapshot of the current contents
    ///
    /// Returns the snapshot size in bytes, or `None` for an in-memory cache.
    pub fn snapshot(&self) -> Result<Option<u64>> {
        let mut inner = self.inner.lock();
        let entries = inner.lru.entries_lru_first();
        let Some(journal) = inner.journal.as_mut() else {
            return Ok(None);
        };
        let bytes = journal.rewrite(&entries)?;
        tracing::debug!(entries = entries.len(), bytes, "cache snapshot written");
        Ok(Some(bytes))
    }

    /// Fsync the journal
    pub fn sync(&self) -> Result<()> {
        if let Some(journal) = self.inner.lock().journal.as_mut() {
            journal.sync()?;
        }
        Ok(())
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().lru.keys_mru_first()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked weight in the policy's unit
    pub fn weight(&self) -> usize {
        self.inner.lock().lru.weight()
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.inner.lock().lru.policy()
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.lock().journal.is_some()
    }

    fn notify(&self, evicted: Vec<String>) {
        for key in evicted {
            tracing::trace!(key = %key, "evicted from cache");
            (self.on_evict)(&key);
        }
    }
}

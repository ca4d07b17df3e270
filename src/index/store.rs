//! Index Store
//!
//! In-memory key → location map made durable by the index log.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::fsutil;
use crate::record;

use super::log::{replay_prefix, IndexLog, IndexTable, ReplayReport};
use super::IndexEntry;

/// Outcome of an index log compaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexCompaction {
    /// Log size before the rewrite
    pub bytes_before: u64,

    /// Log size after the rewrite
    pub bytes_after: u64,

    /// Live keys written to the new log
    pub live_keys: usize,

    /// Bytes appended during the rewrite and carried over
    pub carried_bytes: u64,
}

/// Durable key → IndexEntry map
///
/// ## Concurrency:
/// - `table`: RwLock; lookups take the read lock and never touch disk
/// - `log`: Mutex; every mutation holds it across the log append and the
///   map update, so the log order is the map's mutation order
/// - Compaction rewrites from a private replay and takes `log` only for the
///   final tail copy and handle swap
pub struct IndexStore {
    log_path: PathBuf,
    temp_path: PathBuf,
    sync_strategy: SyncStrategy,

    table: RwLock<IndexTable>,
    log: Mutex<IndexLog>,

    /// Serializes compactions against each other
    compaction: Mutex<()>,
}

impl IndexStore {
    /// Open the index, replaying `log_path` before returning
    ///
    /// A leftover staging file from an interrupted compaction is discarded,
    /// since it was never renamed into place. A torn tail record is cut off.
    pub fn open(
        log_path: &Path,
        temp_path: &Path,
        sync_strategy: SyncStrategy,
    ) -> Result<(Self, ReplayReport)> {
        if fsutil::remove_if_exists(temp_path)? {
            tracing::warn!(path = %temp_path.display(), "discarded interrupted index compaction");
        }

        let (table, report) = if log_path.exists() {
            replay_prefix(log_path, None)?
        } else {
            (IndexTable::new(), ReplayReport::default())
        };

        if report.torn_bytes > 0 {
            tracing::warn!(
                torn_bytes = report.torn_bytes,
                "truncating torn record at index log tail"
            );
            let file = OpenOptions::new().write(true).open(log_path)?;
            file.set_len(report.valid_len)?;
            file.sync_all()?;
        }

        tracing::debug!(
            keys = table.len(),
            records = report.records,
            tombstones = report.tombstones,
            skipped = report.skipped,
            "index replayed"
        );

        let log = IndexLog::open(log_path, sync_strategy)?;

        Ok((
            Self {
                log_path: log_path.to_path_buf(),
                temp_path: temp_path.to_path_buf(),
                sync_strategy,
                table: RwLock::new(table),
                log: Mutex::new(log),
                compaction: Mutex::new(()),
            },
            report,
        ))
    }

    /// Record `key → entry`: log append first, then the map update
    pub fn put(&self, key: &str, entry: IndexEntry) -> Result<()> {
        let mut log = self.log.lock();
        log.append_put(key, &entry)?;
        self.table.write().insert(key.to_string(), entry);
        Ok(())
    }

    /// Replace the entry for `key` only if it still equals `expected`
    ///
    /// Returns false, writing nothing, when the key was overwritten or
    /// removed in the meantime.
    pub fn compare_and_put(&self, key: &str, expected: &IndexEntry, entry: IndexEntry) -> Result<bool> {
        let mut log = self.log.lock();
        if self.table.read().get(key) != Some(expected) {
            return Ok(false);
        }
        log.append_put(key, &entry)?;
        self.table.write().insert(key.to_string(), entry);
        Ok(true)
    }

    /// Remove `key`, logging a tombstone; returns the entry it pointed at
    pub fn remove(&self, key: &str) -> Result<Option<IndexEntry>> {
        let mut log = self.log.lock();
        if !self.table.read().contains_key(key) {
            return Ok(None);
        }
        log.append_tombstone(key)?;
        Ok(self.table.write().remove(key))
    }

    /// Look up the current location of `key`
    pub fn get(&self, key: &str) -> Option<IndexEntry> {
        self.table.read().get(key).cloned()
    }

    /// Every (key, entry) currently pointing into `segment`
    pub fn entries_in(&self, segment: &str) -> Vec<(String, IndexEntry)> {
        self.table
            .read()
            .iter()
            .filter(|(_, entry)| entry.segment == segment)
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Copy of the whole table
    pub fn snapshot(&self) -> IndexTable {
        self.table.read().clone()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Current size of the log file
    pub fn log_len(&self) -> u64 {
        self.log.lock().len()
    }

    /// Fsync the log
    pub fn sync(&self) -> Result<()> {
        self.log.lock().sync()
    }

    /// Rewrite the log so it holds one record per live key
    ///
    /// Steps:
    /// 1. Flush the log and note its length (the snapshot point)
    /// 2. Replay the log up to that point into a private table
    /// 3. Write the table to the staging file
    /// 4. Under the log lock: copy any records appended since the snapshot
    ///    point, then rename the staging file over the log
    /// 5. Swap the writer to the new file
    pub fn compact(&self) -> Result<IndexCompaction> {
        let _running = self.compaction.lock();

        // Step 1: Flush and mark the snapshot point
        let snapshot_end = {
            let mut log = self.log.lock();
            log.sync()?;
            log.len()
        };

        // Step 2: Private replay; lookups and writers proceed meanwhile
        let (table, report) = replay_prefix(&self.log_path, Some(snapshot_end))?;
        if report.tombstones == 0 && report.records as usize == table.len() {
            tracing::debug!(keys = table.len(), "index log has nothing to compact");
            return Ok(IndexCompaction {
                bytes_before: snapshot_end,
                bytes_after: snapshot_end,
                live_keys: table.len(),
                carried_bytes: 0,
            });
        }

        // Step 3: Stage the rewritten log
        let mut staging = BufWriter::new(File::create(&self.temp_path)?);
        for (key, entry) in &table {
            let value = entry.to_bytes()?;
            staging.write_all(&record::encode(key.as_bytes(), &value))?;
        }

        // Steps 4-5: Carry over the tail, swap into place
        let mut log = self.log.lock();
        log.sync()?;
        let log_end = log.len();

        let carried_bytes = log_end - report.valid_len;
        if carried_bytes > 0 {
            let mut old = File::open(&self.log_path)?;
            old.seek(SeekFrom::Start(report.valid_len))?;
            std::io::copy(&mut old.take(carried_bytes), &mut staging)?;
        }

        let staged = staging.into_inner().map_err(|e| e.into_error())?;
        staged.sync_all()?;
        drop(staged);

        fs::rename(&self.temp_path, &self.log_path)?;
        if let Some(dir) = self.log_path.parent() {
            fsutil::sync_dir(dir)?;
        }
        *log = IndexLog::open(&self.log_path, self.sync_strategy)?;

        let result = IndexCompaction {
            bytes_before: log_end,
            bytes_after: log.len(),
            live_keys: table.len(),
            carried_bytes,
        };

        tracing::info!(
            bytes_before = result.bytes_before,
            bytes_after = result.bytes_after,
            live_keys = result.live_keys,
            carried_bytes = result.carried_bytes,
            "index log compacted"
        );

        Ok(result)
    }
}

//! Index Log
//!
//! Append-only durable log of (key, IndexEntry) records, and its replay.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::config::SyncStrategy;
use crate::error::{FormatError, FragError, Result};
use crate::fsutil::SyncTracker;
use crate::record::{self, RecordReader};

use super::IndexEntry;

/// Key → location map rebuilt from the log
pub type IndexTable = HashMap<String, IndexEntry>;

/// Outcome of replaying an index log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Put records applied
    pub records: u64,

    /// Removal records applied
    pub tombstones: u64,

    /// Records ignored because their key or entry could not be decoded
    pub skipped: u64,

    /// Length of the cleanly decodable prefix
    pub valid_len: u64,

    /// Bytes of a partial record after the valid prefix
    pub torn_bytes: u64,
}

/// Writer half of the index log
pub(crate) struct IndexLog {
    file: File,
    /// Bytes known to be fully written
    len: u64,
    sync: SyncTracker,
}

impl IndexLog {
    /// Open (or create) the log for appending
    pub(crate) fn open(path: &Path, strategy: SyncStrategy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            sync: SyncTracker::new(strategy),
        })
    }

    /// Append one put record
    pub(crate) fn append_put(&mut self, key: &str, entry: &IndexEntry) -> Result<()> {
        let value = entry.to_bytes()?;
        self.append(&record::encode(key.as_bytes(), &value))
    }

    /// Append one removal record (empty value)
    pub(crate) fn append_tombstone(&mut self, key: &str) -> Result<()> {
        self.append(&record::encode(key.as_bytes(), &[]))
    }

    fn append(&mut self, encoded: &[u8]) -> Result<()> {
        if let Err(e) = self.file.write_all(encoded) {
            // Cut any partial record so the next append starts on a boundary.
            if let Err(trunc) = self.file.set_len(self.len) {
                tracing::warn!(error = %trunc, "failed to cut partial index log record");
            }
            return Err(e.into());
        }
        self.len += encoded.len() as u64;
        self.sync.record_write(&self.file)?;
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.sync.sync(&self.file)?;
        Ok(())
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }
}

/// Replay a log file into a fresh table; last write for a key wins
pub fn replay(log_path: &Path) -> Result<IndexTable> {
    replay_prefix(log_path, None).map(|(table, _)| table)
}

/// Replay at most the first `limit` bytes of a log file
///
/// A partial record at the end is reported in `torn_bytes`, not treated as
/// an error. A bad magic is an error: past it, record boundaries are lost.
pub fn replay_prefix(log_path: &Path, limit: Option<u64>) -> Result<(IndexTable, ReplayReport)> {
    let file = File::open(log_path)?;
    let file_len = file.metadata()?.len();
    let limit = limit.unwrap_or(file_len).min(file_len);

    let mut table = IndexTable::new();
    let mut report = ReplayReport::default();
    let mut reader = RecordReader::new(BufReader::new(file).take(limit));

    for item in reader.by_ref() {
        let (offset, rec) = match item {
            Ok(item) => item,
            Err(FragError::Format(FormatError::Truncated { .. })) => break,
            Err(e) => return Err(e),
        };

        let Ok(key) = String::from_utf8(rec.key.to_vec()) else {
            tracing::warn!(offset, "skipping index record with non UTF-8 key");
            report.skipped += 1;
            continue;
        };

        if rec.value.is_empty() {
            table.remove(&key);
            report.tombstones += 1;
            continue;
        }

        match IndexEntry::from_bytes(&rec.value) {
            Ok(entry) => {
                table.insert(key, entry);
                report.records += 1;
            }
            Err(e) => {
                tracing::warn!(offset, key = %key, error = %e, "skipping undecodable index entry");
                report.skipped += 1;
            }
        }
    }

    report.valid_len = reader.offset();
    report.torn_bytes = limit - report.valid_len;
    Ok((table, report))
}

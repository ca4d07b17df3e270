//! Segment Writer
//!
//! An open, appendable segment file.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::fsutil::SyncTracker;
use crate::record::{is_torn_tail, RecordReader};

use super::new_segment_name;

/// Appends records to one segment file
pub(crate) struct SegmentWriter {
    name: String,
    file: File,
    /// Current end-of-file offset
    size: u64,
    sync: SyncTracker,
}

impl SegmentWriter {
    /// Create a brand new segment in `dir`
    pub(crate) fn create(dir: &Path, strategy: SyncStrategy) -> Result<Self> {
        let name = new_segment_name();
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(dir.join(&name))?;

        tracing::debug!(segment = %name, "created segment");

        Ok(Self {
            name,
            file,
            size: 0,
            sync: SyncTracker::new(strategy),
        })
    }

    /// Reopen an existing segment for appending
    ///
    /// A torn record left at the tail by a crash is cut off first, so new
    /// appends start on a record boundary. Any other read failure leaves the
    /// file untouched and returns `None`; the segment then stays read-only.
    pub(crate) fn reopen(dir: &Path, name: &str, strategy: SyncStrategy) -> Result<Option<Self>> {
        let path = dir.join(name);
        let file_len = std::fs::metadata(&path)?.len();

        let mut reader = RecordReader::new(BufReader::new(File::open(&path)?));
        while let Some(item) = reader.next() {
            match item {
                Ok(_) => {}
                Err(e) if is_torn_tail(&e) => break,
                Err(e) => {
                    tracing::warn!(
                        segment = %name,
                        offset = reader.offset(),
                        error = %e,
                        "segment is unreadable, leaving it closed"
                    );
                    return Ok(None);
                }
            }
        }
        let valid_len = reader.offset();

        let file = OpenOptions::new().append(true).open(&path)?;
        if valid_len < file_len {
            tracing::warn!(
                segment = %name,
                dropped = file_len - valid_len,
                "truncating torn segment tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        tracing::debug!(segment = %name, size = valid_len, "reopened segment for writing");

        Ok(Some(Self {
            name: name.to_string(),
            file,
            size: valid_len,
            sync: SyncTracker::new(strategy),
        }))
    }

    /// Append an encoded record, returning the offset it was written at
    pub(crate) fn append(&mut self, record: &[u8]) -> Result<u64> {
        let offset = self.size;
        self.file.write_all(record)?;
        self.size += record.len() as u64;
        self.sync.record_write(&self.file)?;
        Ok(offset)
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.sync.sync(&self.file)?;
        Ok(())
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }
}

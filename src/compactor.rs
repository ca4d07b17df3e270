//! Segment Compactor
//!
//! Reclaims disk space held by overwritten and removed records.
//!
//! ## Algorithm
//! For every closed segment that is at least `max_segment_size` bytes and
//! older than the configured lifetime:
//! 1. Scan its records in order
//! 2. A record is live when the index still points at its exact value
//!    offset; live records are rewritten into the writable segment and the
//!    index is moved to the copy (compare-and-put, so a concurrent overwrite
//!    wins)
//! 3. Anything else is dead and dropped
//! 4. If the scan reached the end, relocate any entry a racing `set` pointed
//!    into the segment meanwhile, then delete the file
//!
//! A torn record at the tail is skipped and ends the scan. A bad magic or an
//! I/O error keeps the file for a later attempt.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::index::{IndexEntry, IndexStore};
use crate::record::{is_torn_tail, HEADER_SIZE};
use crate::segment::{SegmentInfo, SegmentStore};

/// Counters for one compaction run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Segments that met the age and size thresholds
    pub segments_scanned: u64,

    /// Segments deleted after a complete scan
    pub segments_deleted: u64,

    /// Segments left in place after a fatal scan error
    pub segments_kept: u64,

    /// Live records copied to the writable segment
    pub records_relocated: u64,

    /// Dead records dropped
    pub records_dropped: u64,

    /// Records that could not be decoded and were passed over
    pub records_skipped: u64,

    /// Bytes freed by deleted segments
    pub bytes_reclaimed: u64,
}

/// Garbage collector over closed segments
pub struct Compactor {
    segments: Arc<SegmentStore>,
    index: Arc<IndexStore>,

    /// Minimum segment age before reclamation
    lifetime: Duration,

    /// Held shared by every `set` across its segment write and index put;
    /// taken exclusively before a segment is deleted
    reclaim_guard: Arc<RwLock<()>>,

    /// Serializes runs against each other
    running: Mutex<()>,
}

impl Compactor {
    pub fn new(
        segments: Arc<SegmentStore>,
        index: Arc<IndexStore>,
        lifetime: Duration,
        reclaim_guard: Arc<RwLock<()>>,
    ) -> Self {
        Self {
            segments,
            index,
            lifetime,
            reclaim_guard,
            running: Mutex::new(()),
        }
    }

    /// Run one pass over every eligible segment
    pub fn run(&self) -> Result<CompactionStats> {
        let _running = self.running.lock();
        let mut stats = CompactionStats::default();
        let max_size = self.segments.max_segment_size();

        let candidates: Vec<SegmentInfo> = self
            .segments
            .segments()?
            .into_iter()
            .filter(|s| !s.writable && s.size >= max_size && s.age() >= self.lifetime)
            .collect();

        for segment in candidates {
            stats.segments_scanned += 1;
            match self.compact_segment(&segment, &mut stats) {
                Ok(true) => {
                    stats.segments_deleted += 1;
                    stats.bytes_reclaimed += segment.size;
                }
                Ok(false) => stats.segments_kept += 1,
                Err(e) => {
                    tracing::warn!(segment = %segment.name, error = %e, "segment compaction failed");
                    stats.segments_kept += 1;
                }
            }
        }

        if stats.segments_scanned > 0 {
            tracing::info!(
                scanned = stats.segments_scanned,
                deleted = stats.segments_deleted,
                kept = stats.segments_kept,
                relocated = stats.records_relocated,
                dropped = stats.records_dropped,
                skipped = stats.records_skipped,
                bytes_reclaimed = stats.bytes_reclaimed,
                "segment compaction finished"
            );
        }

        Ok(stats)
    }

    /// Relocate the live records of one segment, then delete it.
    /// Returns false when the segment was kept.
    fn compact_segment(&self, segment: &SegmentInfo, stats: &mut CompactionStats) -> Result<bool> {
        for item in self.segments.scan(&segment.name)? {
            let (offset, record) = match item {
                Ok(item) => item,
                Err(e) if is_torn_tail(&e) => {
                    tracing::warn!(segment = %segment.name, error = %e, "skipping torn record at segment tail");
                    stats.records_skipped += 1;
                    break;
                }
                Err(e) => {
                    tracing::warn!(segment = %segment.name, error = %e, "segment scan aborted, keeping file");
                    return Ok(false);
                }
            };

            let Ok(key) = std::str::from_utf8(&record.key) else {
                tracing::warn!(segment = %segment.name, offset, "skipping record with non UTF-8 key");
                stats.records_skipped += 1;
                continue;
            };

            let value_offset = offset + (HEADER_SIZE + key.len()) as u64;
            match self.index.get(key) {
                Some(current)
                    if current.segment == segment.name
                        && current.value_offset == value_offset
                        && current.value_length as usize == record.value.len() =>
                {
                    if self.relocate(key, &current, &record.value)? {
                        stats.records_relocated += 1;
                    } else {
                        stats.records_dropped += 1;
                    }
                }
                _ => stats.records_dropped += 1,
            }
        }

        // No set may point into the segment between this sweep and the delete.
        let _exclusive = self.reclaim_guard.write();
        for (key, entry) in self.index.entries_in(&segment.name) {
            let value = self.segments.read(&entry)?;
            if self.relocate(&key, &entry, &value)? {
                stats.records_relocated += 1;
            }
        }

        self.segments.retire(&segment.name)?;
        Ok(true)
    }

    /// Copy a live value into the writable segment and repoint the index.
    /// False when the key changed underneath us; the copy is then garbage.
    fn relocate(&self, key: &str, current: &IndexEntry, value: &Bytes) -> Result<bool> {
        let moved = self.segments.write(key.as_bytes(), value)?;
        self.index.compare_and_put(key, current, moved)
    }
}

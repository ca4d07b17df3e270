//! Segment Store
//!
//! Owns the segments directory: the writable segment(s), rotation, and a
//! pool of read handles for closed and open segments alike.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::config::{SyncStrategy, WriterMode};
use crate::error::{FragError, Result};
use crate::fsutil;
use crate::index::IndexEntry;
use crate::record::{self, RecordReader, HEADER_SIZE};

use super::writer::SegmentWriter;
use super::{is_segment_name, SegmentInfo};

/// Writer discipline state
enum Writers {
    /// Exactly one active segment; check-then-write under one lock
    Single(Mutex<Option<SegmentWriter>>),

    /// Idle writable segments, checked out one per concurrent write
    Pooled {
        idle: Mutex<Vec<SegmentWriter>>,
        max_idle: usize,
    },
}

/// Manages append-only segment files
///
/// ## Concurrency:
/// - Writes: serialized behind the active-segment lock (single-writer), or
///   spread across checked-out pool members (pooled)
/// - Reads: positional reads through shared `Arc<File>` handles; they never
///   take a writer lock and never share a cursor
pub struct SegmentStore {
    /// Directory where segments live
    dir: PathBuf,

    /// Rotation threshold
    max_segment_size: u64,

    sync_strategy: SyncStrategy,

    writers: Writers,

    /// Names of every segment currently open for appends
    writable: Mutex<HashSet<String>>,

    /// Cached read handles by segment name
    readers: RwLock<HashMap<String, Arc<File>>>,
}

impl SegmentStore {
    /// Open or create the segments directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover existing segments (oldest → newest)
    /// 3. Treat every segment at/over the size limit as closed
    /// 4. Reopen the newest segment(s) under the limit for appending,
    ///    skipping any that cannot be scanned to the end
    pub fn open(
        dir: &Path,
        max_segment_size: u64,
        mode: WriterMode,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut open_candidates: Vec<String> = Self::list(dir)?
            .into_iter()
            .filter(|(_, size)| *size < max_segment_size)
            .map(|(name, _)| name)
            .collect();

        let mut writable = HashSet::new();
        let writers = match mode {
            WriterMode::SingleWriter => {
                let mut active = None;
                if let Some(name) = open_candidates.pop() {
                    active = SegmentWriter::reopen(dir, &name, sync_strategy)?;
                    if active.is_some() {
                        writable.insert(name);
                    }
                }
                Writers::Single(Mutex::new(active))
            }
            WriterMode::Pooled { max_idle } => {
                let mut idle = Vec::new();
                while idle.len() < max_idle {
                    let Some(name) = open_candidates.pop() else {
                        break;
                    };
                    if let Some(writer) = SegmentWriter::reopen(dir, &name, sync_strategy)? {
                        idle.push(writer);
                        writable.insert(name);
                    }
                }
                Writers::Pooled {
                    idle: Mutex::new(idle),
                    max_idle,
                }
            }
        };

        tracing::debug!(
            dir = %dir.display(),
            writable = writable.len(),
            "segment store opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            max_segment_size,
            sync_strategy,
            writers,
            writable: Mutex::new(writable),
            readers: RwLock::new(HashMap::new()),
        })
    }

    /// Append a (key, value) record and return the location of its value
    ///
    /// A writer whose append fails is abandoned, so a torn tail never shifts
    /// the offsets of later records.
    pub fn write(&self, key: &[u8], value: &[u8]) -> Result<IndexEntry> {
        let encoded = record::encode(key, value);

        let (segment, offset) = match &self.writers {
            Writers::Single(active) => {
                let mut active = active.lock();

                let full = active
                    .as_ref()
                    .map_or(true, |w| w.size() >= self.max_segment_size);
                if full {
                    if let Some(old) = active.take() {
                        self.close_writer(old);
                    }
                    *active = Some(self.create_writer()?);
                }

                let Some(writer) = active.as_mut() else {
                    return Err(FragError::Storage("no active segment".into()));
                };
                match writer.append(&encoded) {
                    Ok(offset) => (writer.name().to_string(), offset),
                    Err(e) => {
                        if let Some(broken) = active.take() {
                            self.close_writer(broken);
                        }
                        return Err(e);
                    }
                }
            }
            Writers::Pooled { .. } => {
                let mut writer = self.checkout()?;
                match writer.append(&encoded) {
                    Ok(offset) => {
                        let name = writer.name().to_string();
                        self.checkin(writer);
                        (name, offset)
                    }
                    Err(e) => {
                        self.close_writer(writer);
                        return Err(e);
                    }
                }
            }
        };

        Ok(IndexEntry {
            segment,
            value_offset: offset + (HEADER_SIZE + key.len()) as u64,
            value_length: value.len() as u32,
        })
    }

    /// Read exactly the value bytes `entry` points at
    pub fn read(&self, entry: &IndexEntry) -> Result<Bytes> {
        let file = self.reader(&entry.segment)?;
        let mut buf = vec![0u8; entry.value_length as usize];
        fsutil::read_exact_at(&file, &mut buf, entry.value_offset)?;
        Ok(Bytes::from(buf))
    }

    /// Sequentially scan every record of a segment
    pub fn scan(&self, name: &str) -> Result<RecordReader<BufReader<File>>> {
        let file = File::open(self.dir.join(name))?;
        Ok(RecordReader::new(BufReader::new(file)))
    }

    /// All segments on disk, oldest first
    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        let writable = self.writable.lock().clone();
        let mut infos = Vec::new();

        for (name, _) in Self::list(&self.dir)? {
            let path = self.dir.join(&name);
            // A segment retired concurrently simply drops out of the listing.
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            infos.push(SegmentInfo {
                writable: writable.contains(&name),
                name,
                path,
                size: meta.len(),
                modified: meta.modified()?,
            });
        }

        Ok(infos)
    }

    /// Whether a segment is currently open for appends
    pub fn is_writable(&self, name: &str) -> bool {
        self.writable.lock().contains(name)
    }

    /// Delete a closed segment and drop its cached read handle
    pub fn retire(&self, name: &str) -> Result<()> {
        if self.is_writable(name) {
            return Err(FragError::Storage(format!(
                "refusing to retire writable segment {}",
                name
            )));
        }

        self.readers.write().remove(name);
        fsutil::remove_if_exists(&self.dir.join(name))?;
        tracing::debug!(segment = %name, "retired segment");
        Ok(())
    }

    /// Fsync every writable segment
    pub fn sync(&self) -> Result<()> {
        match &self.writers {
            Writers::Single(active) => {
                if let Some(writer) = active.lock().as_mut() {
                    writer.sync()?;
                }
            }
            Writers::Pooled { idle, .. } => {
                for writer in idle.lock().iter_mut() {
                    writer.sync()?;
                }
            }
        }
        Ok(())
    }

    /// Get the segments directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the rotation threshold
    pub fn max_segment_size(&self) -> u64 {
        self.max_segment_size
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// (name, size) of every segment file in `dir`, sorted by name
    fn list(dir: &Path) -> Result<Vec<(String, u64)>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_segment_name(&name) {
                segments.push((name, meta.len()));
            }
        }
        segments.sort();
        Ok(segments)
    }

    fn create_writer(&self) -> Result<SegmentWriter> {
        let writer = SegmentWriter::create(&self.dir, self.sync_strategy)?;
        self.writable.lock().insert(writer.name().to_string());
        Ok(writer)
    }

    fn close_writer(&self, mut writer: SegmentWriter) {
        if let Err(e) = writer.sync() {
            tracing::warn!(segment = %writer.name(), error = %e, "failed to sync closed segment");
        }
        tracing::debug!(segment = %writer.name(), size = writer.size(), "closed segment");
        self.writable.lock().remove(writer.name());
    }

    /// Take an idle writer that still has room, or create a new one
    fn checkout(&self) -> Result<SegmentWriter> {
        if let Writers::Pooled { idle, .. } = &self.writers {
            loop {
                let Some(writer) = idle.lock().pop() else {
                    break;
                };
                if writer.size() < self.max_segment_size {
                    return Ok(writer);
                }
                self.close_writer(writer);
            }
        }
        self.create_writer()
    }

    /// Return a writer to the idle pool, closing it when full or surplus
    fn checkin(&self, writer: SegmentWriter) {
        if let Writers::Pooled { idle, max_idle } = &self.writers {
            if writer.size() < self.max_segment_size {
                let mut idle = idle.lock();
                if idle.len() < *max_idle {
                    idle.push(writer);
                    return;
                }
            }
        }
        self.close_writer(writer);
    }

    fn reader(&self, name: &str) -> Result<Arc<File>> {
        if let Some(file) = self.readers.read().get(name) {
            return Ok(Arc::clone(file));
        }

        let file = Arc::new(File::open(self.dir.join(name))?);
        let mut readers = self.readers.write();
        Ok(Arc::clone(readers.entry(name.to_string()).or_insert(file)))
    }
}

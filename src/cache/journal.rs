//! Cache journal
//!
//! The `rdb` file: a snapshot of the cache written least-recent first,
//! followed by every mutation appended since that snapshot.
//!
//! Each record's value starts with an op byte:
//! ```text
//! 0x00  remove   (no payload)
//! 0x01  put      payload = cached value
//! 0x02  touch    key-only entry, no payload
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::SyncStrategy;
use crate::error::{FormatError, FragError, Result};
use crate::fsutil::{self, SyncTracker};
use crate::record::{self, RecordReader};

const OP_REMOVE: u8 = 0x00;
const OP_PUT: u8 = 0x01;
const OP_TOUCH: u8 = 0x02;

/// A mutation recovered from the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JournalOp {
    Put { key: String, value: Bytes },
    Touch { key: String },
    Remove { key: String },
}

/// Append handle on the `rdb` file
pub(crate) struct Journal {
    path: PathBuf,
    temp_path: PathBuf,
    file: File,
    len: u64,
    strategy: SyncStrategy,
    sync: SyncTracker,
}

impl Journal {
    /// Open the journal, returning the mutations it holds in file order
    pub(crate) fn open(path: &Path, strategy: SyncStrategy) -> Result<(Self, Vec<JournalOp>)> {
        let temp_path = path.with_extension("tmp");
        if fsutil::remove_if_exists(&temp_path)? {
            tracing::warn!(path = %temp_path.display(), "discarded interrupted cache snapshot");
        }

        let ops = if path.exists() {
            Self::replay(path)?
        } else {
            Vec::new()
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok((
            Self {
                path: path.to_path_buf(),
                temp_path,
                file,
                len,
                strategy,
                sync: SyncTracker::new(strategy),
            },
            ops,
        ))
    }

    fn replay(path: &Path) -> Result<Vec<JournalOp>> {
        let mut reader = RecordReader::new(BufReader::new(File::open(path)?));
        let mut ops = Vec::new();

        for item in reader.by_ref() {
            let (offset, rec) = match item {
                Ok(item) => item,
                Err(FragError::Format(FormatError::Truncated { .. })) => break,
                Err(e) => return Err(e),
            };
            match decode_op(&rec.key, rec.value) {
                Some(op) => ops.push(op),
                None => tracing::warn!(offset, "skipping malformed cache journal record"),
            }
        }

        let valid_len = reader.offset();
        let file_len = fs::metadata(path)?.len();
        if valid_len < file_len {
            tracing::warn!(torn_bytes = file_len - valid_len, "truncating torn cache journal tail");
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        tracing::debug!(ops = ops.len(), "cache journal replayed");
        Ok(ops)
    }

    pub(crate) fn append_put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.append(key, OP_PUT, value)
    }

    pub(crate) fn append_touch(&mut self, key: &str) -> Result<()> {
        self.append(key, OP_TOUCH, &[])
    }

    pub(crate) fn append_remove(&mut self, key: &str) -> Result<()> {
        self.append(key, OP_REMOVE, &[])
    }

    fn append(&mut self, key: &str, op: u8, payload: &[u8]) -> Result<()> {
        let encoded = encode_op(key, op, payload);
        if let Err(e) = self.file.write_all(&encoded) {
            if let Err(trunc) = self.file.set_len(self.len) {
                tracing::warn!(error = %trunc, "failed to cut partial cache journal record");
            }
            return Err(e.into());
        }
        self.len += encoded.len() as u64;
        self.sync.record_write(&self.file)?;
        Ok(())
    }

    /// Replace the file with `entries` (least-recent first) and reset the
    /// append handle onto it
    pub(crate) fn rewrite(&mut self, entries: &[(String, Option<Bytes>)]) -> Result<u64> {
        let mut staging = BufWriter::new(File::create(&self.temp_path)?);
        for (key, value) in entries {
            let encoded = match value {
                Some(value) => encode_op(key, OP_PUT, value),
                None => encode_op(key, OP_TOUCH, &[]),
            };
            staging.write_all(&encoded)?;
        }
        let staged = staging.into_inner().map_err(|e| e.into_error())?;
        staged.sync_all()?;
        drop(staged);

        fs::rename(&self.temp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            fsutil::sync_dir(dir)?;
        }

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.len = self.file.metadata()?.len();
        self.sync = SyncTracker::new(self.strategy);
        Ok(self.len)
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.sync.sync(&self.file)?;
        Ok(())
    }
}

fn encode_op(key: &str, op: u8, payload: &[u8]) -> Bytes {
    let mut value = BytesMut::with_capacity(1 + payload.len());
    value.put_u8(op);
    value.put_slice(payload);
    record::encode(key.as_bytes(), &value)
}

fn decode_op(key: &[u8], mut value: Bytes) -> Option<JournalOp> {
    let key = String::from_utf8(key.to_vec()).ok()?;
    if value.is_empty() {
        return None;
    }
    let op = value.split_to(1)[0];
    match op {
        OP_PUT => Some(JournalOp::Put { key, value }),
        OP_TOUCH => Some(JournalOp::Touch { key }),
        OP_REMOVE => Some(JournalOp::Remove { key }),
        _ => None,
    }
}

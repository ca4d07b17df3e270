//! Filesystem helpers shared by the segment, index and cache writers.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use crate::config::SyncStrategy;

/// Counts writes against a `SyncStrategy` and fsyncs when due
#[derive(Debug)]
pub(crate) struct SyncTracker {
    strategy: SyncStrategy,
    unsynced: usize,
}

impl SyncTracker {
    pub(crate) fn new(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            unsynced: 0,
        }
    }

    /// Record one write to `file`, syncing it if the strategy says so
    pub(crate) fn record_write(&mut self, file: &File) -> io::Result<()> {
        self.unsynced += 1;
        let due = match self.strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNWrites { count } => self.unsynced >= count,
            SyncStrategy::OsManaged => false,
        };
        if due {
            self.sync(file)?;
        }
        Ok(())
    }

    /// Force an fsync of everything written so far
    pub(crate) fn sync(&mut self, file: &File) -> io::Result<()> {
        if self.unsynced > 0 {
            file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }
}

/// Fill `buf` from `file` starting at `offset` without touching a shared cursor
#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Persist a rename by syncing the parent directory (no-op off unix)
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

/// Remove `path` if it exists; true when something was removed
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

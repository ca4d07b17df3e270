//! Segment Module
//!
//! Append-only content storage partitioned into size-bounded files.
//!
//! ## Responsibilities
//! - Append encoded records to the writable segment(s)
//! - Rotate a segment once it reaches the configured size
//! - Positional reads of a value by (segment, offset, length)
//! - Recover writable segments on startup
//!
//! ## Layout
//! ```text
//! segments/
//!   ├── 1718000000000-3fa2b9c1.seg   (closed: size ≥ max)
//!   ├── 1718000051234-9c0e77d2.seg   (closed)
//!   └── 1718000099871-07b1e4aa.seg   (active)
//! ```
//! File names are a zero-padded unix-millis prefix plus a random suffix, so
//! lexical order is creation order.

mod store;
mod writer;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

pub use store::SegmentStore;

/// Extension carried by every segment file
pub const SEGMENT_EXT: &str = "seg";

/// A segment file as seen on disk
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Currently open for appends (never a compaction candidate)
    pub writable: bool,
}

impl SegmentInfo {
    /// Time since the last modification (zero if the clock went backwards)
    pub fn age(&self) -> std::time::Duration {
        SystemTime::now()
            .duration_since(self.modified)
            .unwrap_or_default()
    }
}

/// Time-based prefix + random suffix
pub(crate) fn new_segment_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{:013}-{}.{}", millis, &suffix[..8], SEGMENT_EXT)
}

pub(crate) fn is_segment_name(name: &str) -> bool {
    name.strip_suffix(SEGMENT_EXT)
        .map_or(false, |stem| stem.ends_with('.'))
}

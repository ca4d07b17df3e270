//! Index entry definitions

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Location of a value's bytes on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Segment file name, relative to the segments directory
    pub segment: String,

    /// Absolute offset of the first value byte within the segment
    pub value_offset: u64,

    /// Number of value bytes
    pub value_length: u32,
}

impl IndexEntry {
    /// Serialize for the value half of an index log record
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

//! Record Module
//!
//! The binary record format shared by content segments, the index log and
//! the cache snapshot.
//!
//! ## Record Format
//! ```text
//! ┌───────────┬─────────────┬───────────────┬───────────┬─────────────┐
//! │ Magic (2) │ KeyLen (4)  │ ValueLen (4)  │ Key       │ Value       │
//! │  0xF96E   │  u32 BE     │  u32 BE       │ KeyLen B  │ ValueLen B  │
//! └───────────┴─────────────┴───────────────┴───────────┴─────────────┘
//! ```
//!
//! All integers are big-endian and there is no padding. A record occupies
//! `10 + KeyLen + ValueLen` bytes and its value starts at `10 + KeyLen`.

mod reader;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use crate::error::FormatError;
pub use reader::RecordReader;
pub(crate) use reader::is_torn_tail;

/// Magic number opening every record
pub const MAGIC: u16 = 0xF96E;

/// Header size: Magic (2) + KeyLen (4) + ValueLen (4) = 10 bytes
pub const HEADER_SIZE: usize = 10;

/// A decoded (key, value) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

/// Fixed-size prefix of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key_len: u32,
    pub value_len: u32,
}

impl RecordHeader {
    /// Parse and validate the first `HEADER_SIZE` bytes of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let mut header = &buf[..HEADER_SIZE];
        let magic = header.get_u16();
        if magic != MAGIC {
            return Err(FormatError::BadMagic { found: magic });
        }

        Ok(Self {
            key_len: header.get_u32(),
            value_len: header.get_u32(),
        })
    }

    /// Bytes following the header
    pub fn body_len(&self) -> u64 {
        self.key_len as u64 + self.value_len as u64
    }

    /// Total encoded size of the record
    pub fn record_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.body_len()
    }

    /// Offset of the value relative to the start of the record
    pub fn value_offset(&self) -> u64 {
        HEADER_SIZE as u64 + self.key_len as u64
    }
}

/// Encoded size of a (key, value) record
pub fn encoded_len(key: &[u8], value: &[u8]) -> usize {
    HEADER_SIZE + key.len() + value.len()
}

/// Encode a record. Keys and values are limited to `u32::MAX` bytes each.
pub fn encode(key: &[u8], value: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(key, value));
    buf.put_u16(MAGIC);
    buf.put_u32(key.len() as u32);
    buf.put_u32(value.len() as u32);
    buf.put_slice(key);
    buf.put_slice(value);
    buf.freeze()
}

/// Decode the record at the start of `buf`
///
/// Trailing bytes beyond the record are ignored.
pub fn decode(buf: &[u8]) -> Result<Record, FormatError> {
    let header = RecordHeader::parse(buf)?;

    let total = header.record_len();
    if (buf.len() as u64) < total {
        return Err(FormatError::Truncated {
            needed: total as usize,
            available: buf.len(),
        });
    }

    let key_end = HEADER_SIZE + header.key_len as usize;
    let value_end = key_end + header.value_len as usize;

    Ok(Record {
        key: Bytes::copy_from_slice(&buf[HEADER_SIZE..key_end]),
        value: Bytes::copy_from_slice(&buf[key_end..value_end]),
    })
}

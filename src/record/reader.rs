//! Record Reader
//!
//! Sequential iteration over a stream of encoded records.

use std::io::{self, Read};

use bytes::Bytes;

use crate::error::{FormatError, FragError, Result};

use super::{Record, RecordHeader, HEADER_SIZE};

/// Iterator over the records of a log or segment file
///
/// Yields `(offset, record)` where `offset` is the position of the record's
/// first byte. Iteration ends cleanly at EOF on a record boundary. A partial
/// record at the tail yields `FormatError::Truncated`; a bad magic yields
/// `FormatError::BadMagic`. Both are terminal, since record boundaries can no
/// longer be trusted.
pub struct RecordReader<R: Read> {
    inner: R,
    /// End of the last complete record
    offset: u64,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_offset(inner, 0)
    }

    /// Start at `offset`, for a reader already positioned mid-file
    pub fn with_offset(inner: R, offset: u64) -> Self {
        Self {
            inner,
            offset,
            done: false,
        }
    }

    /// Length of the valid prefix read so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read until `buf` is full or EOF, returning the number of bytes read
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn read_record(&mut self) -> Result<Option<(u64, Record)>> {
        let mut header_buf = [0u8; HEADER_SIZE];
        let n = self.read_full(&mut header_buf)?;
        if n == 0 {
            return Ok(None);
        }

        let header = RecordHeader::parse(&header_buf[..n])?;

        // Bounded by the bytes actually present, so a corrupt length can't
        // trigger a huge allocation.
        let body_len = header.body_len();
        let mut body = Vec::new();
        (&mut self.inner).take(body_len).read_to_end(&mut body)?;
        if (body.len() as u64) < body_len {
            return Err(FormatError::Truncated {
                needed: header.record_len() as usize,
                available: HEADER_SIZE + body.len(),
            }
            .into());
        }

        let mut body = Bytes::from(body);
        let key = body.split_to(header.key_len as usize);
        let start = self.offset;
        self.offset += header.record_len();

        Ok(Some((start, Record { key, value: body })))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<(u64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// True for the error a torn tail write produces
pub(crate) fn is_torn_tail(err: &FragError) -> bool {
    matches!(err, FragError::Format(FormatError::Truncated { .. }))
}

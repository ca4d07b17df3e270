//! Tests for the record codec
//!
//! These tests verify:
//! - Exact byte layout of encoded records
//! - Round-trips including empty keys and values
//! - BadMagic / Truncated detection
//! - Streaming reads over a concatenation of records

use std::io::Cursor;

use fragstore::record::{self, FormatError, RecordReader, HEADER_SIZE, MAGIC};
use fragstore::FragError;
use proptest::prelude::*;

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_encode_foo_bar_layout() {
    let encoded = record::encode(b"foo", b"bar");

    assert_eq!(encoded.len(), 16);
    assert_eq!(&encoded[0..2], &[0xF9, 0x6E]);
    assert_eq!(&encoded[2..6], &3u32.to_be_bytes());
    assert_eq!(&encoded[6..10], &3u32.to_be_bytes());
    assert_eq!(&encoded[10..13], b"foo");
    assert_eq!(&encoded[13..16], b"bar");
}

#[test]
fn test_decode_foo_bar() {
    let rec = record::decode(&record::encode(b"foo", b"bar")).unwrap();

    assert_eq!(&rec.key[..], b"foo");
    assert_eq!(&rec.value[..], b"bar");
}

#[test]
fn test_empty_key_and_value() {
    let encoded = record::encode(b"", b"");
    assert_eq!(encoded.len(), HEADER_SIZE);

    let rec = record::decode(&encoded).unwrap();
    assert!(rec.key.is_empty());
    assert!(rec.value.is_empty());
}

#[test]
fn test_value_starts_after_key() {
    let encoded = record::encode(b"key", b"value");
    let value_start = HEADER_SIZE + 3;

    assert_eq!(&encoded[value_start..], b"value");
}

#[test]
fn test_decode_ignores_trailing_bytes() {
    let mut buf = record::encode(b"a", b"b").to_vec();
    buf.extend_from_slice(b"garbage");

    let rec = record::decode(&buf).unwrap();
    assert_eq!(&rec.value[..], b"b");
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_decode_bad_magic() {
    let mut buf = record::encode(b"foo", b"bar").to_vec();
    buf[0] = 0x00;

    let err = record::decode(&buf).unwrap_err();
    assert_eq!(err, FormatError::BadMagic { found: 0x006E });
}

#[test]
fn test_decode_truncated_body() {
    let buf = record::encode(b"foo", b"bar");

    let err = record::decode(&buf[..15]).unwrap_err();
    assert_eq!(
        err,
        FormatError::Truncated {
            needed: 16,
            available: 15
        }
    );
}

#[test]
fn test_decode_truncated_header() {
    let err = record::decode(&MAGIC.to_be_bytes()).unwrap_err();
    assert!(matches!(err, FormatError::Truncated { needed: 10, .. }));
}

#[test]
fn test_format_error_converts_to_frag_error() {
    let err: FragError = FormatError::BadMagic { found: 1 }.into();
    assert!(matches!(err, FragError::Format(FormatError::BadMagic { found: 1 })));
}

// =============================================================================
// Streaming Tests
// =============================================================================

#[test]
fn test_reader_reports_offsets() {
    let mut buf = Vec::new();
    let records: [(&[u8], &[u8]); 3] = [(b"k1", b"v1"), (b"key2", b""), (b"", b"value3")];
    for (k, v) in records {
        buf.extend_from_slice(&record::encode(k, v));
    }

    let items: Vec<_> = RecordReader::new(Cursor::new(buf))
        .map(|item| item.unwrap())
        .collect();

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].0, 0);
    assert_eq!(items[1].0, 14);
    assert_eq!(items[2].0, 28);
    assert_eq!(&items[2].1.value[..], b"value3");
}

#[test]
fn test_reader_stops_at_bad_magic() {
    let mut buf = record::encode(b"a", b"1").to_vec();
    buf.extend_from_slice(&[0u8; 12]);
    buf.extend_from_slice(&record::encode(b"b", b"2"));

    let mut reader = RecordReader::new(Cursor::new(buf));
    assert!(reader.next().unwrap().is_ok());
    assert!(matches!(
        reader.next().unwrap(),
        Err(FragError::Format(FormatError::BadMagic { found: 0 }))
    ));
    assert!(reader.next().is_none());
    assert_eq!(reader.offset(), 12);
}

#[test]
fn test_reader_empty_input() {
    let mut reader = RecordReader::new(Cursor::new(Vec::<u8>::new()));
    assert!(reader.next().is_none());
    assert_eq!(reader.offset(), 0);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_round_trip(key in proptest::collection::vec(any::<u8>(), 0..64),
                       value in proptest::collection::vec(any::<u8>(), 0..512)) {
        let encoded = record::encode(&key, &value);
        prop_assert_eq!(encoded.len(), HEADER_SIZE + key.len() + value.len());

        let rec = record::decode(&encoded).unwrap();
        prop_assert_eq!(&rec.key[..], &key[..]);
        prop_assert_eq!(&rec.value[..], &value[..]);
    }
}

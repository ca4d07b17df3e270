//! Tests for the segment store
//!
//! These tests verify:
//! - Read-after-write through the returned IndexEntry
//! - Rotation once a segment reaches the size limit
//! - Recovery of the writable segment after a restart
//! - Pooled writer discipline
//! - Retiring closed segments

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::thread;

use fragstore::config::{SyncStrategy, WriterMode};
use fragstore::record;
use fragstore::segment::SegmentStore;
use fragstore::FragError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_store(dir: &TempDir, max_segment_size: u64) -> SegmentStore {
    SegmentStore::open(
        &dir.path().join("segments"),
        max_segment_size,
        WriterMode::SingleWriter,
        SyncStrategy::OsManaged,
    )
    .unwrap()
}

fn open_pooled(dir: &TempDir, max_segment_size: u64, max_idle: usize) -> SegmentStore {
    SegmentStore::open(
        &dir.path().join("segments"),
        max_segment_size,
        WriterMode::Pooled { max_idle },
        SyncStrategy::OsManaged,
    )
    .unwrap()
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_open_creates_directory() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 1024);

    assert!(store.dir().is_dir());
    assert!(store.segments().unwrap().is_empty());
}

#[test]
fn test_read_after_write() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 1024 * 1024);

    let entry = store.write(b"foo", b"bar").unwrap();

    assert_eq!(entry.value_offset, 13);
    assert_eq!(entry.value_length, 3);
    assert_eq!(&store.read(&entry).unwrap()[..], b"bar");
}

#[test]
fn test_empty_value() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 1024);

    let entry = store.write(b"empty", b"").unwrap();

    assert_eq!(entry.value_length, 0);
    assert!(store.read(&entry).unwrap().is_empty());
}

#[test]
fn test_consecutive_writes_share_segment() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 1024 * 1024);

    let first = store.write(b"a", b"1").unwrap();
    let second = store.write(b"b", b"22").unwrap();

    assert_eq!(first.segment, second.segment);
    assert_eq!(second.value_offset, 12 + 11);
    assert_eq!(&store.read(&first).unwrap()[..], b"1");
    assert_eq!(&store.read(&second).unwrap()[..], b"22");
}

#[test]
fn test_scan_yields_every_record() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 1024 * 1024);

    let entry = store.write(b"k1", b"v1").unwrap();
    store.write(b"k2", b"v2").unwrap();

    let records: Vec<_> = store
        .scan(&entry.segment)
        .unwrap()
        .map(|item| item.unwrap().1)
        .collect();

    assert_eq!(records.len(), 2);
    assert_eq!(&records[1].key[..], b"k2");
    assert_eq!(&records[1].value[..], b"v2");
}

// =============================================================================
// Rotation
// =============================================================================

#[test]
fn test_rotation_bounds_segment_size() {
    let dir = TempDir::new().unwrap();
    let max = 1000u64;
    let store = open_store(&dir, max);

    let value = vec![7u8; 90];
    let record_len = record::encoded_len(b"key-00", &value) as u64;
    let count = 50u64;
    for i in 0..count {
        store.write(format!("key-{:02}", i).as_bytes(), &value).unwrap();
    }

    let segments = store.segments().unwrap();
    let total: u64 = segments.iter().map(|s| s.size).sum();
    assert_eq!(total, record_len * count);
    let per_segment_cap = max + record_len;
    assert!(segments.len() as u64 >= (total + per_segment_cap - 1) / per_segment_cap);

    for segment in &segments {
        assert!(segment.size < max + record_len);
        if !segment.writable {
            assert!(segment.size >= max);
        }
    }

    let writable: Vec<_> = segments.iter().filter(|s| s.writable).collect();
    assert_eq!(writable.len(), 1);
    assert_eq!(writable[0].name, segments.last().unwrap().name);
}

#[test]
fn test_oversized_record_gets_its_own_segment() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 64);

    let big = store.write(b"big", &[1u8; 200]).unwrap();
    let small = store.write(b"small", b"x").unwrap();

    assert_ne!(big.segment, small.segment);
    assert_eq!(store.read(&big).unwrap().len(), 200);
    assert!(!store.is_writable(&big.segment));
    assert!(store.is_writable(&small.segment));
}

#[test]
fn test_reads_from_closed_segments() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100);

    let entries: Vec<_> = (0..20)
        .map(|i| {
            let value = format!("value-{}", i);
            (value.clone(), store.write(format!("k{}", i).as_bytes(), value.as_bytes()).unwrap())
        })
        .collect();

    assert!(store.segments().unwrap().len() > 1);
    for (value, entry) in &entries {
        assert_eq!(&store.read(entry).unwrap()[..], value.as_bytes());
    }
}

// =============================================================================
// Recovery
// =============================================================================

#[test]
fn test_reopen_appends_to_newest_segment() {
    let dir = TempDir::new().unwrap();

    let first = {
        let store = open_store(&dir, 1024 * 1024);
        store.write(b"a", b"1").unwrap()
    };

    let store = open_store(&dir, 1024 * 1024);
    assert!(store.is_writable(&first.segment));

    let second = store.write(b"b", b"2").unwrap();
    assert_eq!(second.segment, first.segment);
    assert_eq!(second.value_offset, 12 + 11);
    assert_eq!(&store.read(&first).unwrap()[..], b"1");
}

#[test]
fn test_reopen_leaves_full_segments_closed() {
    let dir = TempDir::new().unwrap();

    let entry = {
        let store = open_store(&dir, 16);
        store.write(b"full", b"0123456789").unwrap()
    };

    let store = open_store(&dir, 16);
    assert!(!store.is_writable(&entry.segment));

    let next = store.write(b"next", b"x").unwrap();
    assert_ne!(next.segment, entry.segment);
}

#[test]
fn test_reopen_truncates_torn_tail() {
    let dir = TempDir::new().unwrap();

    let entry = {
        let store = open_store(&dir, 1024 * 1024);
        store.write(b"a", b"1").unwrap()
    };

    let path = dir.path().join("segments").join(&entry.segment);
    let torn = record::encode(b"b", b"lost");
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&torn[..torn.len() - 2]).unwrap();
    }

    let store = open_store(&dir, 1024 * 1024);
    let next = store.write(b"c", b"3").unwrap();

    assert_eq!(next.segment, entry.segment);
    assert_eq!(next.value_offset, 12 + 11);
    assert_eq!(&store.read(&next).unwrap()[..], b"3");
}

#[test]
fn test_reopen_keeps_segment_with_corrupt_header() {
    let dir = TempDir::new().unwrap();

    let (a, b, c) = {
        let store = open_store(&dir, 1024 * 1024);
        (
            store.write(b"a", b"1").unwrap(),
            store.write(b"b", b"2").unwrap(),
            store.write(b"c", b"3").unwrap(),
        )
    };

    let path = dir.path().join("segments").join(&a.segment);
    let mut bytes = fs::read(&path).unwrap();
    let len_before = bytes.len() as u64;
    let b_start = (b.value_offset - record::HEADER_SIZE as u64 - 1) as usize;
    bytes[b_start] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let store = open_store(&dir, 1024 * 1024);

    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
    assert!(!store.is_writable(&a.segment));
    assert_eq!(&store.read(&a).unwrap()[..], b"1");
    assert_eq!(&store.read(&c).unwrap()[..], b"3");

    let next = store.write(b"d", b"4").unwrap();
    assert_ne!(next.segment, a.segment);
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
}

// =============================================================================
// Pooled Writers
// =============================================================================

#[test]
fn test_pooled_concurrent_writes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_pooled(&dir, 4096, 4));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..50)
                    .map(|i| {
                        let value = format!("t{}-v{}", t, i);
                        let entry = store.write(b"key", value.as_bytes()).unwrap();
                        (value, entry)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for (value, entry) in handle.join().unwrap() {
            assert_eq!(&store.read(&entry).unwrap()[..], value.as_bytes());
        }
    }

    for segment in store.segments().unwrap() {
        assert!(segment.size < 4096 + 64);
    }
}

#[test]
fn test_pooled_reopen_limits_writable() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_pooled(&dir, 1024 * 1024, 2);
        store.write(b"a", b"1").unwrap();
    }

    let store = open_pooled(&dir, 1024 * 1024, 2);
    let writable = store.segments().unwrap().iter().filter(|s| s.writable).count();
    assert_eq!(writable, 1);
}

// =============================================================================
// Retire
// =============================================================================

#[test]
fn test_retire_closed_segment() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 16);

    let old = store.write(b"old", b"0123456789").unwrap();
    store.write(b"new", b"x").unwrap();

    store.retire(&old.segment).unwrap();

    assert!(store.segments().unwrap().iter().all(|s| s.name != old.segment));
    let err = store.read(&old).unwrap_err();
    assert!(err.is_missing_file());
}

#[test]
fn test_retire_refuses_writable_segment() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 1024);

    let entry = store.write(b"a", b"1").unwrap();
    let err = store.retire(&entry.segment).unwrap_err();

    assert!(matches!(err, FragError::Storage(_)));
    assert_eq!(&store.read(&entry).unwrap()[..], b"1");
}

//! Tests for the segment compactor
//!
//! These tests verify:
//! - Live records are relocated and stay readable
//! - Overwritten and removed records are dropped
//! - No index entry ever points into a deleted segment
//! - Corrupt segments are kept, torn tails are skipped
//! - Compaction racing with writers loses no update

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fragstore::compactor::Compactor;
use fragstore::config::{SyncStrategy, WriterMode};
use fragstore::index::IndexStore;
use fragstore::record;
use fragstore::segment::SegmentStore;
use fragstore::{Config, Engine};
use parking_lot::RwLock;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    _dir: TempDir,
    segments: Arc<SegmentStore>,
    index: Arc<IndexStore>,
    compactor: Compactor,
}

impl Fixture {
    fn new(max_segment_size: u64, lifetime: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let segments = Arc::new(
            SegmentStore::open(
                &dir.path().join("segments"),
                max_segment_size,
                WriterMode::SingleWriter,
                SyncStrategy::OsManaged,
            )
            .unwrap(),
        );
        let (index, _) = IndexStore::open(
            &dir.path().join("index"),
            &dir.path().join("indexTemp"),
            SyncStrategy::OsManaged,
        )
        .unwrap();
        let index = Arc::new(index);
        let compactor = Compactor::new(
            Arc::clone(&segments),
            Arc::clone(&index),
            lifetime,
            Arc::new(RwLock::new(())),
        );

        Self {
            _dir: dir,
            segments,
            index,
            compactor,
        }
    }

    fn set(&self, key: &str, value: &[u8]) {
        let entry = self.segments.write(key.as_bytes(), value).unwrap();
        self.index.put(key, entry).unwrap();
    }

    fn get(&self, key: &str) -> Vec<u8> {
        let entry = self.index.get(key).unwrap();
        self.segments.read(&entry).unwrap().to_vec()
    }

    fn segment_names(&self) -> HashSet<String> {
        self.segments
            .segments()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    fn assert_index_points_at_existing_segments(&self) {
        let names = self.segment_names();
        for (key, entry) in self.index.snapshot() {
            assert!(
                names.contains(&entry.segment),
                "{} points into missing segment {}",
                key,
                entry.segment
            );
        }
    }
}

// =============================================================================
// Reclamation
// =============================================================================

#[test]
fn test_overwritten_records_are_dropped() {
    let fx = Fixture::new(200, Duration::ZERO);

    for i in 0..20 {
        fx.set(&format!("k{}", i), b"first-version-value");
    }
    for i in 0..20 {
        fx.set(&format!("k{}", i), b"second-version-value");
    }
    let before = fx.segment_names();

    let stats = fx.compactor.run().unwrap();

    assert!(stats.segments_deleted > 0);
    assert!(stats.records_dropped >= 20);
    assert!(stats.bytes_reclaimed > 0);
    assert_eq!(stats.segments_kept, 0);
    assert!(fx.segment_names().len() < before.len());

    for i in 0..20 {
        assert_eq!(fx.get(&format!("k{}", i)), b"second-version-value");
    }
    fx.assert_index_points_at_existing_segments();
}

#[test]
fn test_live_records_are_relocated() {
    let fx = Fixture::new(100, Duration::ZERO);

    for i in 0..10 {
        fx.set(&format!("live{}", i), format!("value-{}", i).as_bytes());
    }
    let closed: Vec<_> = fx
        .segments
        .segments()
        .unwrap()
        .into_iter()
        .filter(|s| !s.writable)
        .map(|s| s.name)
        .collect();
    assert!(!closed.is_empty());

    let stats = fx.compactor.run().unwrap();

    assert_eq!(stats.segments_deleted, closed.len() as u64);
    assert!(stats.records_relocated > 0);
    for i in 0..10 {
        assert_eq!(fx.get(&format!("live{}", i)), format!("value-{}", i).as_bytes());
    }
    fx.assert_index_points_at_existing_segments();

    let remaining = fx.segment_names();
    for segment in closed {
        assert!(!remaining.contains(&segment));
    }
}

#[test]
fn test_removed_keys_are_not_resurrected() {
    let fx = Fixture::new(100, Duration::ZERO);

    for i in 0..10 {
        fx.set(&format!("k{}", i), b"0123456789");
    }
    for i in 0..10 {
        fx.index.remove(&format!("k{}", i)).unwrap();
    }

    let stats = fx.compactor.run().unwrap();

    assert_eq!(stats.records_relocated, 0);
    assert!(fx.index.is_empty());
}

#[test]
fn test_young_segments_are_left_alone() {
    let fx = Fixture::new(64, Duration::from_secs(3600));

    for i in 0..10 {
        fx.set(&format!("k{}", i), b"0123456789abcdef");
    }
    let before = fx.segment_names();

    let stats = fx.compactor.run().unwrap();

    assert_eq!(stats.segments_scanned, 0);
    assert_eq!(fx.segment_names(), before);
}

#[test]
fn test_writable_segment_is_never_compacted() {
    let fx = Fixture::new(1024 * 1024, Duration::ZERO);

    fx.set("a", b"1");
    fx.set("a", b"2");

    let stats = fx.compactor.run().unwrap();

    assert_eq!(stats.segments_scanned, 0);
    assert_eq!(fx.get("a"), b"2");
}

// =============================================================================
// Corruption
// =============================================================================

#[test]
fn test_bad_magic_segment_is_kept() {
    let fx = Fixture::new(64, Duration::ZERO);
    fx.set("a", b"1");

    let corrupt = fx.segments.dir().join("0000000000001-deadbeef.seg");
    fs::write(&corrupt, vec![0xAB; 128]).unwrap();

    let stats = fx.compactor.run().unwrap();

    assert_eq!(stats.segments_scanned, 1);
    assert_eq!(stats.segments_kept, 1);
    assert_eq!(stats.segments_deleted, 0);
    assert!(corrupt.exists());
}

#[test]
fn test_torn_tail_is_skipped() {
    let fx = Fixture::new(64, Duration::ZERO);

    fx.set("a", &[1u8; 60]);
    let first = fx.index.get("a").unwrap().segment;
    fx.set("b", b"rotates");

    let torn = record::encode(b"c", b"never finished");
    {
        let path = fx.segments.dir().join(&first);
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(&torn[..torn.len() - 3]).unwrap();
    }

    let stats = fx.compactor.run().unwrap();

    assert_eq!(stats.records_skipped, 1);
    assert_eq!(stats.records_relocated, 1);
    assert_eq!(stats.segments_deleted, 1);
    assert!(!fx.segment_names().contains(&first));
    assert_eq!(fx.get("a"), vec![1u8; 60]);
    assert_eq!(fx.get("b"), b"rotates");
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_compaction_races_with_writers() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(dir.path())
        .max_segment_size(512)
        .sync_strategy(SyncStrategy::OsManaged)
        .defrag(None)
        .index_compaction_interval(None)
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());

    for i in 0..50 {
        engine.set(&format!("k{}", i), b"initial").unwrap();
    }

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 0..25 {
                    for i in (t..50).step_by(4) {
                        engine
                            .set(&format!("k{}", i), format!("r{}-k{}", round, i).as_bytes())
                            .unwrap();
                    }
                }
            })
        })
        .collect();

    let compactor = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..10 {
                engine.defragment().unwrap();
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    compactor.join().unwrap();
    engine.defragment().unwrap();

    for i in 0..50 {
        let value = engine.get(&format!("k{}", i)).unwrap();
        assert_eq!(&value[..], format!("r24-k{}", i).as_bytes());
    }

    let names: HashSet<_> = engine
        .segments()
        .segments()
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    for (_, entry) in engine.index().snapshot() {
        assert!(names.contains(&entry.segment));
    }
}

// Table format tests: build → reopen → lookup/scan, filter skipping,
// and block-level round trips.

use std::sync::Arc;

use bytes::Bytes;
use stratadb::bloom::{BloomFilterPolicy, FilterPolicy};
use stratadb::comparator::{BytewiseComparator, InternalKeyComparator};
use stratadb::iterator::StorageIterator;
use stratadb::sstable::block::{Block, BlockBuilder};
use stratadb::sstable::{Table, TableBuilder};
use stratadb::storage::{DiskStorage, Storage};
use stratadb::types::{ValueType, extract_user_key, make_internal_key};

fn icmp() -> InternalKeyComparator {
    InternalKeyComparator::new(Arc::new(BytewiseComparator))
}

fn ik(user: &str, seq: u64) -> Vec<u8> {
    make_internal_key(user.as_bytes(), seq, ValueType::Put)
}

/// Helper: build a table of n sequential keys, return (path, file_size).
fn build_table(
    dir: &tempfile::TempDir,
    n: u64,
    policy: Option<Arc<dyn FilterPolicy>>,
) -> (std::path::PathBuf, u64) {
    let path = dir.path().join("000001.sst");
    let storage = DiskStorage;
    let mut builder = TableBuilder::new(
        storage.new_writable(&path).unwrap(),
        icmp(),
        policy,
        1024,
    );
    for i in 0..n {
        builder
            .add(&ik(&format!("key_{i:06}"), i + 1), format!("value_{i:06}").as_bytes())
            .unwrap();
    }
    let stats = builder.finish().unwrap();
    assert_eq!(stats.num_entries, n);
    (path, stats.file_size)
}

fn open_table(
    path: &std::path::Path,
    file_size: u64,
    policy: Option<Arc<dyn FilterPolicy>>,
) -> Arc<Table> {
    let storage = DiskStorage;
    Arc::new(
        Table::open(
            storage.open_random(path).unwrap(),
            1,
            file_size,
            icmp(),
            policy,
            None,
            true,
        )
        .unwrap(),
    )
}

// =============================================================================
// Test 1: block encode-then-decode yields the original sequence exactly
// =============================================================================
#[test]
fn block_roundtrip_exact() {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..100u64)
        .map(|i| (ik(&format!("shared_prefix_{i:04}"), i + 1), format!("v{i}").into_bytes()))
        .collect();

    let mut builder = BlockBuilder::new(16);
    for (k, v) in &entries {
        builder.add(k, v);
    }
    let block = Block::decode(Bytes::from(builder.build())).unwrap();

    let mut iter = block.iter(icmp());
    iter.seek_to_first().unwrap();
    for (k, v) in &entries {
        assert!(iter.valid());
        assert_eq!(iter.key(), k.as_slice());
        assert_eq!(iter.value(), v.as_slice());
        iter.next().unwrap();
    }
    assert!(!iter.valid());

    // And back again, restart points included
    iter.seek_to_last().unwrap();
    for (k, _) in entries.iter().rev() {
        assert!(iter.valid());
        assert_eq!(iter.key(), k.as_slice());
        iter.prev().unwrap();
    }
}

// =============================================================================
// Test 2: every written key is found after reopen
// =============================================================================
#[test]
fn table_roundtrip_via_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (path, size) = build_table(&dir, 500, None);
    let table = open_table(&path, size, None);

    for i in 0..500u64 {
        let target = ik(&format!("key_{i:06}"), i + 1);
        let (key, value) = table.get(&target, true, true).unwrap().unwrap();
        assert_eq!(key, target);
        assert_eq!(value, format!("value_{i:06}").into_bytes());
    }
}

// =============================================================================
// Test 3: a bloom filter lets absent keys skip the data blocks
// =============================================================================
#[test]
fn filter_skips_absent_keys() {
    let dir = tempfile::tempdir().unwrap();
    let policy: Arc<dyn FilterPolicy> = Arc::new(BloomFilterPolicy::default());
    let (path, size) = build_table(&dir, 200, Some(Arc::clone(&policy)));
    let table = open_table(&path, size, Some(policy));

    // Present keys always found (no false negatives)
    for i in (0..200u64).step_by(17) {
        let target = ik(&format!("key_{i:06}"), i + 1);
        assert!(table.get(&target, true, true).unwrap().is_some());
    }
    // Far-away absent keys resolve to None
    let miss = table
        .get(&ik("zzz_not_here", 1), true, true)
        .unwrap();
    assert!(miss.is_none());
}

// =============================================================================
// Test 4: full scan is ordered and complete
// =============================================================================
#[test]
fn scan_is_ordered_and_complete() {
    let dir = tempfile::tempdir().unwrap();
    let (path, size) = build_table(&dir, 300, None);
    let table = open_table(&path, size, None);

    let mut iter = table.iter(true, true);
    iter.seek_to_first().unwrap();
    let mut previous: Option<Vec<u8>> = None;
    let mut count = 0;
    while iter.valid() {
        let user = extract_user_key(iter.key()).to_vec();
        if let Some(prev) = &previous {
            assert!(prev < &user);
        }
        previous = Some(user);
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 300);
}

// =============================================================================
// Test 5: flipping one payload byte is caught by the block checksum
// =============================================================================
#[test]
fn corruption_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let (path, size) = build_table(&dir, 300, None);

    let mut raw = std::fs::read(&path).unwrap();
    raw[5] ^= 0x01;
    std::fs::write(&path, &raw).unwrap();

    let table = open_table(&path, size, None);
    let err = table.get(&ik("key_000000", 1), true, true).unwrap_err();
    assert!(matches!(err, stratadb::Error::Corruption(_)));
}

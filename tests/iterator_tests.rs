// Database iterator tests: ordering, duplicate collapse, tombstone
// hiding, bidirectional movement, and pinning semantics.

use stratadb::{DB, Options, ReadOptions, WriteOptions};

fn options_small() -> Options {
    Options {
        write_buffer_size: 4 * 1024,
        block_size: 1024,
        ..Options::default()
    }
}

fn put(db: &DB, key: &[u8], value: &[u8]) {
    db.put(&WriteOptions::default(), key, value).unwrap();
}

fn collect_forward(db: &DB) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    iter.seek_to_first().unwrap();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    out
}

// =============================================================================
// Test 1: strictly ascending user keys, exactly one version per key
// =============================================================================
#[test]
fn ascending_with_duplicates_collapsed() {
    let dir = tempfile::tempdir().unwrap();
    let db = DB::open(Options::default(), dir.path()).unwrap();

    put(&db, b"b", b"2-old");
    put(&db, b"a", b"1");
    put(&db, b"c", b"3");
    put(&db, b"b", b"2-new"); // overwrite must collapse

    let entries = collect_forward(&db);
    assert_eq!(
        entries,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2-new".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
}

// =============================================================================
// Test 2: the merged stream spans memtable + level-0 + deeper levels
// =============================================================================
#[test]
fn merge_across_all_sources() {
    let dir = tempfile::tempdir().unwrap();
    let db = DB::open(options_small(), dir.path()).unwrap();

    // Older generation → compacted to deeper levels
    for i in (0..100u32).step_by(2) {
        put(&db, format!("key_{i:04}").as_bytes(), b"even-old");
    }
    db.compact_range(None, None).unwrap();
    // Newer generation: odds in the memtable, plus overwrites of evens
    for i in (1..100u32).step_by(2) {
        put(&db, format!("key_{i:04}").as_bytes(), b"odd");
    }
    put(&db, b"key_0000", b"even-overwritten");

    let entries = collect_forward(&db);
    assert_eq!(entries.len(), 100);
    let mut previous: Option<Vec<u8>> = None;
    for (key, _) in &entries {
        if let Some(prev) = &previous {
            assert!(prev < key, "out of order: {prev:?} then {key:?}");
        }
        previous = Some(key.clone());
    }
    assert_eq!(entries[0].1, b"even-overwritten");
    assert_eq!(entries[1].1, b"odd");
}

// =============================================================================
// Test 3: deleted keys vanish from the stream
// =============================================================================
#[test]
fn tombstones_are_invisible() {
    let dir = tempfile::tempdir().unwrap();
    let db = DB::open(Options::default(), dir.path()).unwrap();

    for key in ["a", "b", "c", "d", "e"] {
        put(&db, key.as_bytes(), b"v");
    }
    db.delete(&WriteOptions::default(), b"b").unwrap();
    db.delete(&WriteOptions::default(), b"d").unwrap();

    let keys: Vec<Vec<u8>> = collect_forward(&db).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"e".to_vec()]);
}

// =============================================================================
// Test 4: seek, then walk both directions
// =============================================================================
#[test]
fn seek_and_bidirectional_walk() {
    let dir = tempfile::tempdir().unwrap();
    let db = DB::open(Options::default(), dir.path()).unwrap();

    for key in ["apple", "banana", "cherry", "damson", "elder"] {
        put(&db, key.as_bytes(), key.as_bytes());
    }
    db.delete(&WriteOptions::default(), b"cherry").unwrap();

    let mut iter = db.iter(&ReadOptions::default()).unwrap();

    // Seek to a deleted key lands on its successor
    iter.seek(b"cherry").unwrap();
    assert_eq!(iter.key(), b"damson");

    iter.prev().unwrap();
    assert_eq!(iter.key(), b"banana");
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"apple");
    iter.prev().unwrap();
    assert!(!iter.valid());

    iter.seek_to_last().unwrap();
    assert_eq!(iter.key(), b"elder");
    iter.next().unwrap();
    assert!(!iter.valid());

    // Reverse scan sees the same keys backwards
    iter.seek_to_last().unwrap();
    let mut reversed = Vec::new();
    while iter.valid() {
        reversed.push(iter.key().to_vec());
        iter.prev().unwrap();
    }
    assert_eq!(
        reversed,
        vec![b"elder".to_vec(), b"damson".to_vec(), b"banana".to_vec(), b"apple".to_vec()]
    );
}

// =============================================================================
// Test 5: an open iterator is unaffected by later writes and compactions
// =============================================================================
#[test]
fn iterator_pins_its_view() {
    let dir = tempfile::tempdir().unwrap();
    let db = DB::open(options_small(), dir.path()).unwrap();

    for i in 0..50u32 {
        put(&db, format!("stable_{i:03}").as_bytes(), b"v1");
    }
    let mut iter = db.iter(&ReadOptions::default()).unwrap();

    // Mutate heavily behind the iterator's back
    for i in 0..50u32 {
        put(&db, format!("stable_{i:03}").as_bytes(), b"v2");
        put(&db, format!("noise_{i:03}").as_bytes(), b"x");
    }
    db.compact_range(None, None).unwrap();

    iter.seek_to_first().unwrap();
    let mut count = 0;
    while iter.valid() {
        assert!(iter.key().starts_with(b"stable_"));
        assert_eq!(iter.value(), b"v1");
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 50);
}

// =============================================================================
// Test 6: iterating at a snapshot
// =============================================================================
#[test]
fn snapshot_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let db = DB::open(Options::default(), dir.path()).unwrap();

    put(&db, b"k1", b"old");
    put(&db, b"k2", b"old");
    let snap = db.snapshot();
    put(&db, b"k1", b"new");
    put(&db, b"k3", b"new");

    let at_snap = ReadOptions {
        snapshot: Some(snap),
        ..ReadOptions::default()
    };
    let mut iter = db.iter(&at_snap).unwrap();
    iter.seek_to_first().unwrap();
    let mut entries = Vec::new();
    while iter.valid() {
        entries.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    assert_eq!(
        entries,
        vec![
            (b"k1".to_vec(), b"old".to_vec()),
            (b"k2".to_vec(), b"old".to_vec()),
        ]
    );
}

// Write-ahead log tests: framing, fragmentation, crash-tail tolerance.

use stratadb::storage::{DiskStorage, Storage};
use stratadb::wal::{BLOCK_SIZE, LogReader, LogWriter};

/// Helper: write the given records to a fresh log file, return its path.
fn write_log(dir: &tempfile::TempDir, records: &[Vec<u8>]) -> std::path::PathBuf {
    let path = dir.path().join("000001.log");
    let storage = DiskStorage;
    let mut writer = LogWriter::new(storage.new_writable(&path).unwrap());
    for record in records {
        writer.add_record(record).unwrap();
    }
    writer.sync().unwrap();
    path
}

fn read_log(path: &std::path::Path) -> Vec<Vec<u8>> {
    let reader = LogReader::new(std::fs::read(path).unwrap());
    reader.iter().map(|r| r.unwrap()).collect()
}

// =============================================================================
// Test 1: write N records, read all N back in order
// =============================================================================
#[test]
fn read_all_records_back() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<Vec<u8>> = (0..25).map(|i| format!("record-{i:03}").into_bytes()).collect();
    let path = write_log(&dir, &records);

    assert_eq!(read_log(&path), records);
}

// =============================================================================
// Test 2: a record bigger than several blocks reassembles exactly
// =============================================================================
#[test]
fn giant_record_spans_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let giant: Vec<u8> = (0..BLOCK_SIZE * 3 + 517).map(|i| (i % 251) as u8).collect();
    let records = vec![b"head".to_vec(), giant.clone(), b"tail".to_vec()];
    let path = write_log(&dir, &records);

    let read = read_log(&path);
    assert_eq!(read.len(), 3);
    assert_eq!(read[1], giant);
    assert_eq!(read[2], b"tail");
}

// =============================================================================
// Test 3: truncate mid-record → preceding records survive, no error
// =============================================================================
#[test]
fn truncated_tail_yields_preceding() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<Vec<u8>> = (0..5).map(|i| format!("rec{i}").into_bytes()).collect();
    let path = write_log(&dir, &records);

    let file_len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(file_len - 3).unwrap();

    assert_eq!(read_log(&path).len(), 4);
}

// =============================================================================
// Test 4: corrupt a byte of the FINAL record → tolerated as a torn write
// =============================================================================
#[test]
fn corrupt_final_record_is_torn_write() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<Vec<u8>> = (0..5).map(|i| format!("rec{i}").into_bytes()).collect();
    let path = write_log(&dir, &records);

    let mut raw = std::fs::read(&path).unwrap();
    let n = raw.len();
    raw[n - 1] ^= 0x40;
    std::fs::write(&path, &raw).unwrap();

    assert_eq!(read_log(&path).len(), 4);
}

// =============================================================================
// Test 5: corruption strictly inside the log IS an error
// =============================================================================
#[test]
fn interior_corruption_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    // Three half-block records so damage in the first sits well before EOF
    let records: Vec<Vec<u8>> = (0..3).map(|i| vec![i as u8; BLOCK_SIZE / 2]).collect();
    let path = write_log(&dir, &records);

    let mut raw = std::fs::read(&path).unwrap();
    raw[20] ^= 0xFF; // inside record 0's payload
    std::fs::write(&path, &raw).unwrap();

    let reader = LogReader::new(std::fs::read(&path).unwrap());
    let results: Vec<_> = reader.iter().collect();
    assert!(results[0].is_err());
}

// =============================================================================
// Test 6: empty log file → iterator immediately exhausted
// =============================================================================
#[test]
fn empty_log_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log(&dir, &[]);
    assert!(read_log(&path).is_empty());
}

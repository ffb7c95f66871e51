use std::sync::Arc;

use crate::bloom::{BloomFilterPolicy, FilterPolicy};
use crate::comparator::{BytewiseComparator, Comparator};
use crate::db::snapshot::Snapshot;
use crate::storage::{DiskStorage, Storage};

/// Engine construction parameters. The comparator and filter policy are
/// the two polymorphic seams: everything downstream orders keys and
/// builds filters through them.
#[derive(Clone)]
pub struct Options {
    /// Create the database directory and manifest if none exists.
    pub create_if_missing: bool,
    /// Refuse to open a database that already exists.
    pub error_if_exists: bool,
    /// Memtable size that triggers a freeze + background flush.
    pub write_buffer_size: usize,
    /// How many frozen memtables may queue before writers block.
    pub max_immutable_memtables: usize,
    /// Uncompressed payload target for table data blocks.
    pub block_size: usize,
    /// Total bytes of decoded blocks kept hot across all tables.
    pub block_cache_capacity: usize,
    /// Open table readers kept cached.
    pub table_cache_capacity: usize,
    /// Verify block checksums on reads unless a ReadOptions overrides it.
    pub verify_checksums: bool,
    /// User-key ordering; recorded in the manifest and checked on reopen.
    pub comparator: Arc<dyn Comparator>,
    /// Per-table filter; None disables filter blocks entirely.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    /// The world outside: files, directories, locks.
    pub storage: Arc<dyn Storage>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            create_if_missing: true,
            error_if_exists: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_immutable_memtables: 2,
            block_size: crate::sstable::BLOCK_SIZE,
            block_cache_capacity: 8 * 1024 * 1024,
            table_cache_capacity: 990,
            verify_checksums: true,
            comparator: Arc::new(BytewiseComparator),
            filter_policy: Some(Arc::new(BloomFilterPolicy::default())),
            storage: Arc::new(DiskStorage),
        }
    }
}

/// Per-read knobs.
#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Skip checksum verification for this read only.
    pub skip_checksums: bool,
    /// Keep blocks read by this operation out of the block cache
    /// (bulk scans shouldn't wipe the working set).
    pub skip_cache_fill: bool,
    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<Snapshot>,
}

/// Per-write knobs.
#[derive(Clone, Copy, Default)]
pub struct WriteOptions {
    /// Force the WAL to durable storage before acknowledging.
    pub sync: bool,
}

impl WriteOptions {
    pub fn sync() -> Self {
        WriteOptions { sync: true }
    }
}

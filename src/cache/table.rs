use std::path::PathBuf;
use std::sync::Arc;

use crate::bloom::FilterPolicy;
use crate::cache::ShardedCache;
use crate::comparator::InternalKeyComparator;
use crate::db::filename::table_file_name;
use crate::error::Result;
use crate::sstable::reader::{BlockCache, Table, TableIterator};
use crate::storage::Storage;

/// Caches open table readers by file number.
///
/// Opening a table means a footer read, an index-block read, and possibly
/// a filter-block read; repeated point lookups and compactions would pay
/// that over and over without this cache. Eviction drops the `Arc`, which
/// closes the underlying file handle once the last in-flight read or
/// iterator lets go.
pub struct TableCache {
    storage: Arc<dyn Storage>,
    dir: PathBuf,
    icmp: InternalKeyComparator,
    policy: Option<Arc<dyn FilterPolicy>>,
    block_cache: Option<Arc<BlockCache>>,
    cache: ShardedCache<u64, Arc<Table>>,
    verify_checksums: bool,
}

impl TableCache {
    pub fn new(
        storage: Arc<dyn Storage>,
        dir: PathBuf,
        icmp: InternalKeyComparator,
        policy: Option<Arc<dyn FilterPolicy>>,
        block_cache: Option<Arc<BlockCache>>,
        capacity: usize,
        verify_checksums: bool,
    ) -> Self {
        TableCache {
            storage,
            dir,
            icmp,
            policy,
            block_cache,
            cache: ShardedCache::new(capacity),
            verify_checksums,
        }
    }

    /// Open (or fetch the cached) reader for a table file. Concurrent
    /// misses on the same file open it once and share the handle.
    pub fn get(&self, file_number: u64, file_size: u64) -> Result<Arc<Table>> {
        self.cache.get_or_load(file_number, 1, || {
            let path = table_file_name(&self.dir, file_number);
            let file = self.storage.open_random(&path)?;
            let table = Table::open(
                file,
                file_number,
                file_size,
                self.icmp.clone(),
                self.policy.clone(),
                self.block_cache.clone(),
                self.verify_checksums,
            )?;
            Ok(Arc::new(table))
        })
    }

    /// Point lookup through the cached reader. Returns the raw
    /// (internal key, value) entry the table surfaced, if any.
    pub fn table_get(
        &self,
        file_number: u64,
        file_size: u64,
        ikey: &[u8],
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let table = self.get(file_number, file_size)?;
        table.get(ikey, verify_checksums, fill_cache)
    }

    /// Iterator over a table file; holds the reader alive independently
    /// of the cache entry.
    pub fn table_iter(
        &self,
        file_number: u64,
        file_size: u64,
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<TableIterator> {
        let table = self.get(file_number, file_size)?;
        Ok(table.iter(verify_checksums, fill_cache))
    }

    /// Drop the cached handle for a deleted file.
    pub fn evict(&self, file_number: u64) {
        self.cache.erase(&file_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::iterator::StorageIterator;
    use crate::sstable::TableBuilder;
    use crate::storage::DiskStorage;
    use crate::types::{ValueType, make_internal_key};
    use tempfile::tempdir;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn write_table(dir: &std::path::Path, number: u64, n: u64) -> u64 {
        let storage = DiskStorage;
        let mut builder = TableBuilder::new(
            storage.new_writable(&table_file_name(dir, number)).unwrap(),
            icmp(),
            None,
            4096,
        );
        for i in 0..n {
            let key = make_internal_key(format!("key_{i:04}").as_bytes(), i + 1, ValueType::Put);
            builder.add(&key, b"value").unwrap();
        }
        builder.finish().unwrap().file_size
    }

    fn new_cache(dir: &std::path::Path) -> TableCache {
        TableCache::new(
            Arc::new(DiskStorage),
            dir.to_path_buf(),
            icmp(),
            None,
            None,
            100,
            true,
        )
    }

    #[test]
    fn cached_handle_is_reused() {
        let dir = tempdir().unwrap();
        let size = write_table(dir.path(), 1, 10);
        let cache = new_cache(dir.path());

        let a = cache.get(1, size).unwrap();
        let b = cache.get(1, size).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn evict_forces_reopen() {
        let dir = tempdir().unwrap();
        let size = write_table(dir.path(), 1, 10);
        let cache = new_cache(dir.path());

        let a = cache.get(1, size).unwrap();
        cache.evict(1);
        let b = cache.get(1, size).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn table_get_and_iter_work_through_cache() {
        let dir = tempdir().unwrap();
        let size = write_table(dir.path(), 3, 25);
        let cache = new_cache(dir.path());

        let target = make_internal_key(b"key_0007", u64::MAX >> 8, ValueType::Put);
        let (key, value) = cache.table_get(3, size, &target, true, true).unwrap().unwrap();
        assert_eq!(crate::types::extract_user_key(&key), b"key_0007");
        assert_eq!(value, b"value");

        let mut iter = cache.table_iter(3, size, true, true).unwrap();
        iter.seek_to_first().unwrap();
        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next().unwrap();
        }
        assert_eq!(count, 25);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let cache = new_cache(dir.path());
        assert!(cache.get(99, 1000).is_err());
    }
}

use std::sync::Arc;

use crate::bloom::FilterPolicy;
use crate::cache::ShardedCache;
use crate::comparator::InternalKeyComparator;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::filter::FilterBlockReader;
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::read_block_contents;
use crate::storage::RandomAccessFile;
use crate::types::extract_user_key;

/// Decoded data blocks shared across all open tables, keyed by
/// (file number, block offset).
pub type BlockCache = ShardedCache<(u64, u64), Block>;

/// An opened table file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last 48 bytes) → find index and filter block handles
/// 2. Read and decode the index block (kept in memory)
/// 3. Read the filter block if present
/// 4. Ready for queries — data blocks are read on demand, through the
///    block cache when one is configured
pub struct Table {
    file: Box<dyn RandomAccessFile>,
    file_number: u64,
    icmp: InternalKeyComparator,
    index: Block,
    filter: Option<FilterBlockReader>,
    block_cache: Option<Arc<BlockCache>>,
}

impl Table {
    pub fn open(
        file: Box<dyn RandomAccessFile>,
        file_number: u64,
        file_size: u64,
        icmp: InternalKeyComparator,
        policy: Option<Arc<dyn FilterPolicy>>,
        block_cache: Option<Arc<BlockCache>>,
        verify_checksums: bool,
    ) -> Result<Table> {
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(
                "file too short to contain footer".into(),
            ));
        }
        let footer_raw = file.read_at(file_size - Footer::SIZE as u64, Footer::SIZE)?;
        let footer = Footer::decode(&footer_raw)?;

        let index_contents =
            read_block_contents(file.as_ref(), footer.index_handle, verify_checksums)?;
        let index = Block::decode(index_contents)?;

        let filter = match (policy, footer.filter_handle.is_null()) {
            (Some(policy), false) => {
                let data =
                    read_block_contents(file.as_ref(), footer.filter_handle, verify_checksums)?;
                Some(FilterBlockReader::new(policy, data))
            }
            _ => None,
        };

        Ok(Table {
            file,
            file_number,
            icmp,
            index,
            filter,
            block_cache,
        })
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Fetch a data block, preferring the shared cache. Concurrent misses
    /// on one block are collapsed into a single disk read by the cache.
    fn read_data_block(
        &self,
        handle: BlockHandle,
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<Block> {
        let Some(cache) = &self.block_cache else {
            let contents = read_block_contents(self.file.as_ref(), handle, verify_checksums)?;
            return Block::decode(contents);
        };
        let key = (self.file_number, handle.offset);
        if !fill_cache {
            if let Some(block) = cache.get(&key) {
                return Ok(block);
            }
            let contents = read_block_contents(self.file.as_ref(), handle, verify_checksums)?;
            return Block::decode(contents);
        }
        let file = self.file.as_ref();
        cache.get_or_load(key, handle.size as usize, || {
            let contents = read_block_contents(file, handle, verify_checksums)?;
            Block::decode(contents)
        })
    }

    /// Point lookup. Returns the newest entry at or below the target's
    /// sequence, as (encoded internal key, value) — the caller decides
    /// whether the user key matches and whether it's a tombstone.
    pub fn get(
        &self,
        ikey: &[u8],
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        // The filter sees user keys; a miss proves the key is nowhere in
        // this file and saves the data-block read entirely.
        if let Some(filter) = &self.filter {
            if !filter.may_match(extract_user_key(ikey)) {
                return Ok(None);
            }
        }

        let mut index_iter = self.index.iter(self.icmp.clone());
        index_iter.seek(ikey)?;
        if !index_iter.valid() {
            return Ok(None);
        }
        let (handle, _) = BlockHandle::decode(index_iter.value())?;
        let block = self.read_data_block(handle, verify_checksums, fill_cache)?;
        let mut block_iter = block.iter(self.icmp.clone());
        block_iter.seek(ikey)?;
        if !block_iter.valid() {
            return Ok(None);
        }
        Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())))
    }

    /// Iterator over every entry in the table, in internal-key order.
    pub fn iter(self: &Arc<Self>, verify_checksums: bool, fill_cache: bool) -> TableIterator {
        TableIterator {
            table: Arc::clone(self),
            index_iter: self.index.iter(self.icmp.clone()),
            data_iter: None,
            verify_checksums,
            fill_cache,
        }
    }
}

/// Two-level cursor: an index-block iterator picks the data block, a
/// block iterator walks inside it. Holds the table alive.
pub struct TableIterator {
    table: Arc<Table>,
    index_iter: BlockIterator,
    data_iter: Option<BlockIterator>,
    verify_checksums: bool,
    fill_cache: bool,
}

impl TableIterator {
    /// Load the data block the index currently points at.
    fn load_data_block(&mut self) -> Result<()> {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return Ok(());
        }
        let (handle, _) = BlockHandle::decode(self.index_iter.value())?;
        let block =
            self.table
                .read_data_block(handle, self.verify_checksums, self.fill_cache)?;
        self.data_iter = Some(block.iter(self.table.icmp.clone()));
        Ok(())
    }

    /// Move forward over any exhausted (empty) data blocks.
    fn skip_forward(&mut self) -> Result<()> {
        while self.data_iter.as_ref().is_some_and(|it| !it.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.next()?;
            self.load_data_block()?;
            if let Some(iter) = &mut self.data_iter {
                iter.seek_to_first()?;
            }
        }
        Ok(())
    }

    /// Move backward over any exhausted data blocks.
    fn skip_backward(&mut self) -> Result<()> {
        while self.data_iter.as_ref().is_some_and(|it| !it.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.prev()?;
            self.load_data_block()?;
            if let Some(iter) = &mut self.data_iter {
                iter.seek_to_last()?;
            }
        }
        Ok(())
    }
}

impl StorageIterator for TableIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index_iter.seek_to_first()?;
        self.load_data_block()?;
        if let Some(iter) = &mut self.data_iter {
            iter.seek_to_first()?;
        }
        self.skip_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index_iter.seek_to_last()?;
        self.load_data_block()?;
        if let Some(iter) = &mut self.data_iter {
            iter.seek_to_last()?;
        }
        self.skip_backward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        // Index keys are each block's last key, so the first index entry
        // >= target names the only block that can contain it.
        self.index_iter.seek(target)?;
        self.load_data_block()?;
        if let Some(iter) = &mut self.data_iter {
            iter.seek(target)?;
        }
        self.skip_forward()
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        if let Some(iter) = &mut self.data_iter {
            iter.next()?;
        }
        self.skip_forward()
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        if let Some(iter) = &mut self.data_iter {
            iter.prev()?;
        }
        self.skip_backward()
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().map_or(&[], |it| it.key())
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().map_or(&[], |it| it.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomFilterPolicy;
    use crate::comparator::BytewiseComparator;
    use crate::sstable::TableBuilder;
    use crate::storage::{DiskStorage, Storage};
    use crate::types::{ParsedInternalKey, ValueType, make_internal_key};
    use std::path::Path;
    use tempfile::tempdir;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn ik(user: &str, seq: u64) -> Vec<u8> {
        make_internal_key(user.as_bytes(), seq, ValueType::Put)
    }

    fn build_table(path: &Path, entries: &[(Vec<u8>, Vec<u8>)], with_filter: bool) -> u64 {
        let storage = DiskStorage;
        let policy: Option<Arc<dyn FilterPolicy>> = if with_filter {
            Some(Arc::new(BloomFilterPolicy::default()))
        } else {
            None
        };
        let mut builder =
            TableBuilder::new(storage.new_writable(path).unwrap(), icmp(), policy, 256);
        for (k, v) in entries {
            builder.add(k, v).unwrap();
        }
        builder.finish().unwrap().file_size
    }

    fn open_table(path: &Path, file_size: u64, with_filter: bool) -> Arc<Table> {
        let storage = DiskStorage;
        let policy: Option<Arc<dyn FilterPolicy>> = if with_filter {
            Some(Arc::new(BloomFilterPolicy::default()))
        } else {
            None
        };
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

    fn sample_entries(n: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| {
                (
                    ik(&format!("key_{i:05}"), i + 1),
                    format!("val_{i:05}").into_bytes(),
                )
            })
            .collect()
    }

    #[test]
    fn get_finds_every_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        let entries = sample_entries(200);
        let size = build_table(&path, &entries, true);
        let table = open_table(&path, size, true);

        for (k, v) in &entries {
            let (found_key, found_val) = table.get(k, true, true).unwrap().unwrap();
            assert_eq!(&found_key, k);
            assert_eq!(&found_val, v);
        }
    }

    #[test]
    fn get_missing_key_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        let entries = sample_entries(50);
        let size = build_table(&path, &entries, true);
        let table = open_table(&path, size, true);

        // After every key in the file
        assert!(table.get(&ik("zzz", 1), true, true).unwrap().is_none());
        // Between keys: lands on the next entry; caller checks user key
        let got = table.get(&ik("key_00010x", 1), true, true).unwrap();
        if let Some((k, _)) = got {
            let parsed = ParsedInternalKey::parse(&k).unwrap();
            assert_ne!(parsed.user_key, b"key_00010x");
        }
    }

    #[test]
    fn iterator_scans_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        let entries = sample_entries(100);
        let size = build_table(&path, &entries, false);
        let table = open_table(&path, size, false);

        let mut iter = table.iter(true, true);
        iter.seek_to_first().unwrap();
        for (k, v) in &entries {
            assert!(iter.valid());
            assert_eq!(iter.key(), k.as_slice());
            assert_eq!(iter.value(), v.as_slice());
            iter.next().unwrap();
        }
        assert!(!iter.valid());
    }

    #[test]
    fn iterator_seeks_and_walks_backwards() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        let entries = sample_entries(100);
        let size = build_table(&path, &entries, false);
        let table = open_table(&path, size, false);

        let mut iter = table.iter(true, true);
        iter.seek(&ik("key_00050", u64::MAX >> 8)).unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key(), entries[50].0.as_slice());

        iter.prev().unwrap();
        assert_eq!(iter.key(), entries[49].0.as_slice());

        iter.seek_to_last().unwrap();
        assert_eq!(iter.key(), entries[99].0.as_slice());
        let mut count = 1;
        while {
            iter.prev().unwrap();
            iter.valid()
        } {
            count += 1;
        }
        assert_eq!(count, 100);
    }

    #[test]
    fn corrupted_block_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        let entries = sample_entries(100);
        let size = build_table(&path, &entries, false);

        // Flip a byte inside the first data block
        let mut raw = std::fs::read(&path).unwrap();
        raw[10] ^= 0xFF;
        std::fs::write(&path, &raw).unwrap();

        let table = open_table(&path, size, false);
        let err = table.get(&entries[0].0, true, true).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn checksum_verification_can_be_disabled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        // Few enough entries to stay in a single data block
        let entries = sample_entries(5);
        let size = build_table(&path, &entries, false);

        // Corrupt only the checksum trailer of the data block, not its
        // payload: verification off must still read the data. The trailer
        // CRC occupies the 4 bytes just before the index block.
        let raw = std::fs::read(&path).unwrap();
        let mut patched = raw.clone();
        let footer = Footer::decode(&raw[raw.len() - Footer::SIZE..]).unwrap();
        let crc_offset = footer.index_handle.offset as usize - 4;
        patched[crc_offset] ^= 0xFF;
        std::fs::write(&path, &patched).unwrap();

        let table = open_table(&path, size, false);
        assert!(table.get(&entries[0].0, true, true).is_err());
        assert!(table.get(&entries[0].0, false, true).is_ok());
    }

    #[test]
    fn block_cache_is_populated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        let entries = sample_entries(100);
        let size = build_table(&path, &entries, false);

        let storage = DiskStorage;
        let cache: Arc<BlockCache> = Arc::new(ShardedCache::new(1 << 20));
        let table = Arc::new(
            Table::open(
                storage.open_random(&path).unwrap(),
                7,
                size,
                icmp(),
                None,
                Some(Arc::clone(&cache)),
                true,
            )
            .unwrap(),
        );

        assert!(cache.is_empty());
        table.get(&entries[0].0, true, true).unwrap();
        assert_eq!(cache.len(), 1);
        // fill_cache = false leaves the cache untouched
        table.get(&entries[99].0, true, false).unwrap();
        assert_eq!(cache.len(), 1);
    }
}

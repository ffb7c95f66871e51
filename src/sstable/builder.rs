use std::sync::Arc;

use crate::bloom::FilterPolicy;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::sstable::block::BlockBuilder;
use crate::sstable::filter::FilterBlockBuilder;
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::{BLOCK_RESTART_INTERVAL, COMPRESSION_NONE, block_crc};
use crate::storage::WritableFile;
use crate::types::extract_user_key;

/// Summary of a finished table, used to register it in the manifest.
/// `smallest`/`largest` are encoded internal keys.
#[derive(Debug, Clone)]
pub struct TableStats {
    pub file_size: u64,
    pub num_entries: u64,
    pub smallest: Vec<u8>,
    pub largest: Vec<u8>,
}

/// Builds a table file from a sorted stream of internal key-value pairs.
///
/// Used during:
/// - Memtable flush (sorted memtable → level-0 table)
/// - Compaction (merged iterator → new tables)
///
/// Build process:
/// 1. Add entries one by one (must be in strictly ascending order)
/// 2. Entries fill data blocks; a full block is written with its trailer
///    and indexed by its last key
/// 3. finish() writes the filter block, index block, footer, then fsyncs
pub struct TableBuilder {
    file: Box<dyn WritableFile>,
    icmp: InternalKeyComparator,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter: Option<FilterBlockBuilder>,
    /// Next write position in the file.
    offset: u64,
    block_size: usize,
    num_entries: u64,
    smallest: Option<Vec<u8>>,
    last_key: Vec<u8>,
}

impl TableBuilder {
    pub fn new(
        file: Box<dyn WritableFile>,
        icmp: InternalKeyComparator,
        policy: Option<Arc<dyn FilterPolicy>>,
        block_size: usize,
    ) -> Self {
        TableBuilder {
            file,
            icmp,
            data_block: BlockBuilder::new(BLOCK_RESTART_INTERVAL),
            // Index keys repeat little; restart every entry
            index_block: BlockBuilder::new(1),
            filter: policy.map(FilterBlockBuilder::new),
            offset: 0,
            block_size,
            num_entries: 0,
            smallest: None,
            last_key: Vec::new(),
        }
    }

    /// Add an internal key and value. MUST be called in strictly ascending
    /// internal-key order.
    ///
    /// # Panics
    /// Panics on out-of-order keys — a violated sort invariant means the
    /// caller is broken and the file would be unreadable.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.num_entries > 0 {
            assert!(
                self.icmp.compare(key, &self.last_key).is_gt(),
                "keys must be added in strictly ascending order"
            );
        }
        if self.smallest.is_none() {
            self.smallest = Some(key.to_vec());
        }
        if let Some(filter) = &mut self.filter {
            filter.add_key(extract_user_key(key));
        }

        self.data_block.add(key, value);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;

        if self.data_block.estimated_size() >= self.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Write the current data block and record its index entry.
    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let finished = std::mem::replace(
            &mut self.data_block,
            BlockBuilder::new(BLOCK_RESTART_INTERVAL),
        );
        let block_last_key = finished.last_key().to_vec();
        let handle = self.write_block(finished.build())?;
        self.index_block.add(&block_last_key, &handle.encode());
        Ok(())
    }

    /// Append a block plus its trailer; returns where it landed.
    fn write_block(&mut self, contents: Vec<u8>) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        let crc = block_crc(&contents, COMPRESSION_NONE);

        self.file.append(&contents)?;
        self.file.append(&[COMPRESSION_NONE])?;
        self.file.append(&crc.to_le_bytes())?;
        self.offset += contents.len() as u64 + super::BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    /// Finalize the table: flush the last data block, write filter block,
    /// index block, footer, then fsync for durability.
    pub fn finish(mut self) -> Result<TableStats> {
        self.flush_data_block()?;

        let filter_handle = match self.filter.take() {
            Some(filter) => self.write_block(filter.finish())?,
            None => BlockHandle::default(),
        };

        let index_contents = std::mem::replace(&mut self.index_block, BlockBuilder::new(1)).build();
        let index_handle = self.write_block(index_contents)?;

        let footer = Footer {
            filter_handle,
            index_handle,
        };
        self.file.append(&footer.encode())?;
        self.file.sync()?;

        Ok(TableStats {
            file_size: self.offset + Footer::SIZE as u64,
            num_entries: self.num_entries,
            smallest: self.smallest.unwrap_or_default(),
            largest: self.last_key,
        })
    }

    /// Entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far (excluding the unflushed block).
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::sstable::footer::Footer;
    use crate::storage::{DiskStorage, Storage};
    use crate::types::{ValueType, make_internal_key};
    use tempfile::tempdir;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn ik(user: &str, seq: u64) -> Vec<u8> {
        make_internal_key(user.as_bytes(), seq, ValueType::Put)
    }

    #[test]
    fn build_table_from_sorted_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        let storage = DiskStorage;

        let mut builder =
            TableBuilder::new(storage.new_writable(&path).unwrap(), icmp(), None, 4096);
        for i in 0..100u64 {
            let key = ik(&format!("key_{i:05}"), i + 1);
            builder.add(&key, format!("val_{i:05}").as_bytes()).unwrap();
        }
        let stats = builder.finish().unwrap();

        assert_eq!(stats.num_entries, 100);
        assert_eq!(extract_user_key(&stats.smallest), b"key_00000");
        assert_eq!(extract_user_key(&stats.largest), b"key_00099");
        assert_eq!(storage.file_size(&path).unwrap(), stats.file_size);
    }

    #[test]
    fn file_ends_with_valid_footer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        let storage = DiskStorage;

        let mut builder =
            TableBuilder::new(storage.new_writable(&path).unwrap(), icmp(), None, 64);
        for i in 0..50u64 {
            builder.add(&ik(&format!("k{i:04}"), i + 1), b"v").unwrap();
        }
        builder.finish().unwrap();

        let raw = storage.read_all(&path).unwrap();
        let footer = Footer::decode(&raw[raw.len() - Footer::SIZE..]).unwrap();
        assert!(footer.index_handle.size > 0);
        assert!(footer.filter_handle.is_null());
    }

    #[test]
    fn tiny_block_size_produces_many_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        let storage = DiskStorage;

        let mut builder =
            TableBuilder::new(storage.new_writable(&path).unwrap(), icmp(), None, 64);
        for i in 0..20u64 {
            builder
                .add(&ik(&format!("key_{i:05}"), i + 1), b"value_bytes")
                .unwrap();
        }
        let stats = builder.finish().unwrap();
        assert_eq!(stats.num_entries, 20);
        // Far larger than one 64-byte block plus overhead
        assert!(stats.file_size > 64 + Footer::SIZE as u64);
    }

    #[test]
    #[should_panic(expected = "ascending order")]
    fn out_of_order_add_panics() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        let storage = DiskStorage;

        let mut builder =
            TableBuilder::new(storage.new_writable(&path).unwrap(), icmp(), None, 4096);
        builder.add(&ik("b", 1), b"v").unwrap();
        builder.add(&ik("a", 2), b"v").unwrap();
    }
}

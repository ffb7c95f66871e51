use std::sync::Arc;

use crate::cache::TableCache;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::manifest::edit::FileMeta;
use crate::sstable::reader::TableIterator;

/// Chains the files of one level (> 0) into a single sorted cursor.
///
/// Works because deeper levels hold disjoint, range-sorted files: seeking
/// binary-searches the file list by largest key, and running off either
/// end of a file steps into its neighbor. Tables are opened lazily
/// through the table cache, one at a time.
pub struct ConcatIterator {
    cache: Arc<TableCache>,
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMeta>>,
    /// Index of the open file; `files.len()` when exhausted.
    index: usize,
    iter: Option<TableIterator>,
    verify_checksums: bool,
    fill_cache: bool,
}

impl ConcatIterator {
    pub fn new(
        cache: Arc<TableCache>,
        icmp: InternalKeyComparator,
        files: Vec<Arc<FileMeta>>,
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Self {
        let index = files.len();
        ConcatIterator {
            cache,
            icmp,
            files,
            index,
            iter: None,
            verify_checksums,
            fill_cache,
        }
    }

    fn open_file(&mut self, index: usize) -> Result<()> {
        self.index = index;
        if index >= self.files.len() {
            self.iter = None;
            return Ok(());
        }
        let file = &self.files[index];
        self.iter = Some(self.cache.table_iter(
            file.number,
            file.file_size,
            self.verify_checksums,
            self.fill_cache,
        )?);
        Ok(())
    }

    fn skip_forward(&mut self) -> Result<()> {
        while self.iter.as_ref().is_some_and(|it| !it.valid()) {
            if self.index + 1 >= self.files.len() {
                self.iter = None;
                return Ok(());
            }
            self.open_file(self.index + 1)?;
            if let Some(iter) = &mut self.iter {
                iter.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn skip_backward(&mut self) -> Result<()> {
        while self.iter.as_ref().is_some_and(|it| !it.valid()) {
            if self.index == 0 {
                self.iter = None;
                return Ok(());
            }
            self.open_file(self.index - 1)?;
            if let Some(iter) = &mut self.iter {
                iter.seek_to_last()?;
            }
        }
        Ok(())
    }
}

impl StorageIterator for ConcatIterator {
    fn valid(&self) -> bool {
        self.iter.as_ref().is_some_and(|it| it.valid())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.files.is_empty() {
            return Ok(());
        }
        self.open_file(0)?;
        if let Some(iter) = &mut self.iter {
            iter.seek_to_first()?;
        }
        self.skip_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.files.is_empty() {
            return Ok(());
        }
        self.open_file(self.files.len() - 1)?;
        if let Some(iter) = &mut self.iter {
            iter.seek_to_last()?;
        }
        self.skip_backward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        // First file whose largest key can cover the target
        let index = self
            .files
            .partition_point(|f| self.icmp.compare(&f.largest, target).is_lt());
        if index >= self.files.len() {
            self.iter = None;
            self.index = self.files.len();
            return Ok(());
        }
        self.open_file(index)?;
        if let Some(iter) = &mut self.iter {
            iter.seek(target)?;
        }
        self.skip_forward()
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        if let Some(iter) = &mut self.iter {
            iter.next()?;
        }
        self.skip_forward()
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        if let Some(iter) = &mut self.iter {
            iter.prev()?;
        }
        self.skip_backward()
    }

    fn key(&self) -> &[u8] {
        self.iter.as_ref().map_or(&[], |it| it.key())
    }

    fn value(&self) -> &[u8] {
        self.iter.as_ref().map_or(&[], |it| it.value())
    }
}

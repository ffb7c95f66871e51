use bytes::Bytes;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::encoding::get_varint32;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;

/// A decoded data/index block: the serialized entries plus the restart
/// array [`BlockBuilder`](super::builder::BlockBuilder) wrote.
///
/// Backed by [`Bytes`], so the block cache and any number of live
/// iterators share one allocation.
#[derive(Clone)]
pub struct Block {
    data: Bytes,
    num_restarts: u32,
    /// End of the entry region; the restart array begins here.
    restarts_offset: usize,
}

impl Block {
    pub fn decode(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too short".into()));
        }
        let num_restarts =
            u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap());
        let array_size = 4 + num_restarts as usize * 4;
        if data.len() < array_size {
            return Err(Error::Corruption("block restart array truncated".into()));
        }
        Ok(Block {
            restarts_offset: data.len() - array_size,
            num_restarts,
            data,
        })
    }

    fn restart_point(&self, index: u32) -> usize {
        let off = self.restarts_offset + index as usize * 4;
        u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap()) as usize
    }

    /// In-memory footprint, used as the cache charge.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self, cmp: InternalKeyComparator) -> BlockIterator {
        BlockIterator {
            block: self.clone(),
            cmp,
            current: self.restarts_offset,
            next_offset: self.restarts_offset,
            restart_index: 0,
            key: Vec::new(),
            value_start: 0,
            value_len: 0,
        }
    }
}

/// Cursor over one block. Binary-searches the restart array on seek, then
/// scans linearly inside a restart interval, rebuilding delta-compressed
/// keys as it goes.
pub struct BlockIterator {
    block: Block,
    cmp: InternalKeyComparator,
    /// Offset of the current entry; `restarts_offset` means invalid.
    current: usize,
    /// Offset just past the current entry's value.
    next_offset: usize,
    restart_index: u32,
    key: Vec<u8>,
    value_start: usize,
    value_len: usize,
}

impl BlockIterator {
    fn invalidate(&mut self) {
        self.current = self.block.restarts_offset;
        self.key.clear();
        self.value_len = 0;
    }

    fn seek_to_restart(&mut self, index: u32) {
        self.restart_index = index;
        self.key.clear();
        self.next_offset = self.block.restart_point(index);
        self.current = self.block.restarts_offset;
    }

    /// Parse the entry at `next_offset` into the cursor. Returns false at
    /// the end of the entry region.
    fn parse_next(&mut self) -> Result<bool> {
        let offset = self.next_offset;
        if offset >= self.block.restarts_offset {
            self.invalidate();
            return Ok(false);
        }
        let data = &self.block.data[..self.block.restarts_offset];
        let (shared, n1) = get_varint32(&data[offset..])?;
        let (non_shared, n2) = get_varint32(&data[offset + n1..])?;
        let (value_len, n3) = get_varint32(&data[offset + n1 + n2..])?;
        let key_start = offset + n1 + n2 + n3;
        let value_start = key_start + non_shared as usize;
        let next = value_start + value_len as usize;
        if shared as usize > self.key.len() || next > self.block.restarts_offset {
            return Err(Error::Corruption("block entry overruns block".into()));
        }

        self.key.truncate(shared as usize);
        self.key
            .extend_from_slice(&data[key_start..key_start + non_shared as usize]);
        self.value_start = value_start;
        self.value_len = value_len as usize;
        self.current = offset;
        self.next_offset = next;

        // Track which restart interval we're in (needed by prev)
        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) <= self.current
        {
            self.restart_index += 1;
        }
        Ok(true)
    }

    /// Full (shared = 0) key stored at a restart point, for binary search.
    fn restart_key(&self, index: u32) -> Result<&[u8]> {
        let offset = self.block.restart_point(index);
        let data = &self.block.data[..self.block.restarts_offset];
        let (_, n1) = get_varint32(&data[offset..])?;
        let (non_shared, n2) = get_varint32(&data[offset + n1..])?;
        let (_, n3) = get_varint32(&data[offset + n1 + n2..])?;
        let key_start = offset + n1 + n2 + n3;
        if key_start + non_shared as usize > data.len() {
            return Err(Error::Corruption("restart key overruns block".into()));
        }
        Ok(&data[key_start..key_start + non_shared as usize])
    }
}

impl StorageIterator for BlockIterator {
    fn valid(&self) -> bool {
        self.current < self.block.restarts_offset
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.seek_to_restart(0);
        self.parse_next()?;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.seek_to_restart(self.block.num_restarts - 1);
        // Walk to the final entry of the last interval
        while self.next_offset < self.block.restarts_offset {
            self.parse_next()?;
        }
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        // Largest restart whose key is < target; entries before it can't
        // match, entries after the next restart are all >= its key.
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            if self.cmp.compare(self.restart_key(mid)?, target).is_lt() {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart(left);
        while self.parse_next()? {
            if self.cmp.compare(&self.key, target).is_ge() {
                return Ok(());
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        self.parse_next()?;
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        let original = self.current;
        // Back up to the restart interval strictly before the current
        // entry, then replay forward to the entry preceding it.
        let mut restart = self.restart_index;
        while self.block.restart_point(restart) >= original {
            if restart == 0 {
                self.invalidate();
                return Ok(());
            }
            restart -= 1;
        }
        self.seek_to_restart(restart);
        loop {
            self.parse_next()?;
            if self.next_offset >= original {
                return Ok(());
            }
        }
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.block.data[self.value_start..self.value_start + self.value_len]
    }
}

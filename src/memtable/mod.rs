pub mod skiplist;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{
    ParsedInternalKey, SequenceNumber, Value, ValueType, make_internal_key,
};
use skiplist::SkipList;

/// In-memory sorted buffer for writes. Wraps a skip list keyed by encoded
/// internal keys.
///
/// Every write goes here first. When size exceeds the configured
/// threshold, the memtable is frozen (becomes immutable) and flushed to a
/// table file. Deletes are tombstone entries — the key can't simply be
/// removed because older versions may exist in table files on disk.
///
/// Shared as `Arc<MemTable>`: the single writer inserts while readers and
/// iterators hold references that keep the table alive until its flush
/// completes and the last reader is done.
pub struct MemTable {
    list: RwLock<SkipList>,
    icmp: InternalKeyComparator,
}

/// Outcome of a memtable lookup: the key may be live, deleted here, or
/// simply absent from this memtable (deeper sources must be consulted).
#[derive(Debug, PartialEq, Eq)]
pub enum LookupResult {
    Value(Value),
    Deleted,
    NotFound,
}

impl MemTable {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        MemTable {
            list: RwLock::new(SkipList::new(icmp.clone())),
            icmp,
        }
    }

    /// Insert one operation under its assigned sequence number.
    pub fn insert(&self, seq: SequenceNumber, tag: ValueType, user_key: &[u8], value: &[u8]) {
        let ikey = make_internal_key(user_key, seq, tag);
        self.list.write().insert(ikey, value.to_vec());
    }

    /// Look up the newest entry for `user_key` with sequence <= `ceiling`.
    pub fn get(&self, user_key: &[u8], ceiling: SequenceNumber) -> LookupResult {
        // The largest trailer visible at `ceiling` — seeking positions on
        // the newest qualifying entry for this user key, if any.
        let target = make_internal_key(user_key, ceiling, ValueType::Put);
        let list = self.list.read();
        let Some(index) = list.seek(&target) else {
            return LookupResult::NotFound;
        };
        let Some(parsed) = ParsedInternalKey::parse(list.key_at(index)) else {
            return LookupResult::NotFound;
        };
        if self
            .icmp
            .user_comparator()
            .compare(parsed.user_key, user_key)
            .is_ne()
        {
            return LookupResult::NotFound;
        }
        match parsed.value_type {
            ValueType::Put => LookupResult::Value(list.value_at(index).to_vec()),
            ValueType::Delete => LookupResult::Deleted,
        }
    }

    /// Current memory usage in bytes.
    pub fn approximate_size(&self) -> usize {
        self.list.read().size_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    /// Sorted iterator over all entries (including tombstones), keyed by
    /// internal key. Holds the memtable alive while it exists.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            mem: Arc::clone(self),
            current: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }
}

/// Iterator over memtable entries in internal-key order.
///
/// Arena indices are stable (nodes are never removed or moved), so the
/// iterator stores the current index and copies the entry out under a
/// brief read lock on each movement — no lock is held between calls.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    current: Option<usize>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl MemTableIterator {
    fn load(&mut self, index: Option<usize>) {
        self.current = index;
        match index {
            Some(idx) => {
                let list = self.mem.list.read();
                self.key.clear();
                self.key.extend_from_slice(list.key_at(idx));
                self.value.clear();
                self.value.extend_from_slice(list.value_at(idx));
            }
            None => {
                self.key.clear();
                self.value.clear();
            }
        }
    }
}

impl StorageIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let first = self.mem.list.read().first();
        self.load(first);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let last = self.mem.list.read().last();
        self.load(last);
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let index = self.mem.list.read().seek(target);
        self.load(index);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        let next = self
            .current
            .and_then(|idx| self.mem.list.read().next_of(idx));
        self.load(next);
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        // The arena is singly linked; step back by seeking for the last
        // node ordered before the current key.
        let prev = self.mem.list.read().seek_before(&self.key);
        self.load(prev);
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}

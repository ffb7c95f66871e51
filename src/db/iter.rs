use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::db::snapshot::Snapshot;
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::iterator::merge::MergeIterator;
use crate::manifest::version::Version;
use crate::memtable::MemTable;
use crate::types::{
    ParsedInternalKey, SequenceNumber, ValueType, extract_user_key, make_internal_key,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// The user-facing cursor: wraps a merge over every live source and
/// presents plain user keys, showing exactly one version of each key —
/// the newest visible at the iterator's sequence ceiling — and hiding
/// tombstoned keys entirely.
///
/// Creating the iterator pinned the memtables and version it reads from
/// (held here as `Arc`s), so compaction can retire those files without
/// pulling them out from under us.
pub struct DBIterator {
    inner: MergeIterator,
    icmp: InternalKeyComparator,
    /// Nothing newer than this sequence is visible.
    sequence: SequenceNumber,
    direction: Direction,
    is_valid: bool,
    /// In Reverse mode the current entry lives here rather than under
    /// the inner cursor; Forward mode uses `saved_key` as the skip target.
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,

    // Pins: keep the sources of `inner` alive.
    _memtables: Vec<Arc<MemTable>>,
    _version: Arc<Version>,
    _snapshot: Option<Snapshot>,
}

impl DBIterator {
    pub(crate) fn new(
        inner: MergeIterator,
        icmp: InternalKeyComparator,
        sequence: SequenceNumber,
        memtables: Vec<Arc<MemTable>>,
        version: Arc<Version>,
        snapshot: Option<Snapshot>,
    ) -> Self {
        DBIterator {
            inner,
            icmp,
            sequence,
            direction: Direction::Forward,
            is_valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            _memtables: memtables,
            _version: version,
            _snapshot: snapshot,
        }
    }

    pub fn valid(&self) -> bool {
        self.is_valid
    }

    /// Current user key. Only valid when `valid()`.
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.is_valid);
        match self.direction {
            Direction::Forward => extract_user_key(self.inner.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    /// Current value. Only valid when `valid()`.
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.is_valid);
        match self.direction {
            Direction::Forward => self.inner.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.inner.seek_to_first()?;
        if self.inner.valid() {
            self.find_next_user_entry(false)
        } else {
            self.is_valid = false;
            Ok(())
        }
    }

    pub fn seek_to_last(&mut self) -> Result<()> {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.inner.seek_to_last()?;
        self.find_prev_user_entry()
    }

    /// Position at the first visible entry with user key >= target.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        // Newest possible entry for the target at our ceiling
        let internal_target = make_internal_key(target, self.sequence, ValueType::Put);
        self.inner.seek(&internal_target)?;
        if self.inner.valid() {
            self.saved_key.clear();
            self.find_next_user_entry(false)
        } else {
            self.is_valid = false;
            Ok(())
        }
    }

    pub fn next(&mut self) -> Result<()> {
        debug_assert!(self.is_valid);
        if self.direction == Direction::Reverse {
            // The inner cursor sits before the entries for saved_key;
            // step it back onto (or past) them and resume forward.
            self.direction = Direction::Forward;
            if !self.inner.valid() {
                self.inner.seek_to_first()?;
            } else {
                self.inner.next()?;
            }
            if !self.inner.valid() {
                self.is_valid = false;
                self.saved_key.clear();
                return Ok(());
            }
            // saved_key still holds the key we just emitted — skip its
            // remaining (older or deleted) entries below.
        } else {
            self.saved_key.clear();
            self.saved_key.extend_from_slice(extract_user_key(self.inner.key()));
            self.inner.next()?;
            if !self.inner.valid() {
                self.is_valid = false;
                self.saved_key.clear();
                return Ok(());
            }
        }
        self.find_next_user_entry(true)
    }

    pub fn prev(&mut self) -> Result<()> {
        debug_assert!(self.is_valid);
        if self.direction == Direction::Forward {
            // Back the inner cursor off every entry for the current key.
            self.saved_key.clear();
            self.saved_key.extend_from_slice(extract_user_key(self.inner.key()));
            loop {
                self.inner.prev()?;
                if !self.inner.valid() {
                    self.is_valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return Ok(());
                }
                if self
                    .icmp
                    .user_comparator()
                    .compare(extract_user_key(self.inner.key()), &self.saved_key)
                    .is_lt()
                {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry()
    }

    /// Advance the inner cursor to the newest visible, non-deleted entry
    /// of the next acceptable user key. With `skipping`, entries for user
    /// keys <= `saved_key` are hidden (they are older versions of a key
    /// already emitted, or shadowed by a deletion just seen).
    fn find_next_user_entry(&mut self, mut skipping: bool) -> Result<()> {
        debug_assert_eq!(self.direction, Direction::Forward);
        while self.inner.valid() {
            if let Some(parsed) = ParsedInternalKey::parse(self.inner.key()) {
                if parsed.sequence <= self.sequence {
                    match parsed.value_type {
                        ValueType::Delete => {
                            // Every older entry for this key is shadowed
                            self.saved_key.clear();
                            self.saved_key.extend_from_slice(parsed.user_key);
                            skipping = true;
                        }
                        ValueType::Put => {
                            let hidden = skipping
                                && self
                                    .icmp
                                    .user_comparator()
                                    .compare(parsed.user_key, &self.saved_key)
                                    .is_le();
                            if !hidden {
                                self.is_valid = true;
                                self.saved_key.clear();
                                return Ok(());
                            }
                        }
                    }
                }
            }
            self.inner.next()?;
        }
        self.saved_key.clear();
        self.is_valid = false;
        Ok(())
    }

    /// Walk the inner cursor backwards, remembering the newest visible
    /// entry of each key as it passes, and stop once the cursor moves to
    /// an earlier user key — what's remembered is then the newest visible
    /// version of the key being emitted.
    fn find_prev_user_entry(&mut self) -> Result<()> {
        debug_assert_eq!(self.direction, Direction::Reverse);
        let mut last_type = ValueType::Delete;
        while self.inner.valid() {
            if let Some(parsed) = ParsedInternalKey::parse(self.inner.key()) {
                if parsed.sequence <= self.sequence {
                    if last_type != ValueType::Delete
                        && self
                            .icmp
                            .user_comparator()
                            .compare(parsed.user_key, &self.saved_key)
                            .is_lt()
                    {
                        // A live entry is saved and we've moved past its
                        // key: emit it.
                        break;
                    }
                    last_type = parsed.value_type;
                    match parsed.value_type {
                        ValueType::Delete => {
                            self.saved_key.clear();
                            self.saved_value.clear();
                        }
                        ValueType::Put => {
                            self.saved_key.clear();
                            self.saved_key.extend_from_slice(parsed.user_key);
                            self.saved_value.clear();
                            self.saved_value.extend_from_slice(self.inner.value());
                        }
                    }
                }
            }
            self.inner.prev()?;
        }

        if last_type == ValueType::Delete {
            // Ran out of entries without a live value
            self.is_valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.is_valid = true;
        }
        Ok(())
    }
}

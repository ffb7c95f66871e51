use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::StorageIterator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtables + all table levels
/// - Compaction (merging the selected input files)
///
/// A k-way merge by repeated minimum: children are each positioned at
/// their next candidate, and the cursor is the child with the least
/// internal key (ties broken by child order, so callers list newer
/// sources first and the newest duplicate wins). Walking backwards flips
/// the invariant: every child sits *before* the cursor key and the
/// largest wins. Switching direction repositions every child.
pub struct MergeIterator {
    icmp: InternalKeyComparator,
    children: Vec<Box<dyn StorageIterator>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergeIterator {
    /// `children` ordered newest source first — the tie-break depends on it.
    pub fn new(icmp: InternalKeyComparator, children: Vec<Box<dyn StorageIterator>>) -> Self {
        MergeIterator {
            icmp,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match smallest {
                None => smallest = Some(i),
                Some(s) => {
                    if self.icmp.compare(child.key(), self.children[s].key()).is_lt() {
                        smallest = Some(i);
                    }
                }
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match largest {
                None => largest = Some(i),
                Some(l) => {
                    if self.icmp.compare(child.key(), self.children[l].key()).is_gt() {
                        largest = Some(i);
                    }
                }
            }
        }
        self.current = largest;
    }
}

impl StorageIterator for MergeIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_last()?;
        }
        self.direction = Direction::Reverse;
        self.find_largest();
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(target)?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        let current = self.current.unwrap();

        if self.direction == Direction::Reverse {
            // Children other than the cursor sit before the cursor key;
            // put each at its first entry past it.
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key)?;
                if child.valid() && self.icmp.compare(child.key(), &key).is_eq() {
                    child.next()?;
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next()?;
        self.find_smallest();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        let current = self.current.unwrap();

        if self.direction == Direction::Forward {
            // Children other than the cursor sit at-or-after the cursor
            // key; put each at its last entry before it.
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key)?;
                if child.valid() {
                    child.prev()?;
                } else {
                    child.seek_to_last()?;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev()?;
        self.find_largest();
        Ok(())
    }

    fn key(&self) -> &[u8] {
        self.children[self.current.unwrap()].key()
    }

    fn value(&self) -> &[u8] {
        self.children[self.current.unwrap()].value()
    }
}

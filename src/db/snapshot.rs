use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::SequenceNumber;

/// Registry of live snapshots, keyed by captured sequence number.
///
/// Compaction consults [`smallest`](SnapshotList::smallest) before
/// dropping overwritten versions or tombstones: nothing visible at or
/// below the oldest live snapshot may be discarded.
#[derive(Default)]
pub struct SnapshotList {
    refs: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    pub fn new() -> Arc<Self> {
        Arc::new(SnapshotList::default())
    }

    pub fn acquire(self: &Arc<Self>, sequence: SequenceNumber) -> Snapshot {
        *self.refs.lock().entry(sequence).or_insert(0) += 1;
        Snapshot {
            inner: Arc::new(SnapshotHandle {
                sequence,
                list: Arc::clone(self),
            }),
        }
    }

    /// Oldest sequence any live snapshot still needs.
    pub fn smallest(&self) -> Option<SequenceNumber> {
        self.refs.lock().keys().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.lock().is_empty()
    }

    fn release(&self, sequence: SequenceNumber) {
        let mut refs = self.refs.lock();
        if let Some(count) = refs.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                refs.remove(&sequence);
            }
        }
    }
}

struct SnapshotHandle {
    sequence: SequenceNumber,
    list: Arc<SnapshotList>,
}

impl Drop for SnapshotHandle {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

/// A frozen point-in-time view: reads through it observe the database
/// exactly as of the captured sequence number. Cheap to clone; the view
/// is released when the last clone is dropped (or explicitly via
/// [`DB::release_snapshot`](crate::db::DB::release_snapshot)).
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotHandle>,
}

impl Snapshot {
    pub fn sequence(&self) -> SequenceNumber {
        self.inner.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_tracks_live_snapshots() {
        let list = SnapshotList::new();
        assert_eq!(list.smallest(), None);

        let s10 = list.acquire(10);
        let s5 = list.acquire(5);
        let s20 = list.acquire(20);
        assert_eq!(list.smallest(), Some(5));

        drop(s5);
        assert_eq!(list.smallest(), Some(10));
        drop(s10);
        drop(s20);
        assert_eq!(list.smallest(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn clones_share_one_registration() {
        let list = SnapshotList::new();
        let a = list.acquire(7);
        let b = a.clone();
        drop(a);
        // Still held through the clone
        assert_eq!(list.smallest(), Some(7));
        drop(b);
        assert_eq!(list.smallest(), None);
    }

    #[test]
    fn duplicate_sequences_refcount() {
        let list = SnapshotList::new();
        let a = list.acquire(3);
        let b = list.acquire(3);
        drop(a);
        assert_eq!(list.smallest(), Some(3));
        drop(b);
        assert_eq!(list.smallest(), None);
    }
}

pub mod concat;
pub mod merge;

use crate::error::Result;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (memtable, block, table file, merged view)
/// implements this trait, which makes them composable — [`merge::MergeIterator`]
/// takes `Vec<Box<dyn StorageIterator>>` and merges them into one stream.
///
/// Position-based rather than `Iterator`-based: the cursor can move both
/// directions and be repositioned with seeks, and `key()`/`value()` stay
/// readable until the next movement.
pub trait StorageIterator {
    /// Returns true if the iterator is positioned at a valid entry.
    fn valid(&self) -> bool;

    /// Position at the first entry. The iterator is valid afterwards iff
    /// the source is non-empty.
    fn seek_to_first(&mut self) -> Result<()>;

    /// Position at the last entry.
    fn seek_to_last(&mut self) -> Result<()>;

    /// Position at the first entry with key >= target.
    fn seek(&mut self, target: &[u8]) -> Result<()>;

    /// Advance to the next entry. Requires `valid()`.
    fn next(&mut self) -> Result<()>;

    /// Retreat to the previous entry. Requires `valid()`; invalid after
    /// retreating past the first entry.
    fn prev(&mut self) -> Result<()>;

    /// Current key. Only valid when `valid()` is true.
    fn key(&self) -> &[u8];

    /// Current value. Only valid when `valid()` is true.
    fn value(&self) -> &[u8];
}

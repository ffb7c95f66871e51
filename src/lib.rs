//! # stratadb
//!
//! An embeddable, ordered, persistent key-value store using the
//! Log-Structured Merge-Tree design.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! This turns random writes into sequential writes — 100-1000x faster
//! on real hardware.
//!
//! Writes land in a write-ahead log and an in-memory skip list; full
//! memtables are frozen and flushed to sorted table files; background
//! compaction merges overlapping tables down the levels; a versioned
//! manifest records which files make up the current database state.

pub mod batch;
pub mod bloom;
pub mod cache;
pub mod comparator;
pub mod compaction;
pub mod db;
pub mod encoding;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod storage;
pub mod types;
pub mod wal;

// Public re-exports for the top-level API
pub use batch::WriteBatch;
pub use db::{DB, Options, ReadOptions, Snapshot, WriteOptions};
pub use error::{Error, Result};

//! Compaction planning: which files to merge, where the output goes, and
//! when a tombstone may finally be dropped.
//!
//! The state machine per compaction is Idle → Planning → Merging →
//! Installing → Idle. Planning happens in
//! [`VersionSet::pick_compaction`](crate::manifest::VersionSet::pick_compaction);
//! the merge loop and the install live on the engine's background worker.

use std::sync::Arc;

use crate::manifest::edit::{FileMeta, VersionEdit};
use crate::manifest::version::Version;

/// Level-0 file count that triggers a compaction.
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Level-0 file count at which incoming writes are slowed down.
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level-0 file count at which writes stop until compaction catches up.
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Target size for compaction output files.
pub const MAX_OUTPUT_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Byte budget per level, growing 10x with depth: level 1 holds 10 MiB,
/// level 2 100 MiB, and so on. Level 0 is scored by file count instead.
pub fn max_bytes_for_level(level: usize) -> u64 {
    debug_assert!(level >= 1);
    let mut bytes: u64 = 10 * 1024 * 1024;
    for _ in 1..level {
        bytes *= 10;
    }
    bytes
}

/// A planned merge: the chosen files of `level` and every overlapping
/// file of `level + 1`, plus the edit that will install the result.
/// Holds the version it was planned against so the input files cannot be
/// deleted mid-merge.
pub struct Compaction {
    pub level: usize,
    /// `inputs[0]` = files from `level`, `inputs[1]` = files from
    /// `level + 1`.
    pub inputs: [Vec<Arc<FileMeta>>; 2],
    pub edit: VersionEdit,
    version: Arc<Version>,
}

impl Compaction {
    pub fn new(
        level: usize,
        inputs: [Vec<Arc<FileMeta>>; 2],
        edit: VersionEdit,
        version: Arc<Version>,
    ) -> Self {
        Compaction {
            level,
            inputs,
            edit,
            version,
        }
    }

    pub fn output_level(&self) -> usize {
        self.level + 1
    }

    pub fn num_input_files(&self) -> usize {
        self.inputs[0].len() + self.inputs[1].len()
    }

    pub fn input_bytes(&self) -> u64 {
        self.inputs
            .iter()
            .flatten()
            .map(|f| f.file_size)
            .sum()
    }

    /// A single input file with nothing to merge against can be installed
    /// in the next level by a metadata-only move.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs[0].len() == 1 && self.inputs[1].is_empty()
    }

    /// True when no level below the output can contain `user_key`. Only
    /// then may a tombstone for it be dropped: otherwise the deletion
    /// must survive to keep shadowing an older value further down.
    pub fn is_base_level_for_key(&self, user_key: &[u8]) -> bool {
        self.version.no_deeper_overlap(user_key, self.output_level())
    }

    /// Record every input file as deleted in the install edit.
    pub fn add_input_deletions(&mut self) {
        for (which, level) in [(0, self.level), (1, self.output_level())] {
            for file in &self.inputs[which] {
                self.edit.remove_file(level, file.number);
            }
        }
    }

    /// The version this compaction was planned against.
    pub fn version(&self) -> &Arc<Version> {
        &self.version
    }
}

/// Bytes and wall time spent by flushes/compactions, surfaced in the
/// stats property.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionStats {
    pub micros: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl CompactionStats {
    pub fn add(&mut self, other: &CompactionStats) {
        self.micros += other.micros;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
    }
}

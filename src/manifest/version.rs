use std::sync::Arc;

use crate::cache::TableCache;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::manifest::NUM_LEVELS;
use crate::manifest::edit::FileMeta;
use crate::memtable::LookupResult;
use crate::types::{
    ParsedInternalKey, SequenceNumber, ValueType, extract_user_key, make_internal_key,
};

/// An immutable snapshot of the file organization: per level, the ordered
/// set of live table files.
///
/// Versions are never mutated — applying a [`VersionEdit`](super::VersionEdit)
/// derives a new one. Shared as `Arc<Version>`; iterators, compactions and
/// snapshots keep old versions (and thereby their files) alive simply by
/// holding the `Arc`.
///
/// Invariants: within level 0 files may overlap and are consulted newest
/// first; within any deeper level files are disjoint and sorted by key
/// range.
pub struct Version {
    icmp: InternalKeyComparator,
    pub files: Vec<Vec<Arc<FileMeta>>>,
    /// Precomputed by the version set when the version is installed:
    /// the level most in need of compaction and how urgently (>= 1.0
    /// means overdue).
    pub(crate) compaction_level: usize,
    pub(crate) compaction_score: f64,
}

impl Version {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Version {
            icmp,
            files: vec![Vec::new(); NUM_LEVELS],
            compaction_level: 0,
            compaction_score: 0.0,
        }
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Total bytes of table data in a level.
    pub fn level_bytes(&self, level: usize) -> u64 {
        self.files[level].iter().map(|f| f.file_size).sum()
    }

    /// Highest level with any files.
    pub fn max_populated_level(&self) -> usize {
        (0..NUM_LEVELS)
            .rev()
            .find(|&level| !self.files[level].is_empty())
            .unwrap_or(0)
    }

    /// Point lookup across the levels, newest source first.
    pub fn get(
        &self,
        user_key: &[u8],
        ceiling: SequenceNumber,
        cache: &TableCache,
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<LookupResult> {
        let target = make_internal_key(user_key, ceiling, ValueType::Put);
        let ucmp = self.icmp.user_comparator();

        // Level 0 files overlap; probe every candidate, newest file first.
        let mut level0: Vec<&Arc<FileMeta>> = self.files[0]
            .iter()
            .filter(|f| {
                ucmp.compare(user_key, extract_user_key(&f.smallest)).is_ge()
                    && ucmp.compare(user_key, extract_user_key(&f.largest)).is_le()
            })
            .collect();
        level0.sort_by(|a, b| b.number.cmp(&a.number));
        for file in level0 {
            if let Some(result) =
                self.search_file(file, &target, user_key, cache, verify_checksums, fill_cache)?
            {
                return Ok(result);
            }
        }

        // Deeper levels are disjoint: at most one file can hold the key.
        for level in 1..NUM_LEVELS {
            let files = &self.files[level];
            let index = files.partition_point(|f| self.icmp.compare(&f.largest, &target).is_lt());
            if index >= files.len() {
                continue;
            }
            let file = &files[index];
            if ucmp.compare(user_key, extract_user_key(&file.smallest)).is_lt() {
                continue;
            }
            if let Some(result) =
                self.search_file(file, &target, user_key, cache, verify_checksums, fill_cache)?
            {
                return Ok(result);
            }
        }
        Ok(LookupResult::NotFound)
    }

    fn search_file(
        &self,
        file: &FileMeta,
        target: &[u8],
        user_key: &[u8],
        cache: &TableCache,
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<Option<LookupResult>> {
        let Some((ikey, value)) =
            cache.table_get(file.number, file.file_size, target, verify_checksums, fill_cache)?
        else {
            return Ok(None);
        };
        let Some(parsed) = ParsedInternalKey::parse(&ikey) else {
            return Ok(None);
        };
        if self
            .icmp
            .user_comparator()
            .compare(parsed.user_key, user_key)
            .is_ne()
        {
            return Ok(None);
        }
        Ok(Some(match parsed.value_type {
            ValueType::Put => LookupResult::Value(value),
            ValueType::Delete => LookupResult::Deleted,
        }))
    }

    /// Files in `level` whose user-key range touches `[begin, end]`
    /// (either bound may be open). For level 0 the range is grown to cover
    /// every transitively overlapping file, since level-0 files overlap
    /// each other and a compaction must take the whole cluster.
    pub fn overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<FileMeta>> {
        let ucmp = self.icmp.user_comparator();
        let mut begin = begin.map(|b| b.to_vec());
        let mut end = end.map(|e| e.to_vec());
        let mut inputs: Vec<Arc<FileMeta>> = Vec::new();

        let mut i = 0;
        while i < self.files[level].len() {
            let file = &self.files[level][i];
            i += 1;
            let file_start = extract_user_key(&file.smallest);
            let file_end = extract_user_key(&file.largest);
            if begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_end, b).is_lt())
                || end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_start, e).is_gt())
            {
                continue;
            }

            inputs.push(Arc::clone(file));
            if level == 0 {
                // This file may widen the range; restart with the union
                if begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b).is_lt())
                {
                    begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_end, e).is_gt())
                {
                    end = Some(file_end.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// True when no level deeper than `level` can contain `user_key` —
    /// the test that makes dropping a tombstone safe.
    pub fn no_deeper_overlap(&self, user_key: &[u8], level: usize) -> bool {
        let ucmp = self.icmp.user_comparator();
        for deeper in level + 1..NUM_LEVELS {
            for file in &self.files[deeper] {
                if ucmp.compare(user_key, extract_user_key(&file.smallest)).is_ge()
                    && ucmp.compare(user_key, extract_user_key(&file.largest)).is_le()
                {
                    return false;
                }
            }
        }
        true
    }

    pub(crate) fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// One line per populated level, for the stats property.
    pub fn level_summary(&self) -> String {
        let mut out = String::new();
        for level in 0..NUM_LEVELS {
            if !self.files[level].is_empty() {
                out.push_str(&format!(
                    "level {}: {} files, {} bytes\n",
                    level,
                    self.num_files(level),
                    self.level_bytes(level)
                ));
            }
        }
        out
    }
}

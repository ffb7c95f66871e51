use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use log::info;

use crate::compaction::{Compaction, L0_COMPACTION_TRIGGER, max_bytes_for_level};
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::db::filename::{manifest_file_name, read_current_file, set_current_file};
use crate::error::{Error, Result};
use crate::manifest::NUM_LEVELS;
use crate::manifest::edit::{FileMeta, VersionEdit};
use crate::manifest::version::Version;
use crate::storage::Storage;
use crate::types::{SequenceNumber, extract_user_key};
use crate::wal::{LogReader, LogWriter};

/// Owns the current [`Version`] and the durable manifest log that can
/// reconstruct it.
///
/// Every change to the file organization funnels through
/// [`log_and_apply`](VersionSet::log_and_apply): the edit is appended to
/// the manifest and synced *before* the in-memory current version is
/// swapped, so a crash at any point leaves a replayable state. Old
/// versions stay alive only while an iterator or compaction holds their
/// `Arc`; the set tracks them weakly for garbage collection.
pub struct VersionSet {
    storage: Arc<dyn Storage>,
    dir: PathBuf,
    icmp: InternalKeyComparator,
    current: Arc<Version>,
    live_versions: Vec<Weak<Version>>,

    manifest_log: Option<LogWriter>,
    manifest_number: u64,
    next_file_number: u64,
    last_sequence: SequenceNumber,
    /// WALs numbered below this are fully flushed.
    log_number: u64,
    compact_pointers: Vec<Vec<u8>>,
}

impl VersionSet {
    pub fn new(storage: Arc<dyn Storage>, dir: PathBuf, icmp: InternalKeyComparator) -> Self {
        let current = Arc::new(Version::new(icmp.clone()));
        VersionSet {
            storage,
            dir,
            icmp,
            live_versions: vec![Arc::downgrade(&current)],
            current,
            manifest_log: None,
            manifest_number: 0,
            next_file_number: 2,
            last_sequence: 0,
            log_number: 0,
            compact_pointers: vec![Vec::new(); NUM_LEVELS],
        }
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        debug_assert!(seq >= self.last_sequence);
        self.last_sequence = seq;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn manifest_number(&self) -> u64 {
        self.manifest_number
    }

    /// Allocate a fresh file number (tables, WALs, manifests share one
    /// namespace).
    pub fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    /// Rebuild the current version by replaying the manifest named in
    /// CURRENT. The comparator recorded there must match ours.
    pub fn recover(&mut self) -> Result<()> {
        let manifest_number = read_current_file(self.storage.as_ref(), &self.dir)?;
        let manifest_path = manifest_file_name(&self.dir, manifest_number);
        let data = self.storage.read_all(&manifest_path)?;

        let mut builder = VersionBuilder::new(self.current());
        let mut next_file = None;
        let mut last_seq = None;
        let mut log_number = None;

        let reader = LogReader::new(data);
        for record in reader.iter() {
            let edit = VersionEdit::decode(&record?)?;
            if let Some(name) = &edit.comparator_name {
                let ours = self.icmp.user_comparator().name();
                if name != ours {
                    return Err(Error::InvalidArgument(format!(
                        "comparator mismatch: database uses {name}, options supply {ours}"
                    )));
                }
            }
            for (level, key) in &edit.compact_pointers {
                self.compact_pointers[*level] = key.clone();
            }
            if edit.next_file_number.is_some() {
                next_file = edit.next_file_number;
            }
            if edit.last_sequence.is_some() {
                last_seq = edit.last_sequence;
            }
            if edit.log_number.is_some() {
                log_number = edit.log_number;
            }
            builder.apply(&edit);
        }

        let (Some(next_file), Some(last_seq), Some(log_number)) =
            (next_file, last_seq, log_number)
        else {
            return Err(Error::Corruption(
                "manifest missing meta fields (next file / last sequence / log number)".into(),
            ));
        };

        self.install(Arc::new(builder.finish(&self.icmp)));
        self.manifest_number = manifest_number;
        self.next_file_number = next_file;
        self.last_sequence = last_seq;
        self.log_number = log_number;
        self.mark_file_number_used(manifest_number);
        self.mark_file_number_used(log_number);
        info!(
            "recovered manifest {}: last_sequence={}, log={}",
            manifest_number, last_seq, log_number
        );
        Ok(())
    }

    /// Durably log `edit`, then swap in the version it produces. The
    /// single atomic commit point for flushes and compactions: on any
    /// error the previous version stays current and the on-disk state
    /// remains the old manifest.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<Arc<Version>> {
        if edit.log_number.is_none() {
            edit.log_number = Some(self.log_number);
        }
        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);

        let mut builder = VersionBuilder::new(self.current());
        for (level, key) in &edit.compact_pointers {
            self.compact_pointers[*level] = key.clone();
        }
        builder.apply(edit);
        let version = Arc::new(builder.finish(&self.icmp));

        // First edit after open/recovery starts a fresh manifest seeded
        // with a full snapshot of the current state.
        let mut created_manifest = None;
        if self.manifest_log.is_none() {
            let number = self.new_file_number();
            edit.next_file_number = Some(self.next_file_number);
            let path = manifest_file_name(&self.dir, number);
            let file = self.storage.new_writable(&path)?;
            let mut log = LogWriter::new(file);
            let snapshot = self.snapshot_edit();
            log.add_record(&snapshot.encode())?;
            self.manifest_log = Some(log);
            created_manifest = Some(number);
        }

        let write_result = (|| {
            let log = self.manifest_log.as_mut().unwrap();
            log.add_record(&edit.encode())?;
            log.sync()?;
            if let Some(number) = created_manifest {
                set_current_file(self.storage.as_ref(), &self.dir, number)?;
            }
            Ok(())
        })();

        if let Err(e) = write_result {
            // Abandon a half-born manifest; CURRENT still names the old one
            if let Some(number) = created_manifest {
                self.manifest_log = None;
                let _ = self
                    .storage
                    .remove_file(&manifest_file_name(&self.dir, number));
            }
            return Err(e);
        }
        if let Some(number) = created_manifest {
            self.manifest_number = number;
        }

        self.log_number = edit.log_number.unwrap();
        self.install(Arc::clone(&version));
        Ok(version)
    }

    fn install(&mut self, version: Arc<Version>) {
        self.live_versions.retain(|w| w.strong_count() > 0);
        self.live_versions.push(Arc::downgrade(&version));
        self.current = version;
    }

    /// Full current state as one edit — the first record of a new manifest.
    fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit::new();
        edit.comparator_name = Some(self.icmp.user_comparator().name().to_string());
        edit.log_number = Some(self.log_number);
        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);
        for (level, key) in self.compact_pointers.iter().enumerate() {
            if !key.is_empty() {
                edit.set_compact_pointer(level, key.clone());
            }
        }
        for level in 0..NUM_LEVELS {
            for file in &self.current.files[level] {
                edit.add_file(level, FileMeta::clone(file));
            }
        }
        edit
    }

    /// Table files referenced by any version still reachable from an
    /// iterator, snapshot, or pending compaction — the set GC must spare.
    pub fn live_files(&mut self) -> HashSet<u64> {
        self.live_versions.retain(|w| w.strong_count() > 0);
        let mut live = HashSet::new();
        for weak in &self.live_versions {
            if let Some(version) = weak.upgrade() {
                for level in 0..NUM_LEVELS {
                    for file in &version.files[level] {
                        live.insert(file.number);
                    }
                }
            }
        }
        live
    }

    /// Whether any level is due for compaction.
    pub fn needs_compaction(&self) -> bool {
        self.current.compaction_score >= 1.0
    }

    /// Plan the most urgent size/count-triggered compaction, if any.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let version = self.current();
        if version.compaction_score < 1.0 {
            return None;
        }
        let level = version.compaction_level;

        // Round-robin within the level: resume after the last compacted
        // key range so every file eventually gets its turn.
        let pointer = &self.compact_pointers[level];
        let mut first = version
            .files[level]
            .iter()
            .find(|f| pointer.is_empty() || self.icmp.compare(&f.largest, pointer).is_gt())
            .cloned();
        if first.is_none() {
            first = version.files[level].first().cloned();
        }
        let seed = first?;

        let inputs0 = if level == 0 {
            let begin = extract_user_key(&seed.smallest).to_vec();
            let end = extract_user_key(&seed.largest).to_vec();
            version.overlapping_inputs(0, Some(&begin), Some(&end))
        } else {
            vec![seed]
        };
        Some(self.setup_other_inputs(level, version, inputs0))
    }

    /// Plan a manual compaction of `level` covering `[begin, end]`.
    pub fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Option<Compaction> {
        let version = self.current();
        let inputs0 = version.overlapping_inputs(level, begin, end);
        if inputs0.is_empty() {
            return None;
        }
        Some(self.setup_other_inputs(level, version, inputs0))
    }

    fn setup_other_inputs(
        &mut self,
        level: usize,
        version: Arc<Version>,
        inputs0: Vec<Arc<FileMeta>>,
    ) -> Compaction {
        let (begin, end) = user_key_range(&self.icmp, &inputs0);
        let inputs1 = version.overlapping_inputs(level + 1, Some(&begin), Some(&end));

        let mut edit = VersionEdit::new();
        let largest = inputs0
            .iter()
            .map(|f| &f.largest)
            .max_by(|a, b| self.icmp.compare(a, b))
            .cloned()
            .unwrap_or_default();
        self.compact_pointers[level] = largest.clone();
        edit.set_compact_pointer(level, largest);

        Compaction::new(level, [inputs0, inputs1], edit, version)
    }

    /// Rough byte offset of `ikey` within the database, at file
    /// granularity: whole files before it count fully, a file straddling
    /// it counts half.
    pub fn approximate_offset_of(&self, version: &Version, ikey: &[u8]) -> u64 {
        let mut offset = 0;
        for level in 0..NUM_LEVELS {
            for file in &version.files[level] {
                if self.icmp.compare(&file.largest, ikey).is_le() {
                    offset += file.file_size;
                } else if self.icmp.compare(&file.smallest, ikey).is_lt() {
                    offset += file.file_size / 2;
                }
            }
        }
        offset
    }
}

/// Score each level and stamp the winner on the version: level 0 by file
/// count (every file is consulted on reads), deeper levels by byte size
/// against their geometric budget.
fn finalize(version: &mut Version) {
    let mut best_level = 0;
    let mut best_score = 0.0_f64;
    for level in 0..NUM_LEVELS - 1 {
        let score = if level == 0 {
            version.num_files(0) as f64 / L0_COMPACTION_TRIGGER as f64
        } else {
            version.level_bytes(level) as f64 / max_bytes_for_level(level) as f64
        };
        if score > best_score {
            best_score = score;
            best_level = level;
        }
    }
    version.compaction_level = best_level;
    version.compaction_score = best_score;
}

fn user_key_range(icmp: &InternalKeyComparator, files: &[Arc<FileMeta>]) -> (Vec<u8>, Vec<u8>) {
    let mut begin: Option<&[u8]> = None;
    let mut end: Option<&[u8]> = None;
    let ucmp = icmp.user_comparator();
    for file in files {
        let s = extract_user_key(&file.smallest);
        let l = extract_user_key(&file.largest);
        if begin.is_none() || ucmp.compare(s, begin.unwrap()).is_lt() {
            begin = Some(s);
        }
        if end.is_none() || ucmp.compare(l, end.unwrap()).is_gt() {
            end = Some(l);
        }
    }
    (
        begin.unwrap_or_default().to_vec(),
        end.unwrap_or_default().to_vec(),
    )
}

/// Accumulates one or more edits against a base version and produces the
/// merged, sorted successor.
struct VersionBuilder {
    base: Arc<Version>,
    deleted: Vec<HashSet<u64>>,
    added: Vec<Vec<Arc<FileMeta>>>,
}

impl VersionBuilder {
    fn new(base: Arc<Version>) -> Self {
        VersionBuilder {
            base,
            deleted: vec![HashSet::new(); NUM_LEVELS],
            added: vec![Vec::new(); NUM_LEVELS],
        }
    }

    fn apply(&mut self, edit: &VersionEdit) {
        for (level, number) in &edit.deleted_files {
            self.deleted[*level].insert(*number);
        }
        for (level, meta) in &edit.new_files {
            self.deleted[*level].remove(&meta.number);
            self.added[*level].push(Arc::new(meta.clone()));
        }
    }

    fn finish(self, icmp: &InternalKeyComparator) -> Version {
        let mut version = Version::new(icmp.clone());
        for level in 0..NUM_LEVELS {
            let mut files: Vec<Arc<FileMeta>> = self.base.files[level]
                .iter()
                .filter(|f| !self.deleted[level].contains(&f.number))
                .cloned()
                .chain(
                    self.added[level]
                        .iter()
                        .filter(|f| !self.deleted[level].contains(&f.number))
                        .cloned(),
                )
                .collect();
            if level == 0 {
                files.sort_by_key(|f| f.number);
            } else {
                files.sort_by(|a, b| icmp.compare(&a.smallest, &b.smallest));
                // Disjointness invariant for the leveled part of the tree
                debug_assert!(
                    files
                        .windows(2)
                        .all(|w| icmp.compare(&w[0].largest, &w[1].smallest).is_lt()),
                    "overlapping files in level {level}"
                );
            }
            version.files[level] = files;
        }
        finalize(&mut version);
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::storage::DiskStorage;
    use crate::types::{ValueType, make_internal_key};
    use tempfile::tempdir;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn meta(number: u64, smallest: &str, largest: &str) -> FileMeta {
        FileMeta {
            number,
            file_size: 1 << 20,
            smallest: make_internal_key(smallest.as_bytes(), 100, ValueType::Put),
            largest: make_internal_key(largest.as_bytes(), 1, ValueType::Put),
        }
    }

    fn new_set(dir: &std::path::Path) -> VersionSet {
        VersionSet::new(Arc::new(DiskStorage), dir.to_path_buf(), icmp())
    }

    #[test]
    fn log_and_apply_builds_versions() {
        let dir = tempdir().unwrap();
        let mut vset = new_set(dir.path());

        let mut edit = VersionEdit::new();
        edit.add_file(0, meta(10, "a", "m"));
        vset.log_and_apply(&mut edit).unwrap();
        assert_eq!(vset.current().num_files(0), 1);

        let mut edit = VersionEdit::new();
        edit.add_file(1, meta(11, "a", "g"));
        edit.remove_file(0, 10);
        vset.log_and_apply(&mut edit).unwrap();

        let current = vset.current();
        assert_eq!(current.num_files(0), 0);
        assert_eq!(current.num_files(1), 1);
    }

    #[test]
    fn recover_replays_manifest() {
        let dir = tempdir().unwrap();
        {
            let mut vset = new_set(dir.path());
            let mut edit = VersionEdit::new();
            edit.add_file(0, meta(5, "a", "m"));
            vset.log_and_apply(&mut edit).unwrap();
            let mut edit = VersionEdit::new();
            edit.add_file(1, meta(6, "n", "z"));
            vset.set_last_sequence(777);
            vset.log_and_apply(&mut edit).unwrap();
        }

        let mut vset = new_set(dir.path());
        vset.recover().unwrap();
        let current = vset.current();
        assert_eq!(current.num_files(0), 1);
        assert_eq!(current.files[0][0].number, 5);
        assert_eq!(current.num_files(1), 1);
        assert_eq!(vset.last_sequence(), 777);
        // File numbers resume above everything recorded
        assert!(vset.new_file_number() > 6);
    }

    #[test]
    fn recover_after_reopen_keeps_rewriting_manifests() {
        let dir = tempdir().unwrap();
        for round in 0..3u64 {
            let mut vset = new_set(dir.path());
            if round > 0 {
                vset.recover().unwrap();
            }
            let number = vset.new_file_number();
            let mut edit = VersionEdit::new();
            edit.add_file(0, meta(number, "a", "z"));
            vset.log_and_apply(&mut edit).unwrap();
        }
        let mut vset = new_set(dir.path());
        vset.recover().unwrap();
        assert_eq!(vset.current().num_files(0), 3);
    }

    #[test]
    fn comparator_mismatch_refused() {
        let dir = tempdir().unwrap();
        {
            let mut vset = new_set(dir.path());
            let mut edit = VersionEdit::new();
            edit.add_file(0, meta(5, "a", "m"));
            vset.log_and_apply(&mut edit).unwrap();
        }

        #[derive(Debug)]
        struct Other;
        impl Comparator for Other {
            fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
                a.cmp(b)
            }
            fn name(&self) -> &'static str {
                "test.OtherComparator"
            }
        }

        let mut vset = VersionSet::new(
            Arc::new(DiskStorage),
            dir.path().to_path_buf(),
            InternalKeyComparator::new(Arc::new(Other)),
        );
        assert!(matches!(
            vset.recover(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn live_files_tracks_pinned_versions() {
        let dir = tempdir().unwrap();
        let mut vset = new_set(dir.path());

        let mut edit = VersionEdit::new();
        edit.add_file(0, meta(10, "a", "m"));
        let pinned = vset.log_and_apply(&mut edit).unwrap();

        let mut edit = VersionEdit::new();
        edit.remove_file(0, 10);
        edit.add_file(1, meta(11, "a", "m"));
        vset.log_and_apply(&mut edit).unwrap();

        // Old version still held → its file is still live
        let live = vset.live_files();
        assert!(live.contains(&10));
        assert!(live.contains(&11));

        drop(pinned);
        let live = vset.live_files();
        assert!(!live.contains(&10));
        assert!(live.contains(&11));
    }

    #[test]
    fn pick_compaction_for_crowded_level0() {
        let dir = tempdir().unwrap();
        let mut vset = new_set(dir.path());

        let mut edit = VersionEdit::new();
        for i in 0..4 {
            edit.add_file(0, meta(10 + i, "a", "m"));
        }
        edit.add_file(1, meta(20, "a", "f"));
        vset.log_and_apply(&mut edit).unwrap();

        assert!(vset.needs_compaction());
        let compaction = vset.pick_compaction().unwrap();
        assert_eq!(compaction.level, 0);
        // All overlapping level-0 files plus the overlapping level-1 file
        assert_eq!(compaction.inputs[0].len(), 4);
        assert_eq!(compaction.inputs[1].len(), 1);
    }

    #[test]
    fn no_compaction_when_quiet() {
        let dir = tempdir().unwrap();
        let mut vset = new_set(dir.path());
        let mut edit = VersionEdit::new();
        edit.add_file(0, meta(10, "a", "m"));
        vset.log_and_apply(&mut edit).unwrap();

        assert!(!vset.needs_compaction());
        assert!(vset.pick_compaction().is_none());
    }
}

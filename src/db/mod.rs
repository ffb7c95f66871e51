pub mod filename;
pub mod iter;
pub mod options;
pub mod snapshot;

pub use iter::DBIterator;
pub use options::{Options, ReadOptions, WriteOptions};
pub use snapshot::{Snapshot, SnapshotList};

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::batch::WriteBatch;
use crate::cache::TableCache;
use crate::compaction::{
    Compaction, CompactionStats, L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER,
    MAX_OUTPUT_FILE_SIZE,
};
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::iterator::concat::ConcatIterator;
use crate::iterator::merge::MergeIterator;
use crate::manifest::edit::{FileMeta, VersionEdit};
use crate::manifest::version_set::VersionSet;
use crate::manifest::NUM_LEVELS;
use crate::memtable::{LookupResult, MemTable};
use crate::sstable::TableBuilder;
use crate::sstable::reader::BlockCache;
use crate::storage::{DirLock, Storage};
use crate::types::{
    MAX_SEQUENCE, ParsedInternalKey, SequenceNumber, ValueType, make_internal_key,
};
use crate::wal::{LogReader, LogWriter};
use filename::{
    FileType, current_file_name, lock_file_name, log_file_name, manifest_file_name,
    parse_file_name, table_file_name,
};

/// Upper bound on a group-committed batch.
const MAX_GROUP_COMMIT_BYTES: usize = 1 << 20;

/// The database: an ordered, persistent map from byte keys to byte
/// values.
///
/// One instance owns its directory (enforced by a lock file). All methods
/// take `&self` and are safe to call from any thread: writers serialize
/// through a group-commit queue, readers coordinate only through
/// reference-counted snapshots of the memtable set and file organization.
pub struct DB {
    inner: Arc<DbInner>,
    worker: Option<JoinHandle<()>>,
}

struct DbInner {
    options: Options,
    dir: PathBuf,
    icmp: InternalKeyComparator,
    storage: Arc<dyn Storage>,
    table_cache: Arc<TableCache>,
    block_cache: Arc<BlockCache>,

    /// Memtables, version set, background bookkeeping.
    state: Mutex<DbState>,
    /// Signaled when background work finishes (flush done, compaction
    /// done, error recorded) — what `make_room` and `compact_range` wait on.
    background_cv: Condvar,

    /// The WAL sits outside `state` so an fsync never blocks readers.
    wal: Mutex<WalWriter>,

    /// Writer queue: the front ticket is the group-commit leader.
    write_queue: Mutex<VecDeque<Arc<WriteTicket>>>,
    queue_cv: Condvar,

    snapshots: Arc<SnapshotList>,
    worker_tx: Sender<Task>,
    shutting_down: AtomicBool,
    _dir_lock: Box<dyn DirLock>,
}

struct DbState {
    mem: Arc<MemTable>,
    /// Frozen memtables awaiting flush, oldest first.
    imms: Vec<FrozenMem>,
    vset: VersionSet,
    background_scheduled: bool,
    /// A failed flush/compaction/WAL-sync poisons subsequent writes until
    /// the process restarts; reads keep working off the installed state.
    background_error: Option<Error>,
    stats: Vec<CompactionStats>,
}

struct WalWriter {
    log: LogWriter,
    number: u64,
}

/// A frozen memtable plus the WAL number that superseded it: once this
/// memtable is flushed, logs below `log_floor` hold nothing unflushed.
struct FrozenMem {
    mem: Arc<MemTable>,
    log_floor: u64,
}

struct WriteTicket {
    batch: Mutex<Option<WriteBatch>>,
    sync: bool,
    result: Mutex<Option<Result<()>>>,
}

enum Task {
    Work,
    Manual {
        level: usize,
        begin: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        done: Sender<Result<()>>,
    },
    Shutdown,
}

fn clone_result(r: &Result<()>) -> Result<()> {
    match r {
        Ok(()) => Ok(()),
        Err(e) => Err(e.clone_for_record()),
    }
}

impl DB {
    /// Open (or create) the database at `path`.
    pub fn open(options: Options, path: impl AsRef<Path>) -> Result<DB> {
        let dir = path.as_ref().to_path_buf();
        let storage = Arc::clone(&options.storage);
        storage.create_dir_all(&dir)?;
        let dir_lock = storage.lock_dir(&lock_file_name(&dir))?;

        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let block_cache: Arc<BlockCache> =
            Arc::new(crate::cache::ShardedCache::new(options.block_cache_capacity));
        let table_cache = Arc::new(TableCache::new(
            Arc::clone(&storage),
            dir.clone(),
            icmp.clone(),
            options.filter_policy.clone(),
            Some(Arc::clone(&block_cache)),
            options.table_cache_capacity,
            options.verify_checksums,
        ));

        let mut vset = VersionSet::new(Arc::clone(&storage), dir.clone(), icmp.clone());
        let mut edit = VersionEdit::new();

        if storage.exists(&current_file_name(&dir)) {
            if options.error_if_exists {
                return Err(Error::InvalidArgument(format!(
                    "database already exists: {}",
                    dir.display()
                )));
            }
            vset.recover()?;
            Self::replay_logs(&options, &storage, &dir, &icmp, &mut vset, &mut edit)?;
        } else if !options.create_if_missing {
            return Err(Error::InvalidArgument(format!(
                "database missing and create_if_missing is false: {}",
                dir.display()
            )));
        }

        // Fresh WAL for this incarnation; everything older is either
        // flushed (manifest) or was just replayed into tables above.
        let wal_number = vset.new_file_number();
        let wal_file = storage.new_writable(&log_file_name(&dir, wal_number))?;
        edit.log_number = Some(wal_number);
        vset.log_and_apply(&mut edit)?;

        let (worker_tx, worker_rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(DbInner {
            state: Mutex::new(DbState {
                mem: Arc::new(MemTable::new(icmp.clone())),
                imms: Vec::new(),
                vset,
                background_scheduled: false,
                background_error: None,
                stats: vec![CompactionStats::default(); NUM_LEVELS],
            }),
            background_cv: Condvar::new(),
            wal: Mutex::new(WalWriter {
                log: LogWriter::new(wal_file),
                number: wal_number,
            }),
            write_queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            snapshots: SnapshotList::new(),
            worker_tx,
            shutting_down: AtomicBool::new(false),
            _dir_lock: dir_lock,
            options,
            dir,
            icmp,
            storage,
            table_cache,
            block_cache,
        });

        {
            let mut state = inner.state.lock();
            inner.remove_obsolete_files(&mut state);
            inner.maybe_schedule_compaction(&mut state);
        }

        let worker = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("stratadb-bg".into())
                .spawn(move || Self::worker_loop(inner, worker_rx))
                .map_err(Error::Io)?
        };

        Ok(DB {
            inner,
            worker: Some(worker),
        })
    }

    /// Replay every WAL at or above the manifest's log number into fresh
    /// memtables, flushing them as level-0 tables recorded in `edit`.
    /// The tail of the newest log may be torn by a crash — tolerated; any
    /// interior damage is surfaced as corruption.
    fn replay_logs(
        options: &Options,
        storage: &Arc<dyn Storage>,
        dir: &Path,
        icmp: &InternalKeyComparator,
        vset: &mut VersionSet,
        edit: &mut VersionEdit,
    ) -> Result<()> {
        let mut numbers: Vec<u64> = storage
            .list_dir(dir)?
            .iter()
            .filter_map(|name| parse_file_name(name))
            .filter(|(t, n)| *t == FileType::Log && *n >= vset.log_number())
            .map(|(_, n)| n)
            .collect();
        numbers.sort_unstable();

        let mut max_sequence = vset.last_sequence();
        for number in numbers {
            vset.mark_file_number_used(number);
            let data = storage.read_all(&log_file_name(dir, number))?;
            let reader = LogReader::new(data);
            let mut mem = Arc::new(MemTable::new(icmp.clone()));
            let mut records = 0u64;

            for record in reader.iter() {
                let batch = WriteBatch::from_contents(record?)?;
                batch.insert_into(&mem)?;
                records += 1;
                let last = batch.sequence() + batch.count() as u64 - 1;
                max_sequence = max_sequence.max(last);

                if mem.approximate_size() >= options.write_buffer_size {
                    Self::flush_replayed(options, storage, dir, icmp, vset, edit, &mem)?;
                    mem = Arc::new(MemTable::new(icmp.clone()));
                }
            }
            if !mem.is_empty() {
                Self::flush_replayed(options, storage, dir, icmp, vset, edit, &mem)?;
            }
            info!("replayed WAL {number:06}: {records} records");
        }
        if max_sequence > vset.last_sequence() {
            vset.set_last_sequence(max_sequence);
        }
        Ok(())
    }

    fn flush_replayed(
        options: &Options,
        storage: &Arc<dyn Storage>,
        dir: &Path,
        icmp: &InternalKeyComparator,
        vset: &mut VersionSet,
        edit: &mut VersionEdit,
        mem: &Arc<MemTable>,
    ) -> Result<()> {
        let number = vset.new_file_number();
        let mut iter = mem.iter();
        if let Some(meta) = build_table(
            storage.as_ref(),
            dir,
            icmp,
            options,
            number,
            &mut iter,
        )? {
            edit.add_file(0, meta);
        }
        Ok(())
    }

    fn worker_loop(inner: Arc<DbInner>, rx: Receiver<Task>) {
        while let Ok(task) = rx.recv() {
            match task {
                Task::Shutdown => break,
                Task::Work => inner.background_work(),
                Task::Manual {
                    level,
                    begin,
                    end,
                    done,
                } => {
                    let result = inner.manual_compaction(level, begin.as_deref(), end.as_deref());
                    let _ = done.send(result);
                }
            }
        }
    }

    /// Insert a single key-value pair.
    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(options, batch)
    }

    /// Remove a key (writes a tombstone).
    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(options, batch)
    }

    /// Apply a batch atomically: all operations become visible together,
    /// or none do. Concurrent writers are serialized into a single queue;
    /// the queue head commits a whole run of batches with one WAL record
    /// (group commit), amortizing the fsync when `sync` is set.
    pub fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let inner = &self.inner;
        let ticket = Arc::new(WriteTicket {
            batch: Mutex::new(Some(batch)),
            sync: options.sync,
            result: Mutex::new(None),
        });

        let mut queue = inner.write_queue.lock();
        queue.push_back(Arc::clone(&ticket));
        while ticket.result.lock().is_none()
            && !Arc::ptr_eq(queue.front().unwrap(), &ticket)
        {
            inner.queue_cv.wait(&mut queue);
        }
        if let Some(result) = ticket.result.lock().take() {
            // A leader committed this batch as part of its group
            return result;
        }

        // This ticket is the leader for the group at the queue front.
        let result = inner.group_commit(&mut queue, &ticket);

        // Tickets whose batches the leader consumed; on an early failure
        // (room-making) no batch was taken and only the leader retires.
        let grouped: Vec<Arc<WriteTicket>> = queue
            .iter()
            .take_while(|t| t.batch.lock().is_none())
            .cloned()
            .collect();
        for t in &grouped {
            if !Arc::ptr_eq(t, &ticket) {
                *t.result.lock() = Some(clone_result(&result));
            }
        }
        for _ in 0..grouped.len().max(1) {
            queue.pop_front();
        }
        inner.queue_cv.notify_all();
        result
    }

    /// Point lookup at the newest committed state, or at the snapshot in
    /// `options`. Absence is `Ok(None)`, never an error.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = &self.inner;
        let (mem, imms, version, ceiling) = {
            let state = inner.state.lock();
            let ceiling = options
                .snapshot
                .as_ref()
                .map(|s| s.sequence())
                .unwrap_or_else(|| state.vset.last_sequence());
            let imms: Vec<Arc<MemTable>> =
                state.imms.iter().map(|f| Arc::clone(&f.mem)).collect();
            (
                Arc::clone(&state.mem),
                imms,
                state.vset.current(),
                ceiling,
            )
        };

        match mem.get(key, ceiling) {
            LookupResult::Value(v) => return Ok(Some(v)),
            LookupResult::Deleted => return Ok(None),
            LookupResult::NotFound => {}
        }
        for imm in imms.iter().rev() {
            match imm.get(key, ceiling) {
                LookupResult::Value(v) => return Ok(Some(v)),
                LookupResult::Deleted => return Ok(None),
                LookupResult::NotFound => {}
            }
        }

        let verify = inner.options.verify_checksums && !options.skip_checksums;
        match version.get(
            key,
            ceiling,
            &inner.table_cache,
            verify,
            !options.skip_cache_fill,
        )? {
            LookupResult::Value(v) => Ok(Some(v)),
            LookupResult::Deleted | LookupResult::NotFound => Ok(None),
        }
    }

    /// Ordered, bidirectional cursor over the whole database as of now
    /// (or of the snapshot in `options`). The iterator pins the memtables
    /// and file organization it was created against; later writes,
    /// flushes and compactions don't disturb it.
    pub fn iter(&self, options: &ReadOptions) -> Result<DBIterator> {
        let inner = &self.inner;
        let (mem, imms, version, ceiling) = {
            let state = inner.state.lock();
            let ceiling = options
                .snapshot
                .as_ref()
                .map(|s| s.sequence())
                .unwrap_or_else(|| state.vset.last_sequence());
            let imms: Vec<Arc<MemTable>> =
                state.imms.iter().map(|f| Arc::clone(&f.mem)).collect();
            (
                Arc::clone(&state.mem),
                imms,
                state.vset.current(),
                ceiling,
            )
        };

        let verify = inner.options.verify_checksums && !options.skip_checksums;
        let fill = !options.skip_cache_fill;

        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        let mut pinned = vec![Arc::clone(&mem)];
        children.push(Box::new(mem.iter()));
        for imm in imms.iter().rev() {
            children.push(Box::new(imm.iter()));
            pinned.push(Arc::clone(imm));
        }

        // Level 0: newest file first so duplicate keys resolve correctly
        let mut level0: Vec<&Arc<FileMeta>> = version.files[0].iter().collect();
        level0.sort_by(|a, b| b.number.cmp(&a.number));
        for file in level0 {
            children.push(Box::new(inner.table_cache.table_iter(
                file.number,
                file.file_size,
                verify,
                fill,
            )?));
        }
        for level in 1..NUM_LEVELS {
            if version.files[level].is_empty() {
                continue;
            }
            children.push(Box::new(ConcatIterator::new(
                Arc::clone(&inner.table_cache),
                inner.icmp.clone(),
                version.files[level].clone(),
                verify,
                fill,
            )));
        }

        Ok(DBIterator::new(
            MergeIterator::new(inner.icmp.clone(), children),
            inner.icmp.clone(),
            ceiling,
            pinned,
            version,
            options.snapshot.clone(),
        ))
    }

    /// Capture the current sequence number as a frozen read view.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        self.inner.snapshots.acquire(state.vset.last_sequence())
    }

    /// Release a snapshot. Dropping the last clone has the same effect;
    /// this spelling exists for symmetry with the binding surface.
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    /// Database introspection. Recognized names:
    /// `stratadb.num-files-at-level<N>`, `stratadb.stats`,
    /// `stratadb.sstables`, `stratadb.approximate-memory-usage`.
    pub fn property(&self, name: &str) -> Option<String> {
        let inner = &self.inner;
        let name = name.strip_prefix("stratadb.")?;
        let state = inner.state.lock();

        if let Some(level) = name.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            if level >= NUM_LEVELS {
                return None;
            }
            return Some(state.vset.current().num_files(level).to_string());
        }
        match name {
            "stats" => {
                let version = state.vset.current();
                let mut out = String::from(
                    "Level  Files  Size(B)      Time(us)  Read(B)      Write(B)\n",
                );
                for level in 0..NUM_LEVELS {
                    let stats = &state.stats[level];
                    if version.num_files(level) == 0 && stats.micros == 0 {
                        continue;
                    }
                    out.push_str(&format!(
                        "{:5}  {:5}  {:11}  {:8}  {:11}  {:11}\n",
                        level,
                        version.num_files(level),
                        version.level_bytes(level),
                        stats.micros,
                        stats.bytes_read,
                        stats.bytes_written,
                    ));
                }
                Some(out)
            }
            "sstables" => Some(state.vset.current().level_summary()),
            "approximate-memory-usage" => {
                let mut usage = state.mem.approximate_size();
                for imm in &state.imms {
                    usage += imm.mem.approximate_size();
                }
                usage += inner.block_cache.usage();
                Some(usage.to_string())
            }
            _ => None,
        }
    }

    /// Rough on-disk byte count for the user-key range `[begin, end)`,
    /// derived from table file sizes.
    pub fn approximate_size(&self, begin: &[u8], end: &[u8]) -> u64 {
        let state = self.inner.state.lock();
        let version = state.vset.current();
        let start = state.vset.approximate_offset_of(
            version.as_ref(),
            &make_internal_key(begin, MAX_SEQUENCE, ValueType::Put),
        );
        let limit = state.vset.approximate_offset_of(
            version.as_ref(),
            &make_internal_key(end, MAX_SEQUENCE, ValueType::Put),
        );
        limit.saturating_sub(start)
    }

    /// Force the key range `[begin, end]` (whole database when both are
    /// None) down through every level: flush the memtable, then compact
    /// level by level. Blocks until done.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let inner = &self.inner;
        {
            // Freeze the active memtable like a writer would, so its
            // contents participate in the compaction.
            let _queue = inner.write_queue.lock();
            let mut state = inner.state.lock();
            if !state.mem.is_empty() {
                inner.make_room(&mut state, true)?;
            }
        }
        {
            let mut state = inner.state.lock();
            inner.maybe_schedule_compaction(&mut state);
            while !state.imms.is_empty() && state.background_error.is_none() {
                inner.background_cv.wait(&mut state);
            }
            if let Some(e) = &state.background_error {
                return Err(e.clone_for_record());
            }
        }

        let max_level = {
            let state = inner.state.lock();
            state.vset.current().max_populated_level()
        };
        for level in 0..=max_level.min(NUM_LEVELS - 2) {
            let (tx, rx) = crossbeam_channel::bounded(1);
            inner
                .worker_tx
                .send(Task::Manual {
                    level,
                    begin: begin.map(|b| b.to_vec()),
                    end: end.map(|e| e.to_vec()),
                    done: tx,
                })
                .map_err(|_| {
                    Error::InvalidArgument("database is shutting down".into())
                })?;
            rx.recv()
                .map_err(|_| Error::InvalidArgument("background worker gone".into()))??;
        }
        Ok(())
    }

    /// Delete every file of the database at `path`. The database must not
    /// be open elsewhere.
    pub fn destroy(options: &Options, path: impl AsRef<Path>) -> Result<()> {
        let dir = path.as_ref();
        let storage = &options.storage;
        if !storage.exists(dir) {
            return Ok(());
        }
        // Refuses if another process holds the database open
        let lock = storage.lock_dir(&lock_file_name(dir))?;
        for name in storage.list_dir(dir)? {
            if let Some((file_type, _)) = parse_file_name(&name) {
                if file_type != FileType::Lock {
                    storage.remove_file(&dir.join(&name))?;
                }
            }
        }
        drop(lock);
        storage.remove_file(&lock_file_name(dir))?;
        Ok(())
    }

    /// Best-effort reconstruction of a database whose manifest is lost or
    /// damaged: every readable table file is re-registered at level 0 and
    /// leftover WALs are converted to tables, under a fresh manifest.
    /// Unreadable tables are skipped (and logged), not deleted.
    pub fn repair(options: &Options, path: impl AsRef<Path>) -> Result<()> {
        let dir = path.as_ref().to_path_buf();
        let storage = Arc::clone(&options.storage);
        let _lock = storage.lock_dir(&lock_file_name(&dir))?;
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));

        let mut tables = Vec::new();
        let mut logs = Vec::new();
        let mut old_manifests = Vec::new();
        let mut max_number = 1;
        for name in storage.list_dir(&dir)? {
            let Some((file_type, number)) = parse_file_name(&name) else {
                continue;
            };
            max_number = max_number.max(number);
            match file_type {
                FileType::Table => tables.push(number),
                FileType::Log => logs.push(number),
                FileType::Manifest => old_manifests.push(number),
                _ => {}
            }
        }

        let mut vset = VersionSet::new(Arc::clone(&storage), dir.clone(), icmp.clone());
        vset.mark_file_number_used(max_number);
        let mut edit = VersionEdit::new();
        let mut max_sequence = 0;

        let table_cache = TableCache::new(
            Arc::clone(&storage),
            dir.clone(),
            icmp.clone(),
            options.filter_policy.clone(),
            None,
            16,
            options.verify_checksums,
        );
        for number in tables {
            match scan_table(&storage, &dir, &table_cache, number) {
                Ok((meta, table_max_seq)) => {
                    max_sequence = max_sequence.max(table_max_seq);
                    edit.add_file(0, meta);
                }
                Err(e) => warn!("repair: skipping unreadable table {number:06}: {e}"),
            }
        }

        logs.sort_unstable();
        for number in logs {
            let data = storage.read_all(&log_file_name(&dir, number))?;
            let mem = Arc::new(MemTable::new(icmp.clone()));
            for record in LogReader::new(data).iter() {
                let Ok(record) = record else { break };
                let Ok(batch) = WriteBatch::from_contents(record) else {
                    break;
                };
                if batch.insert_into(&mem).is_err() {
                    break;
                }
                max_sequence =
                    max_sequence.max(batch.sequence() + batch.count() as u64 - 1);
            }
            if !mem.is_empty() {
                let table_number = vset.new_file_number();
                let mut iter = mem.iter();
                if let Some(meta) = build_table(
                    storage.as_ref(),
                    &dir,
                    &icmp,
                    options,
                    table_number,
                    &mut iter,
                )? {
                    edit.add_file(0, meta);
                }
            }
        }

        vset.set_last_sequence(max_sequence);
        edit.log_number = Some(vset.new_file_number());
        vset.log_and_apply(&mut edit)?;
        info!("repair: rebuilt manifest {}", vset.manifest_number());

        for number in old_manifests {
            let _ = storage.remove_file(&manifest_file_name(&dir, number));
        }
        for name in storage.list_dir(&dir)? {
            if let Some((FileType::Log, _)) = parse_file_name(&name) {
                let _ = storage.remove_file(&dir.join(&name));
            }
        }
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.inner.worker_tx.send(Task::Shutdown);
        {
            // Wake anything parked on background progress
            let _state = self.inner.state.lock();
            self.inner.background_cv.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let _ = self.inner.wal.lock().log.sync();
    }
}

impl DbInner {
    /// Leader-side commit: build the group from the queue front, reserve
    /// a sequence range, append one WAL record, apply to the memtable,
    /// then publish the new last sequence.
    ///
    /// Visibility: the sequence counter only advances after the memtable
    /// insert, so readers either see the entire batch or none of it.
    fn group_commit(
        &self,
        queue: &mut VecDeque<Arc<WriteTicket>>,
        leader: &Arc<WriteTicket>,
    ) -> Result<()> {
        let (base_sequence, mem) = {
            let mut state = self.state.lock();
            self.make_room(&mut state, false)?;
            (state.vset.last_sequence(), Arc::clone(&state.mem))
        };

        let mut group = leader.batch.lock().take().unwrap_or_default();
        for ticket in queue.iter().skip(1) {
            // Don't lump a sync write into a non-sync commit
            if ticket.sync && !leader.sync {
                break;
            }
            let mut slot = ticket.batch.lock();
            let Some(batch) = slot.as_ref() else { break };
            if group.approximate_size() + batch.approximate_size() > MAX_GROUP_COMMIT_BYTES {
                break;
            }
            group.append(&slot.take().unwrap());
        }

        group.set_sequence(base_sequence + 1);
        let count = group.count() as u64;

        let result = (|| {
            let mut wal = self.wal.lock();
            wal.log.add_record(group.contents())?;
            if leader.sync {
                wal.log.sync()?;
            }
            drop(wal);
            group.insert_into(&mem)
        })();

        let mut state = self.state.lock();
        match &result {
            Ok(()) => state.vset.set_last_sequence(base_sequence + count),
            Err(e) => {
                // The log may hold a torn record; poison further writes
                state.background_error = Some(e.clone_for_record());
            }
        }
        self.maybe_schedule_compaction(&mut state);
        result
    }

    /// Ensure the active memtable can take another write. May rotate the
    /// memtable + WAL, throttle, or block on background work:
    ///
    /// - level-0 close to full → one millisecond penalty per writer
    /// - memtable full but the frozen queue has room → rotate and go
    /// - frozen queue full, or level-0 at the stop trigger → wait
    fn make_room(&self, state: &mut MutexGuard<'_, DbState>, force: bool) -> Result<()> {
        let mut force = force;
        let mut allow_delay = !force;
        loop {
            if let Some(e) = &state.background_error {
                return Err(e.clone_for_record());
            }
            if allow_delay
                && state.vset.current().num_files(0) >= L0_SLOWDOWN_WRITES_TRIGGER
            {
                // Shed a little write pressure onto this caller instead
                // of stalling everyone at the hard limit later.
                allow_delay = false;
                MutexGuard::unlocked(state, || {
                    std::thread::sleep(Duration::from_millis(1));
                });
                continue;
            }
            if !force
                && state.mem.approximate_size() < self.options.write_buffer_size
            {
                return Ok(());
            }
            if state.imms.len() >= self.options.max_immutable_memtables {
                // Deliberate backpressure, not an error
                self.maybe_schedule_compaction(state);
                self.background_cv.wait(state);
                continue;
            }
            if state.vset.current().num_files(0) >= L0_STOP_WRITES_TRIGGER {
                self.maybe_schedule_compaction(state);
                self.background_cv.wait(state);
                continue;
            }

            // Rotate: fresh WAL, freeze the memtable, schedule its flush
            let new_log_number = state.vset.new_file_number();
            let file = self
                .storage
                .new_writable(&log_file_name(&self.dir, new_log_number))?;
            {
                let mut wal = self.wal.lock();
                let _ = wal.log.sync();
                wal.log = LogWriter::new(file);
                wal.number = new_log_number;
            }
            let frozen = std::mem::replace(
                &mut state.mem,
                Arc::new(MemTable::new(self.icmp.clone())),
            );
            state.imms.push(FrozenMem {
                mem: frozen,
                log_floor: new_log_number,
            });
            self.maybe_schedule_compaction(state);
            force = false;
        }
    }

    fn maybe_schedule_compaction(&self, state: &mut DbState) {
        if state.background_scheduled
            || state.background_error.is_some()
            || self.shutting_down.load(Ordering::Relaxed)
        {
            return;
        }
        if state.imms.is_empty() && !state.vset.needs_compaction() {
            return;
        }
        state.background_scheduled = true;
        let _ = self.worker_tx.send(Task::Work);
    }

    fn background_work(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.background_scheduled = false;
        if self.shutting_down.load(Ordering::Relaxed) || state.background_error.is_some() {
            self.background_cv.notify_all();
            return;
        }

        let result = if !state.imms.is_empty() {
            self.flush_memtable(&mut state)
        } else if let Some(compaction) = state.vset.pick_compaction() {
            self.run_compaction(&mut state, compaction)
        } else {
            Ok(())
        };

        if let Err(e) = result {
            error!("background work failed: {e}");
            state.background_error = Some(e);
        }
        self.maybe_schedule_compaction(&mut state);
        self.background_cv.notify_all();
    }

    /// Write the oldest frozen memtable out as a level-0 table and
    /// install it. The memtable stays readable throughout; it is only
    /// unqueued after the manifest commit.
    fn flush_memtable(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let frozen_mem = Arc::clone(&state.imms[0].mem);
        let log_floor = state.imms[0].log_floor;
        let file_number = state.vset.new_file_number();
        let started = Instant::now();

        let built = MutexGuard::unlocked(state, || {
            let mut iter = frozen_mem.iter();
            build_table(
                self.storage.as_ref(),
                &self.dir,
                &self.icmp,
                &self.options,
                file_number,
                &mut iter,
            )
        });

        let meta = match built {
            Ok(meta) => meta,
            Err(e) => {
                let _ = self
                    .storage
                    .remove_file(&table_file_name(&self.dir, file_number));
                return Err(e);
            }
        };

        let mut edit = VersionEdit::new();
        let mut written = 0;
        if let Some(meta) = meta {
            written = meta.file_size;
            info!(
                "flushed memtable to table {:06} ({} bytes)",
                meta.number, meta.file_size
            );
            edit.add_file(0, meta);
        }
        edit.log_number = Some(log_floor);
        state.vset.log_and_apply(&mut edit)?;
        state.imms.remove(0);
        state.stats[0].add(&CompactionStats {
            micros: started.elapsed().as_micros() as u64,
            bytes_read: 0,
            bytes_written: written,
        });
        self.remove_obsolete_files(state);
        Ok(())
    }

    fn manual_compaction(
        self: &Arc<Self>,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(e) = &state.background_error {
            return Err(e.clone_for_record());
        }
        let result = match state.vset.compact_range(level, begin, end) {
            Some(compaction) => self.run_compaction(&mut state, compaction),
            None => Ok(()),
        };
        if let Err(e) = &result {
            state.background_error = Some(e.clone_for_record());
        }
        self.background_cv.notify_all();
        result
    }

    /// Merge the planned inputs into new tables for the next level and
    /// install the swap atomically. On any failure the outputs are
    /// deleted and the previous version remains current.
    fn run_compaction(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, DbState>,
        mut compaction: Compaction,
    ) -> Result<()> {
        let level = compaction.level;
        let started = Instant::now();

        if compaction.is_trivial_move() {
            let file = Arc::clone(&compaction.inputs[0][0]);
            compaction.edit.remove_file(level, file.number);
            compaction
                .edit
                .add_file(level + 1, FileMeta::clone(&file));
            state.vset.log_and_apply(&mut compaction.edit)?;
            info!(
                "trivial move: table {:06} from level {} to {}",
                file.number,
                level,
                level + 1
            );
            self.remove_obsolete_files(state);
            return Ok(());
        }

        // Everything at or below the oldest live snapshot must survive
        let smallest_snapshot = self
            .snapshots
            .smallest()
            .unwrap_or_else(|| state.vset.last_sequence());

        let input_iter = self.compaction_input_iter(&compaction)?;
        let merged = MutexGuard::unlocked(state, || {
            self.merge_compaction_inputs(&compaction, input_iter, smallest_snapshot)
        });

        let outputs = merged?;
        let bytes_read = compaction.input_bytes();
        let bytes_written: u64 = outputs.iter().map(|f| f.file_size).sum();
        info!(
            "compacted {} files at level {} into {} files ({} -> {} bytes)",
            compaction.num_input_files(),
            level,
            outputs.len(),
            bytes_read,
            bytes_written,
        );

        compaction.add_input_deletions();
        for meta in outputs {
            compaction.edit.add_file(level + 1, meta);
        }
        state.vset.log_and_apply(&mut compaction.edit)?;
        state.stats[level + 1].add(&CompactionStats {
            micros: started.elapsed().as_micros() as u64,
            bytes_read,
            bytes_written,
        });
        self.remove_obsolete_files(state);
        Ok(())
    }

    fn compaction_input_iter(&self, compaction: &Compaction) -> Result<MergeIterator> {
        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        if compaction.level == 0 {
            let mut files: Vec<&Arc<FileMeta>> = compaction.inputs[0].iter().collect();
            files.sort_by(|a, b| b.number.cmp(&a.number));
            for file in files {
                children.push(Box::new(self.table_cache.table_iter(
                    file.number,
                    file.file_size,
                    self.options.verify_checksums,
                    false,
                )?));
            }
        } else {
            children.push(Box::new(ConcatIterator::new(
                Arc::clone(&self.table_cache),
                self.icmp.clone(),
                compaction.inputs[0].clone(),
                self.options.verify_checksums,
                false,
            )));
        }
        children.push(Box::new(ConcatIterator::new(
            Arc::clone(&self.table_cache),
            self.icmp.clone(),
            compaction.inputs[1].clone(),
            self.options.verify_checksums,
            false,
        )));
        Ok(MergeIterator::new(self.icmp.clone(), children))
    }

    /// The forward merge pass. An entry is dropped when a newer entry for
    /// the same user key is already visible at or below the snapshot
    /// floor, or when it is a tombstone no snapshot needs and no deeper
    /// level could still shadow.
    fn merge_compaction_inputs(
        &self,
        compaction: &Compaction,
        mut iter: MergeIterator,
        smallest_snapshot: SequenceNumber,
    ) -> Result<Vec<FileMeta>> {
        let ucmp = Arc::clone(self.icmp.user_comparator());
        let mut outputs: Vec<FileMeta> = Vec::new();
        let mut output_numbers: Vec<u64> = Vec::new();
        let mut builder: Option<TableBuilder> = None;
        let mut builder_number = 0u64;

        let result: Result<()> = (|| {
            iter.seek_to_first()?;
            let mut current_user_key: Option<Vec<u8>> = None;
            let mut last_sequence_for_key = MAX_SEQUENCE + 1;

            while iter.valid() {
                if self.shutting_down.load(Ordering::Relaxed) {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        "shutdown during compaction",
                    )));
                }

                let key = iter.key().to_vec();
                let mut drop_entry = false;
                match ParsedInternalKey::parse(&key) {
                    None => {
                        // Unparsable keys are preserved for inspection
                        current_user_key = None;
                        last_sequence_for_key = MAX_SEQUENCE + 1;
                    }
                    Some(parsed) => {
                        let first_occurrence = current_user_key
                            .as_deref()
                            .is_none_or(|u| ucmp.compare(u, parsed.user_key).is_ne());
                        if first_occurrence {
                            current_user_key = Some(parsed.user_key.to_vec());
                            last_sequence_for_key = MAX_SEQUENCE + 1;
                        }

                        if last_sequence_for_key <= smallest_snapshot {
                            // Shadowed by a newer entry that is itself
                            // visible at the snapshot floor
                            drop_entry = true;
                        } else if parsed.value_type == ValueType::Delete
                            && parsed.sequence <= smallest_snapshot
                            && compaction.is_base_level_for_key(parsed.user_key)
                        {
                            // Tombstone with nothing left to shadow
                            drop_entry = true;
                        }
                        last_sequence_for_key = parsed.sequence;
                    }
                }

                if !drop_entry {
                    if builder.is_none() {
                        builder_number = self.state.lock().vset.new_file_number();
                        output_numbers.push(builder_number);
                        let file = self
                            .storage
                            .new_writable(&table_file_name(&self.dir, builder_number))?;
                        builder = Some(TableBuilder::new(
                            file,
                            self.icmp.clone(),
                            self.options.filter_policy.clone(),
                            self.options.block_size,
                        ));
                    }
                    let b = builder.as_mut().unwrap();
                    b.add(&key, iter.value())?;
                    if b.file_size() >= MAX_OUTPUT_FILE_SIZE {
                        let stats = builder.take().unwrap().finish()?;
                        outputs.push(FileMeta {
                            number: builder_number,
                            file_size: stats.file_size,
                            smallest: stats.smallest,
                            largest: stats.largest,
                        });
                    }
                }
                iter.next()?;
            }

            if let Some(b) = builder.take() {
                let stats = b.finish()?;
                if stats.num_entries > 0 {
                    outputs.push(FileMeta {
                        number: builder_number,
                        file_size: stats.file_size,
                        smallest: stats.smallest,
                        largest: stats.largest,
                    });
                } else {
                    let _ = self
                        .storage
                        .remove_file(&table_file_name(&self.dir, builder_number));
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(outputs),
            Err(e) => {
                drop(builder);
                for number in output_numbers {
                    let _ = self
                        .storage
                        .remove_file(&table_file_name(&self.dir, number));
                }
                Err(e)
            }
        }
    }

    /// Delete files no live version, WAL floor, or manifest references.
    /// Runs after every install; never touches foreign files.
    fn remove_obsolete_files(&self, state: &mut MutexGuard<'_, DbState>) {
        let live = state.vset.live_files();
        let log_floor = state.vset.log_number();
        let manifest_number = state.vset.manifest_number();

        let Ok(names) = self.storage.list_dir(&self.dir) else {
            return;
        };
        for name in names {
            let Some((file_type, number)) = parse_file_name(&name) else {
                continue;
            };
            let keep = match file_type {
                FileType::Log => number >= log_floor,
                FileType::Table => live.contains(&number),
                FileType::Manifest => number >= manifest_number,
                FileType::Current | FileType::Lock => true,
                FileType::Temp => false,
            };
            if !keep {
                if file_type == FileType::Table {
                    self.table_cache.evict(number);
                }
                let _ = self.storage.remove_file(&self.dir.join(&name));
            }
        }
    }
}

/// Drain `iter` into a new table file. Returns None (and leaves no file)
/// when the source is empty.
fn build_table(
    storage: &dyn Storage,
    dir: &Path,
    icmp: &InternalKeyComparator,
    options: &Options,
    file_number: u64,
    iter: &mut dyn StorageIterator,
) -> Result<Option<FileMeta>> {
    let path = table_file_name(dir, file_number);
    iter.seek_to_first()?;
    if !iter.valid() {
        return Ok(None);
    }
    let mut builder = TableBuilder::new(
        storage.new_writable(&path)?,
        icmp.clone(),
        options.filter_policy.clone(),
        options.block_size,
    );
    while iter.valid() {
        builder.add(iter.key(), iter.value())?;
        iter.next()?;
    }
    let stats = builder.finish()?;
    Ok(Some(FileMeta {
        number: file_number,
        file_size: stats.file_size,
        smallest: stats.smallest,
        largest: stats.largest,
    }))
}

/// Walk an orphaned table end to end for repair: its key bounds and the
/// highest sequence it contains.
fn scan_table(
    storage: &Arc<dyn Storage>,
    dir: &Path,
    cache: &TableCache,
    number: u64,
) -> Result<(FileMeta, SequenceNumber)> {
    let file_size = storage.file_size(&table_file_name(dir, number))?;
    let mut iter = cache.table_iter(number, file_size, true, false)?;
    let mut smallest: Option<Vec<u8>> = None;
    let mut largest: Option<Vec<u8>> = None;
    let mut max_sequence = 0;

    iter.seek_to_first()?;
    while iter.valid() {
        if smallest.is_none() {
            smallest = Some(iter.key().to_vec());
        }
        largest = Some(iter.key().to_vec());
        if let Some(parsed) = ParsedInternalKey::parse(iter.key()) {
            max_sequence = max_sequence.max(parsed.sequence);
        }
        iter.next()?;
    }
    let (Some(smallest), Some(largest)) = (smallest, largest) else {
        return Err(Error::Corruption(format!("table {number:06} is empty")));
    };
    Ok((
        FileMeta {
            number,
            file_size,
            smallest,
            largest,
        },
        max_sequence,
    ))
}

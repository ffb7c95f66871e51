//! The storage/environment boundary.
//!
//! The engine never touches the filesystem directly — every byte it reads
//! or writes goes through [`Storage`]. The provided [`DiskStorage`] is the
//! default implementation over `std::fs`; tests can substitute their own.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Error, Result};

/// A file written front to back: WALs, manifests, table files.
pub trait WritableFile: Send {
    /// Buffer `data` at the end of the file.
    fn append(&mut self, data: &[u8]) -> Result<()>;
    /// Push application buffers to the OS.
    fn flush(&mut self) -> Result<()>;
    /// Force everything to durable storage (fsync).
    fn sync(&mut self) -> Result<()>;
}

/// A file read at arbitrary offsets: table files.
pub trait RandomAccessFile: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
    /// Total file size in bytes.
    fn len(&self) -> Result<u64>;
}

/// Held for the lifetime of an open database; dropping releases the lock.
pub trait DirLock: Send + Sync {}

/// Everything the engine needs from the outside world.
pub trait Storage: Send + Sync {
    fn create_dir_all(&self, dir: &Path) -> Result<()>;
    fn list_dir(&self, dir: &Path) -> Result<Vec<String>>;
    fn exists(&self, path: &Path) -> bool;
    fn file_size(&self, path: &Path) -> Result<u64>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    /// Atomic on POSIX; the crash-safety of the CURRENT pointer relies on it.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn new_writable(&self, path: &Path) -> Result<Box<dyn WritableFile>>;
    fn open_random(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>>;
    /// Slurp a whole file; used for WAL/manifest replay and CURRENT.
    fn read_all(&self, path: &Path) -> Result<Vec<u8>>;

    /// Take an exclusive advisory lock so two engine instances cannot open
    /// the same database directory.
    fn lock_dir(&self, path: &Path) -> Result<Box<dyn DirLock>>;
}

/// Default storage over the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStorage;

struct DiskWritableFile {
    writer: BufWriter<File>,
}

impl WritableFile for DiskWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

struct DiskRandomAccessFile {
    // Interior mutability via try_clone-per-read would cost an fd; instead
    // reads seek on a mutex-guarded handle.
    file: parking_lot::Mutex<File>,
}

impl RandomAccessFile for DiskRandomAccessFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }
}

/// Lock file holding the process id, released on drop.
struct DiskDirLock {
    _file: File,
}

impl DirLock for DiskDirLock {}

impl Storage for DiskStorage {
    fn create_dir_all(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        Ok(())
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn new_writable(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(DiskWritableFile {
            writer: BufWriter::new(file),
        }))
    }

    fn open_random(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        let file = File::open(path)?;
        Ok(Box::new(DiskRandomAccessFile {
            file: parking_lot::Mutex::new(file),
        }))
    }

    fn read_all(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn lock_dir(&self, path: &Path) -> Result<Box<dyn DirLock>> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::InvalidArgument(format!(
                "database already locked by another process: {}",
                path.display()
            ))
        })?;
        // Record the owner pid for debugging
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Box::new(DiskDirLock { _file: file }))
    }
}

/// Helper for the CURRENT-style atomic pointer update: write the contents
/// to a temp file, sync it, then rename over the target.
pub fn write_file_atomic(
    storage: &dyn Storage,
    tmp: &Path,
    target: &Path,
    contents: &[u8],
) -> Result<()> {
    let mut file = storage.new_writable(tmp)?;
    file.append(contents)?;
    file.sync()?;
    drop(file);
    storage.rename(tmp, target)
}

/// Build a path inside the database directory.
pub fn db_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

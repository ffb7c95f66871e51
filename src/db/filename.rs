//! Database directory layout.
//!
//! ```text
//! <dir>/
//!   000003.log        current WAL
//!   000007.sst        table files, named by file number
//!   MANIFEST-000002   version edit log
//!   CURRENT           names the live manifest (updated via rename)
//!   LOCK              advisory lock held while the DB is open
//!   000009.tmp        scratch for atomic replacement
//! ```
//! This layout and the CURRENT rename discipline are part of the durable
//! contract: the same files must mean the same thing across restarts.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::{Storage, write_file_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    Table,
    Manifest,
    Current,
    Lock,
    Temp,
}

pub fn log_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.log"))
}

pub fn table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.sst"))
}

pub fn manifest_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{number:06}"))
}

pub fn current_file_name(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

pub fn lock_file_name(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

pub fn temp_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.tmp"))
}

/// Classify a directory entry. Returns None for foreign files, which the
/// engine leaves strictly alone.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    match name {
        "CURRENT" => return Some((FileType::Current, 0)),
        "LOCK" => return Some((FileType::Lock, 0)),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return rest.parse().ok().map(|n| (FileType::Manifest, n));
    }
    if let Some(stem) = name.strip_suffix(".log") {
        return stem.parse().ok().map(|n| (FileType::Log, n));
    }
    if let Some(stem) = name.strip_suffix(".sst") {
        return stem.parse().ok().map(|n| (FileType::Table, n));
    }
    if let Some(stem) = name.strip_suffix(".tmp") {
        return stem.parse().ok().map(|n| (FileType::Temp, n));
    }
    None
}

/// Point CURRENT at a manifest, atomically. A crash mid-update leaves the
/// old pointer intact — never a torn one.
pub fn set_current_file(storage: &dyn Storage, dir: &Path, manifest_number: u64) -> Result<()> {
    let contents = format!("MANIFEST-{manifest_number:06}\n");
    write_file_atomic(
        storage,
        &temp_file_name(dir, manifest_number),
        &current_file_name(dir),
        contents.as_bytes(),
    )
}

/// Manifest number recorded in CURRENT.
pub fn read_current_file(storage: &dyn Storage, dir: &Path) -> Result<u64> {
    use crate::error::Error;
    let raw = storage.read_all(&current_file_name(dir))?;
    let text = std::str::from_utf8(&raw)
        .map_err(|_| Error::Corruption("CURRENT is not utf-8".into()))?;
    let name = text.trim_end();
    match parse_file_name(name) {
        Some((FileType::Manifest, number)) => Ok(number),
        _ => Err(Error::Corruption(format!(
            "CURRENT does not name a manifest: {name:?}"
        ))),
    }
}

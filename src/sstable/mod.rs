pub mod block;
pub mod builder;
pub mod filter;
pub mod footer;
pub mod reader;

pub use builder::{TableBuilder, TableStats};
pub use reader::{BlockCache, Table};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::storage::RandomAccessFile;
use footer::BlockHandle;

/// Default uncompressed block payload target.
pub const BLOCK_SIZE: usize = 4 * 1024;

/// Full keys are written every this many entries within a block.
pub const BLOCK_RESTART_INTERVAL: usize = 16;

/// Per-block trailer: compression marker (1B) + CRC (4B).
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Compression markers. Only "none" is produced; the marker byte keeps
/// the format open for compressed blocks.
pub const COMPRESSION_NONE: u8 = 0;

pub(crate) fn block_crc(contents: &[u8], compression: u8) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(contents);
    hasher.update(&[compression]);
    hasher.finalize()
}

/// Read one block's contents, verifying the trailer checksum unless the
/// caller explicitly opted out for this read.
pub(crate) fn read_block_contents(
    file: &dyn RandomAccessFile,
    handle: BlockHandle,
    verify_checksums: bool,
) -> Result<Bytes> {
    let raw = file.read_at(handle.offset, handle.size as usize + BLOCK_TRAILER_SIZE)?;
    let contents = &raw[..handle.size as usize];
    let compression = raw[handle.size as usize];
    if verify_checksums {
        let stored =
            u32::from_le_bytes(raw[handle.size as usize + 1..].try_into().unwrap());
        if block_crc(contents, compression) != stored {
            return Err(Error::Corruption(format!(
                "block checksum mismatch at offset {}",
                handle.offset
            )));
        }
    }
    if compression != COMPRESSION_NONE {
        return Err(Error::Corruption(format!(
            "unknown block compression: {compression}"
        )));
    }
    Ok(Bytes::from(raw).slice(..handle.size as usize))
}

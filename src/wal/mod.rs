pub mod reader;
pub mod writer;

pub use reader::LogReader;
pub use writer::LogWriter;

use crate::error::{Error, Result};

/// Logs are framed into fixed-size blocks so a reader can resynchronize
/// without scanning byte by byte. A record larger than the space left in a
/// block is split into fragments.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Fragment header: CRC (4B) + payload length (2B) + kind (1B).
pub const HEADER_SIZE: usize = 7;

/// How a fragment relates to its logical record.
///
/// ```text
/// ┌─────────── block ───────────┐┌─────────── block ───────────┐
/// │ [Full]  [First ············]││[···· Middle ····] [Last]    │
/// └─────────────────────────────┘└─────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Entire record fits in one fragment.
    Full = 1,
    /// Opening fragment of a split record.
    First = 2,
    /// Interior fragment of a split record.
    Middle = 3,
    /// Closing fragment of a split record.
    Last = 4,
}

impl RecordKind {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(RecordKind::Full),
            2 => Ok(RecordKind::First),
            3 => Ok(RecordKind::Middle),
            4 => Ok(RecordKind::Last),
            _ => Err(Error::Corruption(format!("invalid record kind: {byte}"))),
        }
    }
}

/// CRC over the kind byte and the fragment payload. Covering the kind
/// catches a header torn independently of its payload.
pub(crate) fn record_crc(kind: RecordKind, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind as u8]);
    hasher.update(payload);
    hasher.finalize()
}

use crate::error::Result;
use crate::storage::WritableFile;
use crate::wal::{BLOCK_SIZE, HEADER_SIZE, RecordKind, record_crc};

/// Appends framed, checksummed records to a log file.
///
/// Used for both the write-ahead log (payload = serialized WriteBatch) and
/// the manifest (payload = serialized VersionEdit).
///
/// Every record must be durable before its write is acknowledged to the
/// client; callers decide when to [`sync`](LogWriter::sync). Two layers of
/// buffering apply:
///   flush() → engine buffer → OS page cache
///   sync()  → OS page cache → physical disk
pub struct LogWriter {
    file: Box<dyn WritableFile>,
    /// Byte offset within the current block.
    block_offset: usize,
}

impl LogWriter {
    pub fn new(file: Box<dyn WritableFile>) -> Self {
        LogWriter {
            file,
            block_offset: 0,
        }
    }

    /// Append one logical record, fragmenting across blocks as needed.
    pub fn add_record(&mut self, payload: &[u8]) -> Result<()> {
        let mut left = payload;
        let mut begin = true;

        // Emit at least one fragment even for an empty payload
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Too little room for a header; pad the block with zeros
                if leftover > 0 {
                    self.file.append(&[0u8; HEADER_SIZE][..leftover])?;
                }
                self.block_offset = 0;
            }

            let available = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(available);
            let end = fragment_len == left.len();

            let kind = match (begin, end) {
                (true, true) => RecordKind::Full,
                (true, false) => RecordKind::First,
                (false, true) => RecordKind::Last,
                (false, false) => RecordKind::Middle,
            };

            self.emit_fragment(kind, &left[..fragment_len])?;
            left = &left[fragment_len..];
            begin = false;
            if end {
                break;
            }
        }
        self.file.flush()?;
        Ok(())
    }

    fn emit_fragment(&mut self, kind: RecordKind, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= u16::MAX as usize);
        let crc = record_crc(kind, payload);

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&crc.to_le_bytes());
        header[4..6].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        header[6] = kind as u8;

        self.file.append(&header)?;
        self.file.append(payload)?;
        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }

    /// Force fsync to disk. Ensures all appended records are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }
}

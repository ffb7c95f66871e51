use crate::error::{Error, Result};
use crate::wal::{BLOCK_SIZE, HEADER_SIZE, RecordKind, record_crc};

/// Reads logical records back from a log file for recovery.
///
/// Loads the entire file into memory, then reassembles fragments record by
/// record. Tail tolerance: a crash can tear the last record mid-write, so
/// a truncated or checksum-failing fragment that runs to the end of the
/// file terminates iteration cleanly — everything before it is valid.
/// The same damage strictly inside the file is real corruption and is
/// surfaced as an error.
pub struct LogReader {
    data: Vec<u8>,
}

impl LogReader {
    pub fn new(data: Vec<u8>) -> Self {
        LogReader { data }
    }

    /// Iterate over all complete records in the log.
    pub fn iter(&self) -> LogIterator<'_> {
        LogIterator {
            data: &self.data,
            offset: 0,
            done: false,
        }
    }
}

/// Yields `Ok(record)` per logical record; a single `Err` (then end) on
/// interior corruption; plain end on tail damage.
pub struct LogIterator<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

enum Fragment<'a> {
    Piece(RecordKind, &'a [u8]),
    /// Damage that reaches the end of the file — expected after a crash.
    Tail,
    /// Damage with valid data beyond it.
    Corrupt(String),
}

impl<'a> LogIterator<'a> {
    fn next_fragment(&mut self) -> Option<Fragment<'a>> {
        loop {
            if self.offset >= self.data.len() {
                return None;
            }
            let in_block = self.offset % BLOCK_SIZE;
            if BLOCK_SIZE - in_block < HEADER_SIZE {
                // Block trailer padding
                self.offset += BLOCK_SIZE - in_block;
                continue;
            }
            let remaining = self.data.len() - self.offset;
            if remaining < HEADER_SIZE {
                return Some(Fragment::Tail);
            }

            let header = &self.data[self.offset..self.offset + HEADER_SIZE];
            let stored_crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
            let length = u16::from_le_bytes(header[4..6].try_into().unwrap()) as usize;
            let kind_byte = header[6];

            // A zeroed header is block padding from a pre-allocated file
            if stored_crc == 0 && length == 0 && kind_byte == 0 {
                return Some(Fragment::Tail);
            }

            let kind = match RecordKind::from_u8(kind_byte) {
                Ok(k) => k,
                Err(_) => {
                    return Some(if self.damage_reaches_end() {
                        Fragment::Tail
                    } else {
                        Fragment::Corrupt(format!("invalid record kind: {kind_byte}"))
                    });
                }
            };

            let payload_end = self.offset + HEADER_SIZE + length;
            if payload_end > self.data.len() {
                // Fragment promised more bytes than the file holds
                return Some(Fragment::Tail);
            }

            let payload = &self.data[self.offset + HEADER_SIZE..payload_end];
            if record_crc(kind, payload) != stored_crc {
                return Some(if payload_end >= self.data.len() {
                    Fragment::Tail
                } else {
                    Fragment::Corrupt("record checksum mismatch".into())
                });
            }

            self.offset = payload_end;
            return Some(Fragment::Piece(kind, payload));
        }
    }

    /// Whether everything from the current offset to EOF fits inside the
    /// final block — the only place torn writes can legitimately appear.
    fn damage_reaches_end(&self) -> bool {
        self.data.len() - self.offset <= BLOCK_SIZE
    }
}

impl<'a> Iterator for LogIterator<'a> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut record: Option<Vec<u8>> = None;

        loop {
            match self.next_fragment() {
                None | Some(Fragment::Tail) => {
                    // A partially assembled record at EOF is a torn write
                    self.done = true;
                    return None;
                }
                Some(Fragment::Corrupt(msg)) => {
                    self.done = true;
                    return Some(Err(Error::Corruption(msg)));
                }
                Some(Fragment::Piece(kind, payload)) => match (kind, record.as_mut()) {
                    (RecordKind::Full, None) => return Some(Ok(payload.to_vec())),
                    (RecordKind::First, None) => record = Some(payload.to_vec()),
                    (RecordKind::Middle, Some(buf)) => buf.extend_from_slice(payload),
                    (RecordKind::Last, Some(buf)) => {
                        buf.extend_from_slice(payload);
                        return Some(Ok(record.take().unwrap()));
                    }
                    // Fragment sequence broken (e.g. Middle with no First)
                    _ => {
                        self.done = true;
                        return if self.damage_reaches_end() {
                            None
                        } else {
                            Some(Err(Error::Corruption(
                                "fragment out of sequence".into(),
                            )))
                        };
                    }
                },
            }
        }
    }
}

use crate::encoding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice,
    put_varint32, put_varint64,
};
use crate::error::{Error, Result};
use crate::manifest::NUM_LEVELS;
use crate::types::SequenceNumber;

/// A live table file as the manifest sees it. `smallest`/`largest` are
/// encoded internal keys bounding the file's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub number: u64,
    pub file_size: u64,
    pub smallest: Vec<u8>,
    pub largest: Vec<u8>,
}

// Field tags in the serialized edit. Unknown tags are corruption: edits
// are written and read by the same implementation.
const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;

/// One incremental change to the file organization, durably logged in the
/// manifest before it takes effect. Replaying every edit from a manifest
/// reconstructs the exact Version the engine last installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEdit {
    pub comparator_name: Option<String>,
    /// WALs with numbers below this are fully flushed and replayable-free.
    pub log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    /// Round-robin cursor per level for fair compaction picking.
    pub compact_pointers: Vec<(usize, Vec<u8>)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, FileMeta)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        VersionEdit::default()
    }

    pub fn add_file(&mut self, level: usize, meta: FileMeta) {
        self.new_files.push((level, meta));
    }

    pub fn remove_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: Vec<u8>) {
        self.compact_pointers.push((level, key));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(name) = &self.comparator_name {
            put_varint32(&mut buf, TAG_COMPARATOR);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(&mut buf, TAG_LOG_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(&mut buf, TAG_NEXT_FILE_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(&mut buf, TAG_LAST_SEQUENCE);
            put_varint64(&mut buf, n);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut buf, TAG_COMPACT_POINTER);
            put_varint32(&mut buf, *level as u32);
            put_length_prefixed_slice(&mut buf, key);
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut buf, TAG_DELETED_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, *number);
        }
        for (level, meta) in &self.new_files {
            put_varint32(&mut buf, TAG_NEW_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, meta.number);
            put_varint64(&mut buf, meta.file_size);
            put_length_prefixed_slice(&mut buf, &meta.smallest);
            put_length_prefixed_slice(&mut buf, &meta.largest);
        }
        buf
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        while !data.is_empty() {
            let (tag, n) = get_varint32(data)?;
            data = &data[n..];
            match tag {
                TAG_COMPARATOR => {
                    let (name, n) = get_length_prefixed_slice(data)?;
                    edit.comparator_name = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| Error::Corruption("comparator name not utf-8".into()))?,
                    );
                    data = &data[n..];
                }
                TAG_LOG_NUMBER => {
                    let (v, n) = get_varint64(data)?;
                    edit.log_number = Some(v);
                    data = &data[n..];
                }
                TAG_NEXT_FILE_NUMBER => {
                    let (v, n) = get_varint64(data)?;
                    edit.next_file_number = Some(v);
                    data = &data[n..];
                }
                TAG_LAST_SEQUENCE => {
                    let (v, n) = get_varint64(data)?;
                    edit.last_sequence = Some(v);
                    data = &data[n..];
                }
                TAG_COMPACT_POINTER => {
                    let (level, n) = decode_level(data)?;
                    data = &data[n..];
                    let (key, n) = get_length_prefixed_slice(data)?;
                    edit.compact_pointers.push((level, key.to_vec()));
                    data = &data[n..];
                }
                TAG_DELETED_FILE => {
                    let (level, n) = decode_level(data)?;
                    data = &data[n..];
                    let (number, n) = get_varint64(data)?;
                    edit.deleted_files.push((level, number));
                    data = &data[n..];
                }
                TAG_NEW_FILE => {
                    let (level, n) = decode_level(data)?;
                    data = &data[n..];
                    let (number, n) = get_varint64(data)?;
                    data = &data[n..];
                    let (file_size, n) = get_varint64(data)?;
                    data = &data[n..];
                    let (smallest, n) = get_length_prefixed_slice(data)?;
                    let smallest = smallest.to_vec();
                    data = &data[n..];
                    let (largest, n) = get_length_prefixed_slice(data)?;
                    let largest = largest.to_vec();
                    data = &data[n..];
                    edit.new_files.push((
                        level,
                        FileMeta {
                            number,
                            file_size,
                            smallest,
                            largest,
                        },
                    ));
                }
                _ => {
                    return Err(Error::Corruption(format!(
                        "unknown version edit tag: {tag}"
                    )));
                }
            }
        }
        Ok(edit)
    }
}

fn decode_level(data: &[u8]) -> Result<(usize, usize)> {
    let (level, n) = get_varint32(data)?;
    if level as usize >= NUM_LEVELS {
        return Err(Error::Corruption(format!("level out of range: {level}")));
    }
    Ok((level as usize, n))
}

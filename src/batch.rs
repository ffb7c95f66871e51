use crate::encoding::{
    decode_fixed32, decode_fixed64, get_length_prefixed_slice, put_length_prefixed_slice,
};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::types::{SequenceNumber, ValueType};

/// Header: sequence number (8B) followed by operation count (4B).
pub const BATCH_HEADER_SIZE: usize = 12;

/// An ordered set of Put/Delete operations applied atomically.
///
/// The byte representation doubles as the WAL payload for a commit:
///
/// ```text
/// ┌───────────────┬────────────┬──────────────────────────────┐
/// │ Sequence (8B) │ Count (4B) │ Op … (tag, key[, value])     │
/// └───────────────┴────────────┴──────────────────────────────┘
/// ```
///
/// Each op is a tag byte followed by a varint-length-prefixed key, and for
/// a Put a varint-length-prefixed value. The sequence field is assigned at
/// commit time; the batch occupies the contiguous range
/// `[sequence, sequence + count)`.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        WriteBatch {
            rep: vec![0u8; BATCH_HEADER_SIZE],
        }
    }

    /// Reconstruct a batch from its serialized form (WAL replay).
    pub fn from_contents(rep: Vec<u8>) -> Result<Self> {
        if rep.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption("write batch header missing".into()));
        }
        Ok(WriteBatch { rep })
    }

    /// Queue a key-value insertion.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Put as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    /// Queue a deletion (tombstone).
    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Delete as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    /// Drop all queued operations.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
    }

    /// Number of queued operations.
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..12])
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..12].copy_from_slice(&count.to_le_bytes());
    }

    /// Sequence number assigned to the first operation.
    pub fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep[0..8])
    }

    pub(crate) fn set_sequence(&mut self, seq: SequenceNumber) {
        self.rep[0..8].copy_from_slice(&seq.to_le_bytes());
    }

    /// Serialized size in bytes.
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The serialized representation (the WAL payload).
    pub fn contents(&self) -> &[u8] {
        &self.rep
    }

    /// Concatenate `other`'s operations onto this batch (group commit).
    pub(crate) fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
    }

    /// Walk the queued operations in insertion order.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(ValueType, &[u8], &[u8]),
    {
        let mut data = &self.rep[BATCH_HEADER_SIZE..];
        let mut found = 0u32;
        while !data.is_empty() {
            let tag = ValueType::from_u8(data[0])
                .ok_or_else(|| Error::Corruption(format!("unknown batch tag: {}", data[0])))?;
            data = &data[1..];
            let (key, n) = get_length_prefixed_slice(data)?;
            data = &data[n..];
            match tag {
                ValueType::Put => {
                    let (value, n) = get_length_prefixed_slice(data)?;
                    data = &data[n..];
                    f(tag, key, value);
                }
                ValueType::Delete => f(tag, key, &[]),
            }
            found += 1;
        }
        if found != self.count() {
            return Err(Error::Corruption("write batch count mismatch".into()));
        }
        Ok(())
    }

    /// Apply every operation to `mem`, numbering them from the batch's
    /// sequence. Insertion order preserves the assigned sequence order.
    pub fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut seq = self.sequence();
        self.iterate(|tag, key, value| {
            mem.insert(seq, tag, key, value);
            seq += 1;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(batch: &WriteBatch) -> Vec<(ValueType, Vec<u8>, Vec<u8>)> {
        let mut ops = Vec::new();
        batch
            .iterate(|t, k, v| ops.push((t, k.to_vec(), v.to_vec())))
            .unwrap();
        ops
    }

    #[test]
    fn empty_batch() {
        let batch = WriteBatch::new();
        assert_eq!(batch.count(), 0);
        assert!(batch.is_empty());
        assert_eq!(batch.approximate_size(), BATCH_HEADER_SIZE);
    }

    #[test]
    fn put_delete_roundtrip() {
        let mut batch = WriteBatch::new();
        batch.put(b"alpha", b"1");
        batch.delete(b"beta");
        batch.put(b"gamma", b"3");
        assert_eq!(batch.count(), 3);

        let ops = collect(&batch);
        assert_eq!(ops[0], (ValueType::Put, b"alpha".to_vec(), b"1".to_vec()));
        assert_eq!(ops[1], (ValueType::Delete, b"beta".to_vec(), vec![]));
        assert_eq!(ops[2], (ValueType::Put, b"gamma".to_vec(), b"3".to_vec()));
    }

    #[test]
    fn sequence_assignment() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        batch.set_sequence(100);
        assert_eq!(batch.sequence(), 100);

        // Survives serialization
        let restored = WriteBatch::from_contents(batch.contents().to_vec()).unwrap();
        assert_eq!(restored.sequence(), 100);
        assert_eq!(restored.count(), 1);
    }

    #[test]
    fn append_concatenates() {
        let mut leader = WriteBatch::new();
        leader.put(b"a", b"1");
        let mut follower = WriteBatch::new();
        follower.delete(b"b");
        follower.put(b"c", b"2");

        leader.append(&follower);
        assert_eq!(leader.count(), 3);
        let ops = collect(&leader);
        assert_eq!(ops[1].1, b"b");
        assert_eq!(ops[2].1, b"c");
    }

    #[test]
    fn clear_resets() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        batch.clear();
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.approximate_size(), BATCH_HEADER_SIZE);
    }

    #[test]
    fn corrupt_tag_detected() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        let mut raw = batch.contents().to_vec();
        raw[BATCH_HEADER_SIZE] = 0x7F; // not a valid tag
        let bad = WriteBatch::from_contents(raw).unwrap();
        assert!(bad.iterate(|_, _, _| {}).is_err());
    }

    #[test]
    fn count_mismatch_detected() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        let mut raw = batch.contents().to_vec();
        raw[8..12].copy_from_slice(&5u32.to_le_bytes()); // claims 5 ops
        let bad = WriteBatch::from_contents(raw).unwrap();
        assert!(bad.iterate(|_, _, _| {}).is_err());
    }
}

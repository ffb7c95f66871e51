use crate::encoding::{put_fixed32, put_varint32};

/// Accumulates sorted key-value pairs and serializes them into a block.
///
/// A block is typically 4KB (matching OS page size / SSD block size).
/// Keys are delta-compressed against their predecessor: each entry stores
/// only the suffix that differs, prefixed by how many bytes it shares.
/// Every `restart_interval` entries the full key is written out (a
/// "restart point"), so a reader can binary-search the restart array and
/// only scan linearly within one interval.
///
/// On-disk layout of a block:
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │ Entry 0: [shared(v)][non_shared(v)][val_len(v)][key Δ][val] │
/// │ Entry 1: …                                                  │
/// │ Entry N: …                                                  │
/// ├─────────────────────────────────────────────────────────────┤
/// │ Restart array: [offset_0(4B)]…[offset_R(4B)]                │
/// │ Restart count (4B)                                          │
/// └─────────────────────────────────────────────────────────────┘
/// ```
/// (v) = varint. Entry 0 of every restart interval has shared = 0.
pub struct BlockBuilder {
    data: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    /// Entries since the last restart point.
    counter: usize,
    last_key: Vec<u8>,
    num_entries: usize,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1);
        BlockBuilder {
            data: Vec::new(),
            restarts: vec![0], // first restart is always at offset 0
            restart_interval,
            counter: 0,
            last_key: Vec::new(),
            num_entries: 0,
        }
    }

    /// Append an entry. Keys MUST arrive in strictly ascending order —
    /// feeding unsorted keys is a programming error, not an I/O condition.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        // Full ordering is enforced by the table builder, which owns the
        // comparator; the delta encoding itself only breaks on duplicates.
        assert!(
            self.num_entries == 0 || key != self.last_key.as_slice(),
            "keys must be added in strictly ascending order"
        );

        let shared = if self.counter < self.restart_interval {
            shared_prefix_len(&self.last_key, key)
        } else {
            // Restart point: store the full key
            self.restarts.push(self.data.len() as u32);
            self.counter = 0;
            0
        };
        let non_shared = key.len() - shared;

        put_varint32(&mut self.data, shared as u32);
        put_varint32(&mut self.data, non_shared as u32);
        put_varint32(&mut self.data, value.len() as u32);
        self.data.extend_from_slice(&key[shared..]);
        self.data.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
        self.num_entries += 1;
    }

    /// Finalize: append the restart array and its length.
    pub fn build(mut self) -> Vec<u8> {
        for &restart in &self.restarts {
            put_fixed32(&mut self.data, restart);
        }
        put_fixed32(&mut self.data, self.restarts.len() as u32);
        self.data
    }

    /// Current serialized size if finished now.
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// Last key added (needed for the index entry of a finished block).
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    let mut i = 0;
    while i < n && a[i] == b[i] {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_is_just_restart_array() {
        let builder = BlockBuilder::new(16);
        let block = builder.build();
        // One restart offset + count
        assert_eq!(block.len(), 8);
    }

    #[test]
    fn prefix_compression_shrinks_output() {
        let mut compressed = BlockBuilder::new(16);
        let mut uncompressed = BlockBuilder::new(1); // restart every entry
        for i in 0..64u32 {
            let key = format!("common_prefix_key_{i:04}");
            compressed.add(key.as_bytes(), b"v");
            uncompressed.add(key.as_bytes(), b"v");
        }
        assert!(compressed.build().len() < uncompressed.build().len());
    }

    #[test]
    fn estimated_size_tracks_build() {
        let mut builder = BlockBuilder::new(16);
        for i in 0..10u32 {
            builder.add(format!("key{i:02}").as_bytes(), b"value");
        }
        let estimated = builder.estimated_size();
        assert_eq!(builder.build().len(), estimated);
    }

    #[test]
    #[should_panic(expected = "ascending order")]
    fn duplicate_key_panics() {
        let mut builder = BlockBuilder::new(16);
        builder.add(b"k", b"1");
        builder.add(b"k", b"2");
    }
}

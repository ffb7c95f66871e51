use crate::encoding::{decode_fixed64, put_fixed64};

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Monotonically increasing counter assigned to every write.
/// Provides a total ordering of all mutations.
pub type SequenceNumber = u64;

/// Sequence numbers share a u64 with the one-byte value tag, so the top
/// 8 bits are reserved.
pub const MAX_SEQUENCE: SequenceNumber = (1 << 56) - 1;

/// Size of the `seq << 8 | tag` trailer appended to every user key.
pub const INTERNAL_KEY_TRAILER: usize = 8;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone — the key isn't removed, it's marked as
/// deleted until compaction can prove nothing below still needs it.
///
/// Numeric values matter: the trailer sorts descending, so Put (1) orders
/// before Delete (0) within an equal (user_key, sequence) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A delete (tombstone marker).
    Delete = 0x00,
    /// A normal put operation.
    Put = 0x01,
}

impl ValueType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ValueType::Delete),
            0x01 => Some(ValueType::Put),
            _ => None,
        }
    }
}

/// Pack a sequence number and value type into the 8-byte trailer.
pub fn pack_sequence_and_type(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE);
    (seq << 8) | t as u64
}

/// Append `user_key ++ fixed64(seq << 8 | tag)` to `buf`.
///
/// This is the engine's true sort key: user key ascending, then the packed
/// trailer descending, which yields newest-sequence-first among duplicates.
pub fn append_internal_key(buf: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, t: ValueType) {
    buf.extend_from_slice(user_key);
    put_fixed64(buf, pack_sequence_and_type(seq, t));
}

/// Build an encoded internal key.
pub fn make_internal_key(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER);
    append_internal_key(&mut buf, user_key, seq, t);
    buf
}

/// The user-key portion of an encoded internal key.
///
/// # Panics
/// Panics if `ikey` is shorter than the trailer — internal keys are only
/// ever produced by this module, so a short one is a programming error.
pub fn extract_user_key(ikey: &[u8]) -> &[u8] {
    assert!(ikey.len() >= INTERNAL_KEY_TRAILER);
    &ikey[..ikey.len() - INTERNAL_KEY_TRAILER]
}

/// An internal key split back into its parts. Borrows from the encoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    /// Decode an encoded internal key. Returns None if the trailer is
    /// missing or carries an unknown tag.
    pub fn parse(ikey: &'a [u8]) -> Option<Self> {
        if ikey.len() < INTERNAL_KEY_TRAILER {
            return None;
        }
        let trailer = decode_fixed64(&ikey[ikey.len() - INTERNAL_KEY_TRAILER..]);
        let value_type = ValueType::from_u8((trailer & 0xFF) as u8)?;
        Some(ParsedInternalKey {
            user_key: &ikey[..ikey.len() - INTERNAL_KEY_TRAILER],
            sequence: trailer >> 8,
            value_type,
        })
    }
}

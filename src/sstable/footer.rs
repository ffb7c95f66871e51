use crate::encoding::{decode_fixed64, get_varint64, put_fixed64, put_varint64};
use crate::error::{Error, Result};

/// Magic number terminating every table file.
pub const TABLE_MAGIC: u64 = 0x5354524154414442; // "STRATADB"

/// Location of a block inside a table file. The size excludes the
/// per-block trailer (compression marker + checksum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    /// A zero handle marks "no such block" (e.g. a table built without a
    /// filter policy).
    pub fn is_null(&self) -> bool {
        self.offset == 0 && self.size == 0
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_varint64(buf, self.offset);
        put_varint64(buf, self.size);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        self.encode_to(&mut buf);
        buf
    }

    /// Decode from the start of `data`, returning (handle, bytes consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (offset, n1) = get_varint64(data)?;
        let (size, n2) = get_varint64(&data[n1..])?;
        Ok((BlockHandle { offset, size }, n1 + n2))
    }
}

/// The footer sits at the end of the table file and tells the reader where
/// to find the filter and index blocks — the bootstrap for everything else.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Filter block handle (varint)         │
/// │ Index block handle (varint)          │
/// │ …zero padding to 40 bytes…           │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Footer {
    pub filter_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Fixed size: two maximal varint handles (2 × 20) pad to 40, plus the
    /// 8-byte magic.
    pub const SIZE: usize = 48;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.filter_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(Self::SIZE - 8, 0);
        put_fixed64(&mut buf, TABLE_MAGIC);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let magic = decode_fixed64(&data[Self::SIZE - 8..]);
        if magic != TABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad table magic: expected {TABLE_MAGIC:#x}, got {magic:#x}"
            )));
        }
        let (filter_handle, n) = BlockHandle::decode(data)?;
        let (index_handle, _) = BlockHandle::decode(&data[n..])?;
        Ok(Footer {
            filter_handle,
            index_handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_roundtrip() {
        let handle = BlockHandle::new(4096, 512);
        let encoded = handle.encode();
        let (decoded, consumed) = BlockHandle::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, handle);
    }

    #[test]
    fn footer_roundtrip() {
        let footer = Footer {
            filter_handle: BlockHandle::new(8192, 100),
            index_handle: BlockHandle::new(8300, 555),
        };
        let encoded = footer.encode();
        assert_eq!(encoded.len(), Footer::SIZE);
        let decoded = Footer::decode(&encoded).unwrap();
        assert_eq!(decoded.filter_handle, footer.filter_handle);
        assert_eq!(decoded.index_handle, footer.index_handle);
    }

    #[test]
    fn footer_without_filter() {
        let footer = Footer {
            filter_handle: BlockHandle::default(),
            index_handle: BlockHandle::new(10, 20),
        };
        let decoded = Footer::decode(&footer.encode()).unwrap();
        assert!(decoded.filter_handle.is_null());
    }

    #[test]
    fn footer_bad_magic() {
        let footer = Footer {
            filter_handle: BlockHandle::default(),
            index_handle: BlockHandle::new(0, 0),
        };
        let mut encoded = footer.encode();
        encoded[Footer::SIZE - 1] ^= 0xFF;
        assert!(Footer::decode(&encoded).is_err());
    }

    #[test]
    fn footer_too_short() {
        assert!(Footer::decode(&[0u8; 10]).is_err());
    }
}

// vim: tw=80
//! The RAID-1 on-disk superblock codec.
//!
//! Layout: a fixed-size page at child offset 0, little-endian fields in
//! declaration order, followed immediately by the bitmap pages. `magic`
//! and `format_version` are validated first; a mismatch means "not a
//! superblock", not a corrupt one.

use byteorder::{ByteOrder, LittleEndian};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    types::ChildId,
};

pub const MAGIC: &[u8; 8] = b"RAID1SB\0";
pub const FORMAT_VERSION: u32 = 1;

pub const PAGE_SIZE: u64 = 4096;
pub const CHUNK_SIZE: u64 = 32 * 1024;
pub const RESERVED_SIZE: u64 = 512 * 1024;

// magic(8) + format_version(4) + array_uuid(16) + bitmap_uuid(16)
// + page_count(4) + chunk_size(4) + unmount_clean(1) + generation(8)
// + degraded_child(1), padded out to a page.
const HEADER_LEN: usize = 8 + 4 + 16 + 16 + 4 + 4 + 1 + 8 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub array_uuid: Uuid,
    pub bitmap_uuid: Uuid,
    pub bitmap_page_count: u32,
    pub chunk_size: u32,
    pub unmount_clean: bool,
    pub generation: u64,
    pub degraded_child: Option<ChildId>,
}

impl SuperBlock {
    pub fn fresh(array_uuid: Uuid, bitmap_uuid: Uuid, bitmap_page_count: u32, chunk_size: u32) -> Self {
        Self {
            array_uuid,
            bitmap_uuid,
            bitmap_page_count,
            chunk_size,
            unmount_clean: false,
            generation: 0,
            degraded_child: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE as usize];
        buf[0..8].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut buf[8..12], FORMAT_VERSION);
        buf[12..28].copy_from_slice(self.array_uuid.as_bytes());
        buf[28..44].copy_from_slice(self.bitmap_uuid.as_bytes());
        LittleEndian::write_u32(&mut buf[44..48], self.bitmap_page_count);
        LittleEndian::write_u32(&mut buf[48..52], self.chunk_size);
        buf[52] = self.unmount_clean as u8;
        LittleEndian::write_u64(&mut buf[53..61], self.generation);
        buf[61] = match self.degraded_child {
            None => 0,
            Some(ChildId::A) => 1,
            Some(ChildId::B) => 2,
            Some(ChildId::Index(_)) => unreachable!("RAID-1 only has A/B children"),
        };
        debug_assert!(HEADER_LEN <= buf.len());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Mismatch("superblock buffer shorter than the header".into()));
        }
        if &buf[0..8] != MAGIC {
            return Err(Error::Mismatch("bad magic: not a RAID-1 superblock".into()));
        }
        let format_version = LittleEndian::read_u32(&buf[8..12]);
        if format_version != FORMAT_VERSION {
            return Err(Error::Mismatch(format!(
                "unsupported superblock format version {format_version}"
            )));
        }
        let array_uuid = Uuid::from_slice(&buf[12..28]).map_err(|e| Error::Mismatch(e.to_string()))?;
        let bitmap_uuid = Uuid::from_slice(&buf[28..44]).map_err(|e| Error::Mismatch(e.to_string()))?;
        let bitmap_page_count = LittleEndian::read_u32(&buf[44..48]);
        let chunk_size = LittleEndian::read_u32(&buf[48..52]);
        let unmount_clean = buf[52] != 0;
        let generation = LittleEndian::read_u64(&buf[53..61]);
        let degraded_child = match buf[61] {
            0 => None,
            1 => Some(ChildId::A),
            2 => Some(ChildId::B),
            other => return Err(Error::Mismatch(format!("invalid degraded_child byte {other}"))),
        };
        Ok(Self {
            array_uuid,
            bitmap_uuid,
            bitmap_page_count,
            chunk_size,
            unmount_clean,
            generation,
            degraded_child,
        })
    }

    /// Validate that `self` (read from one child) agrees with `other`
    /// (read from its partner) on array identity, per spec's reopen
    /// contract.
    pub fn agrees_with(&self, other: &SuperBlock) -> Result<()> {
        if self.array_uuid != other.array_uuid {
            return Err(Error::Mismatch("array_uuid disagreement between children".into()));
        }
        if self.bitmap_uuid != other.bitmap_uuid {
            return Err(Error::Mismatch("bitmap.uuid disagreement between children".into()));
        }
        Ok(())
    }
}

/// Maximum number of bitmap pages that fit in the reserved region.
pub fn max_bitmap_pages(reserved_size: u64, page_size: u64) -> u32 {
    ((reserved_size - page_size) / page_size) as u32
}

/// Maximum user-visible capacity addressable by `page_count` bitmap pages
/// at the given `chunk_size` and `page_size` geometry.
pub fn max_capacity(page_count: u32, chunk_size: u64, page_size: u64) -> u64 {
    page_count as u64 * page_size * 8 * chunk_size
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let sb = SuperBlock {
            array_uuid: Uuid::new_v4(),
            bitmap_uuid: Uuid::new_v4(),
            bitmap_page_count: 12,
            chunk_size: CHUNK_SIZE as u32,
            unmount_clean: true,
            generation: 42,
            degraded_child: Some(ChildId::B),
        };
        let buf = sb.encode();
        let decoded = SuperBlock::decode(&buf).unwrap();
        assert_eq!(sb, decoded);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let buf = vec![0xffu8; PAGE_SIZE as usize];
        assert!(SuperBlock::decode(&buf).is_err());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(SuperBlock::decode(&[0u8; 4]).is_err());
    }

    #[test]
    fn agrees_with_detects_array_uuid_mismatch() {
        let a = SuperBlock::fresh(Uuid::new_v4(), Uuid::new_v4(), 1, CHUNK_SIZE as u32);
        let b = SuperBlock::fresh(Uuid::new_v4(), a.bitmap_uuid, 1, CHUNK_SIZE as u32);
        assert!(a.agrees_with(&b).is_err());
    }

    #[test]
    fn agrees_with_detects_bitmap_uuid_mismatch() {
        let a = SuperBlock::fresh(Uuid::new_v4(), Uuid::new_v4(), 1, CHUNK_SIZE as u32);
        let b = SuperBlock::fresh(a.array_uuid, Uuid::new_v4(), 1, CHUNK_SIZE as u32);
        assert!(a.agrees_with(&b).is_err());
    }

    #[test]
    fn agrees_with_accepts_matching_identity() {
        let uuid_a = Uuid::new_v4();
        let uuid_b = Uuid::new_v4();
        let a = SuperBlock::fresh(uuid_a, uuid_b, 1, CHUNK_SIZE as u32);
        let b = SuperBlock { generation: 9, ..SuperBlock::fresh(uuid_a, uuid_b, 1, CHUNK_SIZE as u32) };
        assert!(a.agrees_with(&b).is_ok());
    }

    #[test]
    fn max_bitmap_pages_for_default_geometry() {
        assert_eq!(max_bitmap_pages(RESERVED_SIZE, PAGE_SIZE), 127);
    }

    #[test]
    fn capacity_exactly_at_maximum_is_not_exceeded() {
        let pages = max_bitmap_pages(RESERVED_SIZE, PAGE_SIZE);
        let cap = max_capacity(pages, CHUNK_SIZE, PAGE_SIZE);
        assert!(cap > 0);
    }
}

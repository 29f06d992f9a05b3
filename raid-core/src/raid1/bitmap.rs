// vim: tw=80
//! The dirty-region bitmap: one bit per `chunk_size` byte range of the
//! user-visible address space, tracking which regions may differ between
//! children and must eventually be resynced.

use fixedbitset::FixedBitSet;

use crate::types::div_roundup;

/// Number of bits a single `page_size`-sized bitmap page holds.
fn bits_per_page(page_size: u64) -> u64 {
    page_size * 8
}

pub struct Bitmap {
    bits: FixedBitSet,
    chunk_size: u64,
    page_size: u64,
}

impl Bitmap {
    /// A zeroed bitmap able to cover `capacity` bytes at `chunk_size`
    /// granularity, rounded up to a whole number of `page_size` pages.
    pub fn new(capacity: u64, chunk_size: u64, page_size: u64) -> Self {
        let needed_bits = div_roundup(capacity, chunk_size);
        let page_bits = bits_per_page(page_size);
        let total_bits = div_roundup(needed_bits, page_bits) * page_bits;
        Self {
            bits: FixedBitSet::with_capacity(total_bits as usize),
            chunk_size,
            page_size,
        }
    }

    pub fn from_raw(bits: FixedBitSet, chunk_size: u64, page_size: u64) -> Self {
        Self { bits, chunk_size, page_size }
    }

    pub fn page_count(&self) -> u32 {
        (self.bits.len() as u64 / bits_per_page(self.page_size)) as u32
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Bit indices covering user byte range `[offset, offset+len)`.
    pub fn bits_for_range(&self, offset: u64, len: u64) -> std::ops::Range<usize> {
        let first = offset / self.chunk_size;
        let last = div_roundup(offset + len, self.chunk_size);
        first as usize..last as usize
    }

    /// Bitmap page indices touched by user byte range `[offset, offset+len)`.
    pub fn pages_for_range(&self, offset: u64, len: u64) -> Vec<u32> {
        let bits = self.bits_for_range(offset, len);
        let page_bits = bits_per_page(self.page_size);
        let first_page = bits.start as u64 / page_bits;
        let last_page = if bits.end == 0 { 0 } else { (bits.end as u64 - 1) / page_bits };
        (first_page..=last_page).map(|p| p as u32).collect()
    }

    pub fn is_set(&self, bit: usize) -> bool {
        self.bits.contains(bit)
    }

    pub fn set(&mut self, bit: usize) {
        self.bits.set(bit, true);
    }

    /// Mark every bit covering `[offset, offset+len)` dirty. Returns the
    /// set of bit indices that were newly dirtied (were clean before this
    /// call) and the set of pages that contain any bit touched by this
    /// range at all (used to decide which pages must be (re)persisted).
    pub fn dirty_range(&mut self, offset: u64, len: u64) -> (Vec<usize>, Vec<u32>) {
        let range = self.bits_for_range(offset, len);
        let mut newly_dirty = Vec::new();
        for bit in range {
            if !self.bits.contains(bit) {
                self.bits.set(bit, true);
                newly_dirty.push(bit);
            }
        }
        (newly_dirty, self.pages_for_range(offset, len))
    }

    /// Merge another child's bitmap into this one with a bitwise OR, as
    /// done on reopen: any bit dirty on either side is dirty.
    pub fn merge(&mut self, other: &Bitmap) {
        self.bits.union_with(&other.bits);
    }

    pub fn dirty_page_count(&self) -> u64 {
        let page_bits = bits_per_page(self.page_size) as usize;
        (0..self.page_count() as usize)
            .filter(|&p| {
                let start = p * page_bits;
                let end = (start + page_bits).min(self.bits.len());
                self.bits.count_ones(start..end) > 0
            })
            .count() as u64
    }

    /// Raw bytes of bitmap page `page_idx`, `page_size` long, little-endian
    /// bit order within each byte (bit 0 is the LSB of the first byte).
    pub fn page_bytes(&self, page_idx: u32) -> Vec<u8> {
        let page_bits = bits_per_page(self.page_size) as usize;
        let start = page_idx as usize * page_bits;
        let mut out = vec![0u8; self.page_size as usize];
        for i in 0..page_bits {
            if self.bits.contains(start + i) {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        out
    }

    /// Load bitmap page `page_idx` from raw bytes, ORing into the existing
    /// contents (used when reopening and merging both children's bitmaps).
    pub fn load_page(&mut self, page_idx: u32, bytes: &[u8]) {
        let page_bits = bits_per_page(self.page_size) as usize;
        let start = page_idx as usize * page_bits;
        for (i, byte) in bytes.iter().enumerate() {
            for b in 0..8 {
                if byte & (1 << b) != 0 {
                    self.bits.set(start + i * 8 + b, true);
                }
            }
        }
    }
}

#[cfg(test)]
mod t {
    use super::*;

    const PAGE: u64 = 4096;
    const CHUNK: u64 = 32 * 1024;

    #[test]
    fn dirty_range_within_one_chunk() {
        let mut bm = Bitmap::new(10 * 1024 * 1024, CHUNK, PAGE);
        let (newly, pages) = bm.dirty_range(0, 100);
        assert_eq!(newly, vec![0]);
        assert_eq!(pages, vec![0]);
    }

    #[test]
    fn dirty_range_second_call_reports_nothing_new() {
        let mut bm = Bitmap::new(10 * 1024 * 1024, CHUNK, PAGE);
        bm.dirty_range(0, 100);
        let (newly, _) = bm.dirty_range(0, 100);
        assert!(newly.is_empty());
    }

    #[test]
    fn range_crossing_bitmap_pages_touches_two_pages() {
        // one bitmap page covers PAGE*8 bits * CHUNK bytes each.
        let bits_per_page = PAGE * 8;
        let bytes_per_page = bits_per_page * CHUNK;
        let mut bm = Bitmap::new(bytes_per_page * 4, CHUNK, PAGE);
        let offset = bytes_per_page - CHUNK * 2;
        let len = CHUNK * 4; // spans across the page boundary
        let (newly, pages) = bm.dirty_range(offset, len);
        assert_eq!(pages, vec![0, 1]);
        assert_eq!(newly.len(), 4);
    }

    #[test]
    fn page_bytes_roundtrip_through_load_page() {
        let mut bm = Bitmap::new(10 * 1024 * 1024, CHUNK, PAGE);
        bm.dirty_range(0, 100);
        bm.dirty_range(CHUNK * 3, 10);
        let bytes = bm.page_bytes(0);

        let mut bm2 = Bitmap::new(10 * 1024 * 1024, CHUNK, PAGE);
        bm2.load_page(0, &bytes);
        assert!(bm2.is_set(0));
        assert!(bm2.is_set(3));
        assert!(!bm2.is_set(1));
    }

    #[test]
    fn merge_is_bitwise_or() {
        let mut a = Bitmap::new(10 * 1024 * 1024, CHUNK, PAGE);
        let mut b = Bitmap::new(10 * 1024 * 1024, CHUNK, PAGE);
        a.dirty_range(0, 10);
        b.dirty_range(CHUNK * 2, 10);
        a.merge(&b);
        assert!(a.is_set(0));
        assert!(a.is_set(2));
    }
}

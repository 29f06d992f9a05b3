// vim: tw=80
//! The RAID-0 router: stateless striping across an ordered list of
//! children.
//!
//! Unlike RAID-1, this layer owns no metadata. It never retries and never
//! masks a child failure — the first failing child's error surfaces
//! directly to the caller.

use std::sync::Arc;
use std::time::Instant;

use crate::{
    disk::{AsyncCompletion, Disk, IoData, QueueHandle},
    error::{Error, Result},
    metrics::Metrics,
    subcmd::{self, SubCommand},
    types::{is_power_of_two, SGList, SGListMut},
};

/// One piece of a decomposed request: which child, where in that child's
/// address space, and which byte range of the original request it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub child_idx: u32,
    pub child_offset: u64,
    pub req_offset: u64,
    pub len: u64,
}

/// Split user range `[offset, offset+len)` into per-child contiguous
/// pieces given `stripe_size` and `n` children.
///
/// The union of the returned pieces' `req_offset..req_offset+len` ranges
/// is exactly `[offset, offset+len)`, and the pieces are pairwise disjoint
/// and sorted by `req_offset`.
pub fn decompose(offset: u64, len: u64, stripe_size: u64, n: u32) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut remaining = len;
    let mut cur = offset;
    while remaining > 0 {
        let stripe_idx = cur / stripe_size;
        let child_idx = (stripe_idx % n as u64) as u32;
        let within_stripe = cur % stripe_size;
        let piece_len = (stripe_size - within_stripe).min(remaining);
        let child_offset = (stripe_idx / n as u64) * stripe_size + within_stripe;
        pieces.push(Piece {
            child_idx,
            child_offset,
            req_offset: cur,
            len: piece_len,
        });
        cur += piece_len;
        remaining -= piece_len;
    }
    pieces
}

/// Width, in bits, of the route field needed to address `n` children.
fn route_width(n: u32) -> u32 {
    if n <= 1 {
        1
    } else {
        32 - (n - 1).leading_zeros()
    }
}

pub struct Raid0 {
    children: Vec<Arc<dyn Disk>>,
    stripe_size: u64,
    metrics: Option<Arc<Metrics>>,
}

impl Raid0 {
    pub fn new(children: Vec<Arc<dyn Disk>>, stripe_size: u64, metrics: Option<Arc<Metrics>>) -> Result<Self> {
        if children.is_empty() {
            return Err(Error::InvalidArgument("RAID-0 needs at least one child".into()));
        }
        let lbs = children
            .iter()
            .map(|c| c.geometry().logical_block_size as u64)
            .max()
            .unwrap();
        if !is_power_of_two(stripe_size) || stripe_size < lbs {
            return Err(Error::InvalidArgument(format!(
                "stripe_size {stripe_size} must be a power of two >= logical block size {lbs}"
            )));
        }
        Ok(Self { children, stripe_size, metrics })
    }

    fn record_io(&self, child_idx: u32, op: &str, start: Instant, ok: bool) {
        if let Some(m) = &self.metrics {
            m.observe_io(&child_idx.to_string(), op, start.elapsed().as_secs_f64(), ok);
        }
    }

    pub fn num_children(&self) -> u32 {
        self.children.len() as u32
    }

    pub fn capacity(&self) -> u64 {
        self.children.iter().map(|c| c.geometry().capacity).sum()
    }

    pub fn logical_block_size(&self) -> u32 {
        self.children.iter().map(|c| c.geometry().logical_block_size).max().unwrap()
    }

    pub fn physical_block_size(&self) -> u32 {
        self.children.iter().map(|c| c.geometry().physical_block_size).max().unwrap()
    }

    pub fn can_discard(&self) -> bool {
        self.children.iter().all(|c| c.geometry().can_discard)
    }

    fn width(&self) -> u32 {
        route_width(self.num_children())
    }

    /// Decompose a write and submit one sub-request per (child, contiguous
    /// child-local range) pair. `bufs` must contain exactly one segment;
    /// this router does not yet split a multi-segment SGList across a
    /// stripe boundary.
    pub fn handle_write(
        &self,
        q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        mut bufs: SGList,
        offset: u64,
    ) -> Result<u64> {
        if bufs.len() != 1 {
            return Err(Error::NotSupported(
                "RAID-0 router only supports single-segment requests".into(),
            ));
        }
        let buf = bufs.pop().unwrap();
        let len = buf.len() as u64;
        let pieces = decompose(offset, len, self.stripe_size, self.num_children());
        let width = self.width();
        let mut submitted = 0u64;
        for piece in pieces {
            let child_sc = subcmd::push_route(sub_cmd, piece.child_idx, width)
                .ok_or_else(|| Error::InvalidArgument("route stack exhausted".into()))?;
            let child = &self.children[piece.child_idx as usize];
            let start = (piece.req_offset - offset) as usize;
            let slice = buf.slice_from(start).slice_to(piece.len as usize);
            let t0 = Instant::now();
            let (result, _bufs) = child.async_write(q, io_data, child_sc, vec![slice], piece.child_offset);
            self.record_io(piece.child_idx, "write", t0, result.is_ok());
            submitted += result?;
        }
        Ok(submitted)
    }

    /// Decompose a read and submit one sub-request per (child, contiguous
    /// child-local range) pair, splitting the mutable destination buffer
    /// in place so each child writes into a disjoint region of it.
    pub fn handle_read(
        &self,
        q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        mut bufs: SGListMut,
        offset: u64,
    ) -> Result<u64> {
        if bufs.len() != 1 {
            return Err(Error::NotSupported(
                "RAID-0 router only supports single-segment requests".into(),
            ));
        }
        let mut buf = bufs.pop().unwrap();
        let len = buf.len() as u64;
        let pieces = decompose(offset, len, self.stripe_size, self.num_children());
        let width = self.width();
        let mut submitted = 0u64;
        for piece in pieces {
            let child_sc = subcmd::push_route(sub_cmd, piece.child_idx, width)
                .ok_or_else(|| Error::InvalidArgument("route stack exhausted".into()))?;
            let child = &self.children[piece.child_idx as usize];
            let head = buf.split_to(piece.len as usize);
            let t0 = Instant::now();
            let (result, _bufs) = child.async_read(q, io_data, child_sc, vec![head], piece.child_offset);
            self.record_io(piece.child_idx, "read", t0, result.is_ok());
            submitted += result?;
        }
        Ok(submitted)
    }

    pub fn handle_discard(
        &self,
        q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        len: u32,
        offset: u64,
    ) -> Result<u64> {
        let pieces = decompose(offset, len as u64, self.stripe_size, self.num_children());
        let width = self.width();
        let mut submitted = 0u64;
        for piece in pieces {
            let child_sc = subcmd::push_route(sub_cmd, piece.child_idx, width)
                .ok_or_else(|| Error::InvalidArgument("route stack exhausted".into()))?;
            let child = &self.children[piece.child_idx as usize];
            submitted += child.handle_discard(q, io_data, child_sc, piece.len as u32, piece.child_offset)?;
        }
        Ok(submitted)
    }

    pub fn handle_flush(&self, q: QueueHandle, io_data: IoData, sub_cmd: SubCommand) -> Result<u64> {
        let width = self.width();
        let broadcast = subcmd::broadcast_route(width);
        let mut submitted = 0u64;
        for child in &self.children {
            let child_sc = subcmd::push_route(sub_cmd, broadcast, width)
                .ok_or_else(|| Error::InvalidArgument("route stack exhausted".into()))?;
            submitted += child.handle_flush(q, io_data, child_sc)?;
        }
        Ok(submitted)
    }

    pub fn collect_async(&self, q: QueueHandle, out: &mut Vec<AsyncCompletion>) {
        for child in &self.children {
            child.collect_async(q, out);
        }
    }

    // ---- sync I/O path: block, dispatch each piece, sum byte counts; the
    // first child error aborts the loop and surfaces unretried ------------

    pub fn sync_write(&self, mut bufs: SGList, offset: u64) -> Result<u64> {
        if bufs.len() != 1 {
            return Err(Error::NotSupported(
                "RAID-0 router only supports single-segment requests".into(),
            ));
        }
        let buf = bufs.pop().unwrap();
        let len = buf.len() as u64;
        let pieces = decompose(offset, len, self.stripe_size, self.num_children());
        let mut submitted = 0u64;
        for piece in pieces {
            let child = &self.children[piece.child_idx as usize];
            let start = (piece.req_offset - offset) as usize;
            let slice = buf.slice_from(start).slice_to(piece.len as usize);
            let t0 = Instant::now();
            let (result, _bufs) = child.sync_write(vec![slice], piece.child_offset);
            self.record_io(piece.child_idx, "write", t0, result.is_ok());
            submitted += result?;
        }
        Ok(submitted)
    }

    pub fn sync_read(&self, mut bufs: SGListMut, offset: u64) -> Result<u64> {
        if bufs.len() != 1 {
            return Err(Error::NotSupported(
                "RAID-0 router only supports single-segment requests".into(),
            ));
        }
        let mut buf = bufs.pop().unwrap();
        let len = buf.len() as u64;
        let pieces = decompose(offset, len, self.stripe_size, self.num_children());
        let mut submitted = 0u64;
        for piece in pieces {
            let child = &self.children[piece.child_idx as usize];
            let head = buf.split_to(piece.len as usize);
            let t0 = Instant::now();
            let (result, _bufs) = child.sync_read(vec![head], piece.child_offset);
            self.record_io(piece.child_idx, "read", t0, result.is_ok());
            submitted += result?;
        }
        Ok(submitted)
    }
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn decompose_single_stripe_single_child() {
        let pieces = decompose(0, 100, 4096, 4);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].child_idx, 0);
        assert_eq!(pieces[0].child_offset, 0);
    }

    #[test]
    fn decompose_covers_range_exactly_and_disjointly() {
        let pieces = decompose(1000, 10_000, 4096, 3);
        let mut cursor = 1000u64;
        for p in &pieces {
            assert_eq!(p.req_offset, cursor);
            cursor += p.len;
        }
        assert_eq!(cursor, 11_000);
    }

    #[test]
    fn decompose_round_robins_children() {
        let pieces = decompose(0, 4096 * 6, 4096, 3);
        let idxs: Vec<u32> = pieces.iter().map(|p| p.child_idx).collect();
        assert_eq!(idxs, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn route_width_covers_n() {
        assert_eq!(route_width(1), 1);
        assert_eq!(route_width(2), 1);
        assert_eq!(route_width(3), 2);
        assert_eq!(route_width(4), 2);
        assert_eq!(route_width(5), 3);
    }

    #[test]
    fn decompose_never_leaves_a_gap_or_overlap_across_random_ranges() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let n: u32 = rng.gen_range(1..=8);
            let stripe_size: u64 = 4096;
            let offset: u64 = rng.gen_range(0..1_000_000);
            let len: u64 = rng.gen_range(1..200_000);
            let pieces = decompose(offset, len, stripe_size, n);

            let mut cursor = offset;
            for p in &pieces {
                assert_eq!(p.req_offset, cursor, "gap or overlap at n={n} offset={offset} len={len}");
                assert!(p.len <= stripe_size);
                cursor += p.len;
            }
            assert_eq!(cursor, offset + len);
        }
    }
}

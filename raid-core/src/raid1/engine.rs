// vim: tw=80
//! The RAID-1 mirroring engine.
//!
//! Owns two children, a per-child on-disk `SuperBlock`, the in-memory dirty
//! bitmap, the degraded-mode state machine and the read/write retry
//! protocol. All mutable state lives behind one mutex (`Inner`); the two
//! children themselves are `Arc<dyn Disk>` so they can be shared with other
//! RAID parents per the crate's ownership model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use divbuf::DivBufShared;
use uuid::Uuid;

use crate::{
    disk::{AsyncCompletion, Disk, IoData, QueueHandle},
    error::{Error, Result},
    metrics::Metrics,
    subcmd::{self, SubCommand},
    types::{ChildId, SGList, SGListMut},
};

use super::{
    bitmap::Bitmap,
    state::DegradedState,
    superblock::{self, SuperBlock, PAGE_SIZE, RESERVED_SIZE},
};

/// Width of a RAID-1 route field: one bit, `A` or `B`.
const ROUTE_WIDTH: u32 = 1;

fn route_exhausted() -> Error {
    Error::InvalidArgument("route stack exhausted".into())
}

/// Context retained across an async submission and its eventual
/// `collect_async` completion, keyed by the host's `io_data`.
enum PendingOp {
    /// A nominal or failover read; retained so a failed completion can be
    /// resubmitted to the other child without the host resupplying the
    /// buffer.
    Read { bufs: SGListMut, offset: u64 },
    /// A write or discard replicated to both children (or issued solely to
    /// the survivor while degraded). `remaining` counts child completions
    /// not yet observed; the aggregate completion is delivered to the host
    /// only once it reaches zero.
    Write { offset: u64, len: u64, remaining: u8 },
}

struct Inner {
    bitmap_uuid: Uuid,
    bitmap: Bitmap,
    degraded: DegradedState,
    generation: u64,
    route_to_b: bool,
    pending: HashMap<IoData, PendingOp>,
}

pub struct Raid1 {
    a: Arc<dyn Disk>,
    b: Arc<dyn Disk>,
    array_uuid: Uuid,
    reserved_size: u64,
    metrics: Option<Arc<Metrics>>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Raid1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raid1")
            .field("a", &self.a.id())
            .field("b", &self.b.id())
            .field("array_uuid", &self.array_uuid)
            .field("reserved_size", &self.reserved_size)
            .finish()
    }
}

fn write_superblock(disk: &Arc<dyn Disk>, sb: &SuperBlock) -> Result<()> {
    let dbs = DivBufShared::from(sb.encode());
    let buf = dbs.try_const().unwrap();
    let (result, _bufs) = disk.sync_write(vec![buf], 0);
    result.map(|_| ())
}

fn read_superblock(disk: &Arc<dyn Disk>) -> Result<SuperBlock> {
    let dbs = DivBufShared::from(vec![0u8; PAGE_SIZE as usize]);
    let buf = dbs.try_mut().unwrap();
    let (result, bufs) = disk.sync_read(vec![buf], 0);
    result?;
    SuperBlock::decode(&bufs[0])
}

fn write_bitmap_page(disk: &Arc<dyn Disk>, bitmap: &Bitmap, page_idx: u32) -> Result<()> {
    let offset = PAGE_SIZE + page_idx as u64 * PAGE_SIZE;
    let dbs = DivBufShared::from(bitmap.page_bytes(page_idx));
    let buf = dbs.try_const().unwrap();
    let (result, _bufs) = disk.sync_write(vec![buf], offset);
    result.map(|_| ())
}

fn persist_bitmap_pages(disk: &Arc<dyn Disk>, bitmap: &Bitmap, pages: &[u32]) -> Result<()> {
    for &p in pages {
        write_bitmap_page(disk, bitmap, p)?;
    }
    Ok(())
}

fn read_bitmap_page(disk: &Arc<dyn Disk>, page_idx: u32) -> Result<Vec<u8>> {
    let offset = PAGE_SIZE + page_idx as u64 * PAGE_SIZE;
    let dbs = DivBufShared::from(vec![0u8; PAGE_SIZE as usize]);
    let buf = dbs.try_mut().unwrap();
    let (result, bufs) = disk.sync_read(vec![buf], offset);
    result?;
    Ok(bufs[0].to_vec())
}

fn validate_capacity(a: &Arc<dyn Disk>, b: &Arc<dyn Disk>, reserved_size: u64, chunk_size: u64) -> Result<u64> {
    let cap_a = a.geometry().capacity;
    let cap_b = b.geometry().capacity;
    if cap_a < reserved_size || cap_b < reserved_size {
        return Err(Error::InvalidArgument(format!(
            "child capacity below reserved_size {reserved_size}"
        )));
    }
    let raw = cap_a.min(cap_b) - reserved_size;
    let max_pages = superblock::max_bitmap_pages(reserved_size, PAGE_SIZE);
    let max_cap = superblock::max_capacity(max_pages, chunk_size, PAGE_SIZE);
    if raw > max_cap {
        return Err(Error::CapacityExceeded { requested: raw, max: max_cap });
    }
    Ok(raw)
}

impl Raid1 {
    /// Unconditionally initialize a fresh array on two blank (or
    /// about-to-be-overwritten) children, at the default reserved-region
    /// size and chunk size. Corresponds to spec lifecycle case (i).
    pub fn create(a: Arc<dyn Disk>, b: Arc<dyn Disk>, metrics: Option<Arc<Metrics>>) -> Result<Self> {
        Self::create_with_geometry(a, b, metrics, RESERVED_SIZE, superblock::CHUNK_SIZE)
    }

    /// As `create`, but with an operator-chosen `reserved_size`/`chunk_size`
    /// instead of the defaults. `open_with_geometry` must be given the same
    /// `reserved_size` on every subsequent open: unlike `chunk_size`, it is
    /// not recorded in the superblock, since it governs where the reserved
    /// region ends and user data begins rather than anything the bitmap
    /// codec itself needs to know.
    pub fn create_with_geometry(
        a: Arc<dyn Disk>,
        b: Arc<dyn Disk>,
        metrics: Option<Arc<Metrics>>,
        reserved_size: u64,
        chunk_size: u64,
    ) -> Result<Self> {
        let user_capacity = validate_capacity(&a, &b, reserved_size, chunk_size)?;
        let bitmap = Bitmap::new(user_capacity, chunk_size, PAGE_SIZE);
        let array_uuid = Uuid::new_v4();
        let bitmap_uuid = Uuid::new_v4();
        let sb = SuperBlock::fresh(array_uuid, bitmap_uuid, bitmap.page_count(), chunk_size as u32);

        write_superblock(&a, &sb)?;
        write_superblock(&b, &sb)?;
        for p in 0..bitmap.page_count() {
            write_bitmap_page(&a, &bitmap, p)?;
            write_bitmap_page(&b, &bitmap, p)?;
        }

        Ok(Self {
            a,
            b,
            array_uuid,
            reserved_size,
            metrics,
            inner: Mutex::new(Inner {
                bitmap_uuid,
                bitmap,
                degraded: DegradedState::Healthy,
                generation: 0,
                route_to_b: false,
                pending: HashMap::new(),
            }),
        })
    }

    /// Open two children at the default reserved-region size, choosing
    /// fresh-construction or reopen per spec lifecycle: matching, decodable
    /// superblocks reopen; two children that both lack one are treated as
    /// blank and get a fresh array; anything else (disagreement, or only
    /// one side readable) fails construction.
    pub fn open(a: Arc<dyn Disk>, b: Arc<dyn Disk>, metrics: Option<Arc<Metrics>>) -> Result<Self> {
        Self::open_with_geometry(a, b, metrics, RESERVED_SIZE, superblock::CHUNK_SIZE)
    }

    /// As `open`, but against an operator-chosen `reserved_size`. Must match
    /// the `reserved_size` the array was created with; `reserved_size` has
    /// no on-disk record to recover it from, unlike `chunk_size`. `chunk_size`
    /// only matters if `a`/`b` turn out blank, in which case this behaves
    /// like `create_with_geometry`; an already-initialized array's chunk
    /// size always comes from its own superblock.
    pub fn open_with_geometry(
        a: Arc<dyn Disk>,
        b: Arc<dyn Disk>,
        metrics: Option<Arc<Metrics>>,
        reserved_size: u64,
        chunk_size: u64,
    ) -> Result<Self> {
        match (read_superblock(&a), read_superblock(&b)) {
            (Err(_), Err(_)) => Self::create_with_geometry(a, b, metrics, reserved_size, chunk_size),
            (Ok(sa), Ok(sb)) => {
                sa.agrees_with(&sb)?;
                let user_capacity = validate_capacity(&a, &b, reserved_size, sa.chunk_size as u64)?;
                let mut bitmap = Bitmap::new(user_capacity, sa.chunk_size as u64, PAGE_SIZE);
                let unmount_clean = sa.unmount_clean && sb.unmount_clean;
                if unmount_clean {
                    for p in 0..sa.bitmap_page_count {
                        bitmap.load_page(p, &read_bitmap_page(&a, p)?);
                    }
                    for p in 0..sb.bitmap_page_count {
                        bitmap.load_page(p, &read_bitmap_page(&b, p)?);
                    }
                } else {
                    tracing::warn!("reopening array that was not unmounted cleanly; bitmap assumed fully dirty");
                    for bit in 0..bitmap.bits_for_range(0, user_capacity).end {
                        bitmap.set(bit);
                    }
                }
                let degraded = match (sa.degraded_child, sb.degraded_child) {
                    (Some(c), _) | (_, Some(c)) => DegradedState::Degraded(c),
                    (None, None) => DegradedState::Healthy,
                };
                let generation = sa.generation.max(sb.generation) + 1;
                let sb_new = SuperBlock {
                    array_uuid: sa.array_uuid,
                    bitmap_uuid: sa.bitmap_uuid,
                    bitmap_page_count: bitmap.page_count(),
                    chunk_size: sa.chunk_size,
                    unmount_clean: false,
                    generation,
                    degraded_child: degraded.degraded_child(),
                };
                match degraded.degraded_child() {
                    Some(bad) => {
                        let survivor = bad.other();
                        write_superblock(if survivor == ChildId::A { &a } else { &b }, &sb_new)?;
                    }
                    None => {
                        write_superblock(&a, &sb_new)?;
                        write_superblock(&b, &sb_new)?;
                    }
                }
                Ok(Self {
                    a,
                    b,
                    array_uuid: sa.array_uuid,
                    reserved_size,
                    metrics,
                    inner: Mutex::new(Inner {
                        bitmap_uuid: sa.bitmap_uuid,
                        bitmap,
                        degraded,
                        generation,
                        route_to_b: false,
                        pending: HashMap::new(),
                    }),
                })
            }
            _ => Err(Error::Mismatch(
                "one child has a valid superblock while the other does not".into(),
            )),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.a.geometry().capacity.min(self.b.geometry().capacity) - self.reserved_size
    }

    pub fn logical_block_size(&self) -> u32 {
        self.a.geometry().logical_block_size.max(self.b.geometry().logical_block_size)
    }

    pub fn physical_block_size(&self) -> u32 {
        self.a.geometry().physical_block_size.max(self.b.geometry().physical_block_size)
    }

    pub fn can_discard(&self) -> bool {
        self.a.geometry().can_discard && self.b.geometry().can_discard
    }

    pub fn degraded_state(&self) -> DegradedState {
        self.inner.lock().unwrap().degraded
    }

    pub fn dirty_page_count(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        let n = inner.bitmap.dirty_page_count();
        if let Some(m) = &self.metrics {
            m.set_dirty_pages(n);
        }
        n
    }

    fn child(&self, id: ChildId) -> &Arc<dyn Disk> {
        match id {
            ChildId::A => &self.a,
            ChildId::B => &self.b,
            ChildId::Index(_) => unreachable!("RAID-1 only has A/B children"),
        }
    }

    fn record_io(&self, child: ChildId, op: &str, start: Instant, ok: bool) {
        if let Some(m) = &self.metrics {
            let label = match child {
                ChildId::A => "A",
                ChildId::B => "B",
                ChildId::Index(_) => "?",
            };
            m.observe_io(label, op, start.elapsed().as_secs_f64(), ok);
        }
    }

    /// Transition the degraded-mode state machine on a confirmed failure of
    /// `bad`, persisting the surviving child's superblock first. On a
    /// persist failure `inner` is left untouched, matching the sync-write
    /// contract ("array state is unchanged") — the caller retries in full.
    fn persist_degraded(&self, inner: &mut Inner, bad: ChildId) -> Result<()> {
        let new_state = inner.degraded.on_failure(bad);
        let new_generation = inner.generation + 1;
        if let Some(survivor) = new_state.survivor(ChildId::A, ChildId::B) {
            let sb = SuperBlock {
                array_uuid: self.array_uuid,
                bitmap_uuid: inner.bitmap_uuid,
                bitmap_page_count: inner.bitmap.page_count(),
                chunk_size: inner.bitmap.chunk_size() as u32,
                unmount_clean: false,
                generation: new_generation,
                degraded_child: new_state.degraded_child(),
            };
            write_superblock(self.child(survivor), &sb)?;
        }
        inner.degraded = new_state;
        inner.generation = new_generation;
        if let Some(m) = &self.metrics {
            m.record_degraded();
        }
        tracing::warn!(?bad, state = ?inner.degraded, "child marked degraded");
        Ok(())
    }

    fn record_child_write_failure(&self, inner: &mut Inner, failing: ChildId, offset: u64, len: u64) -> Result<()> {
        if inner.degraded.is_healthy() {
            let (newly_dirty, pages) = inner.bitmap.dirty_range(offset, len);
            if !newly_dirty.is_empty() {
                let survivor = failing.other();
                persist_bitmap_pages(self.child(survivor), &inner.bitmap, &pages)?;
            }
        }
        if inner.degraded.degraded_child() != Some(failing) {
            self.persist_degraded(inner, failing)?;
        }
        Ok(())
    }

    // ---- read path (spec 4.4.2) ----------------------------------------

    fn submit_read(
        &self,
        q: QueueHandle,
        io_data: IoData,
        parent_sub_cmd: SubCommand,
        bufs: SGListMut,
        offset: u64,
        target: ChildId,
        retried: bool,
    ) -> (Result<u64>, SGListMut) {
        let child_sc = match subcmd::push_route(parent_sub_cmd, target.route(), ROUTE_WIDTH) {
            Some(sc) => sc,
            None => return (Err(route_exhausted()), bufs),
        };
        let child_sc = if retried { subcmd::set_flags(child_sc, subcmd::RETRIED) } else { child_sc };
        let t0 = Instant::now();
        let (result, bufs) = self.child(target).async_read(q, io_data, child_sc, bufs, offset + self.reserved_size);
        self.record_io(target, "read", t0, result.is_ok());
        (result, bufs)
    }

    pub fn handle_read(
        &self,
        q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        bufs: SGListMut,
        offset: u64,
    ) -> Result<u64> {
        if bufs.len() != 1 {
            return Err(Error::NotSupported("RAID-1 engine only supports single-segment requests".into()));
        }

        if subcmd::is_retry(sub_cmd) {
            let (route, parent) = subcmd::pop_route(sub_cmd, ROUTE_WIDTH);
            let target = ChildId::from_route(route);
            let (result, _bufs) = self.submit_read(q, io_data, parent, bufs, offset, target, true);
            return result;
        }

        let (target, healthy) = {
            let inner = self.inner.lock().unwrap();
            if inner.degraded.is_broken() {
                return Err(Error::Broken);
            }
            match inner.degraded.degraded_child() {
                Some(bad) => (bad.other(), false),
                None => (if inner.route_to_b { ChildId::B } else { ChildId::A }, true),
            }
        };

        let (result, bufs_back) = self.submit_read(q, io_data, sub_cmd, bufs, offset, target, false);
        match result {
            Ok(n) => {
                let mut inner = self.inner.lock().unwrap();
                if healthy {
                    inner.route_to_b = !inner.route_to_b;
                }
                inner.pending.insert(io_data, PendingOp::Read { bufs: bufs_back, offset });
                Ok(n)
            }
            Err(e) if healthy => {
                let other = target.other();
                let (result2, _bufs2) = self.submit_read(q, io_data, sub_cmd, bufs_back, offset, other, true);
                match result2 {
                    Ok(n) => Ok(n),
                    Err(_) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    // ---- write path (spec 4.4.3) ----------------------------------------

    fn handle_write_retry(&self, sub_cmd: SubCommand, offset: u64, len: u64) -> Result<u64> {
        let (route, _parent) = subcmd::pop_route(sub_cmd, ROUTE_WIDTH);
        let failing = ChildId::from_route(route);
        let mut inner = self.inner.lock().unwrap();
        if inner.degraded.is_broken() {
            return Err(Error::Broken);
        }
        self.record_child_write_failure(&mut inner, failing, offset, len)?;
        if inner.degraded.is_broken() {
            return Err(Error::Broken);
        }
        Ok(0)
    }

    pub fn handle_write(
        &self,
        q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        bufs: SGList,
        offset: u64,
    ) -> Result<u64> {
        if bufs.len() != 1 {
            return Err(Error::NotSupported("RAID-1 engine only supports single-segment requests".into()));
        }
        let len = bufs[0].len() as u64;

        if subcmd::is_retry(sub_cmd) {
            return self.handle_write_retry(sub_cmd, offset, len);
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.degraded.is_broken() {
            return Err(Error::Broken);
        }

        if let Some(bad) = inner.degraded.degraded_child() {
            let survivor = bad.other();
            let child_sc = subcmd::push_route(sub_cmd, survivor.route(), ROUTE_WIDTH).ok_or_else(route_exhausted)?;
            inner.pending.insert(io_data, PendingOp::Write { offset, len, remaining: 1 });
            drop(inner);
            let t0 = Instant::now();
            let (result, _bufs) = self.child(survivor).async_write(q, io_data, child_sc, bufs, offset + self.reserved_size);
            self.record_io(survivor, "write", t0, result.is_ok());
            return result;
        }

        let (newly_dirty, pages) = inner.bitmap.dirty_range(offset, len);
        if !newly_dirty.is_empty() {
            if let Err(e) = persist_bitmap_pages(&self.a, &inner.bitmap, &pages) {
                tracing::warn!(child = "A", error = %e, "bitmap page writeback failed");
                self.persist_degraded(&mut inner, ChildId::A)?;
            } else if let Err(e) = persist_bitmap_pages(&self.b, &inner.bitmap, &pages) {
                tracing::warn!(child = "B", error = %e, "bitmap page writeback failed");
                self.persist_degraded(&mut inner, ChildId::B)?;
            }
        }

        if let Some(bad) = inner.degraded.degraded_child() {
            let survivor = bad.other();
            let child_sc = subcmd::push_route(sub_cmd, survivor.route(), ROUTE_WIDTH).ok_or_else(route_exhausted)?;
            inner.pending.insert(io_data, PendingOp::Write { offset, len, remaining: 1 });
            drop(inner);
            let t0 = Instant::now();
            let (result, _bufs) = self.child(survivor).async_write(q, io_data, child_sc, bufs, offset + self.reserved_size);
            self.record_io(survivor, "write", t0, result.is_ok());
            return result;
        }

        let sc_a = subcmd::push_route(sub_cmd, ChildId::A.route(), ROUTE_WIDTH).ok_or_else(route_exhausted)?;
        let sc_b_route = subcmd::push_route(sub_cmd, ChildId::B.route(), ROUTE_WIDTH).ok_or_else(route_exhausted)?;
        let sc_b = subcmd::set_flags(sc_b_route, subcmd::REPLICATE);

        inner.pending.insert(io_data, PendingOp::Write { offset, len, remaining: 2 });
        drop(inner);

        let bufs_b = bufs.clone();
        let mut submitted = 0u64;
        let t0 = Instant::now();
        let (result_a, _bufs_a) = self.a.async_write(q, io_data, sc_a, bufs, offset + self.reserved_size);
        self.record_io(ChildId::A, "write", t0, result_a.is_ok());
        match result_a {
            Ok(n) => submitted += n,
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                self.persist_degraded(&mut inner, ChildId::A)?;
            }
        }
        let t0 = Instant::now();
        let (result_b, _bufs_b) = self.b.async_write(q, io_data, sc_b, bufs_b, offset + self.reserved_size);
        self.record_io(ChildId::B, "write", t0, result_b.is_ok());
        match result_b {
            Ok(n) => submitted += n,
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                self.persist_degraded(&mut inner, ChildId::B)?;
            }
        }

        if self.inner.lock().unwrap().degraded.is_broken() {
            return Err(Error::Broken);
        }
        Ok(submitted)
    }

    // ---- discard path (spec 4.4.4), structurally identical to write -----

    pub fn handle_discard(&self, q: QueueHandle, io_data: IoData, sub_cmd: SubCommand, len: u32, offset: u64) -> Result<u64> {
        if subcmd::is_retry(sub_cmd) {
            return self.handle_write_retry(sub_cmd, offset, len as u64);
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.degraded.is_broken() {
            return Err(Error::Broken);
        }

        if let Some(bad) = inner.degraded.degraded_child() {
            let survivor = bad.other();
            let child_sc = subcmd::push_route(sub_cmd, survivor.route(), ROUTE_WIDTH).ok_or_else(route_exhausted)?;
            drop(inner);
            return self.child(survivor).handle_discard(q, io_data, child_sc, len, offset + self.reserved_size);
        }

        let (newly_dirty, pages) = inner.bitmap.dirty_range(offset, len as u64);
        if !newly_dirty.is_empty() {
            if let Err(e) = persist_bitmap_pages(&self.a, &inner.bitmap, &pages) {
                tracing::warn!(child = "A", error = %e, "bitmap page writeback failed");
                self.persist_degraded(&mut inner, ChildId::A)?;
            } else if let Err(e) = persist_bitmap_pages(&self.b, &inner.bitmap, &pages) {
                tracing::warn!(child = "B", error = %e, "bitmap page writeback failed");
                self.persist_degraded(&mut inner, ChildId::B)?;
            }
        }

        if let Some(bad) = inner.degraded.degraded_child() {
            let survivor = bad.other();
            let child_sc = subcmd::push_route(sub_cmd, survivor.route(), ROUTE_WIDTH).ok_or_else(route_exhausted)?;
            drop(inner);
            return self.child(survivor).handle_discard(q, io_data, child_sc, len, offset + self.reserved_size);
        }

        let sc_a = subcmd::push_route(sub_cmd, ChildId::A.route(), ROUTE_WIDTH).ok_or_else(route_exhausted)?;
        let sc_b = subcmd::set_flags(
            subcmd::push_route(sub_cmd, ChildId::B.route(), ROUTE_WIDTH).ok_or_else(route_exhausted)?,
            subcmd::REPLICATE,
        );
        drop(inner);

        let mut submitted = 0u64;
        match self.a.handle_discard(q, io_data, sc_a, len, offset + self.reserved_size) {
            Ok(n) => submitted += n,
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                self.persist_degraded(&mut inner, ChildId::A)?;
            }
        }
        match self.b.handle_discard(q, io_data, sc_b, len, offset + self.reserved_size) {
            Ok(n) => submitted += n,
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                self.persist_degraded(&mut inner, ChildId::B)?;
            }
        }
        if self.inner.lock().unwrap().degraded.is_broken() {
            return Err(Error::Broken);
        }
        Ok(submitted)
    }

    // ---- flush (spec 4.4.5): contractually a no-op ----------------------

    pub fn handle_flush(&self, _q: QueueHandle, _io_data: IoData, sub_cmd: SubCommand) -> Result<u64> {
        if subcmd::is_retry(sub_cmd) {
            return Ok(0);
        }
        if self.inner.lock().unwrap().degraded.is_broken() {
            return Err(Error::Broken);
        }
        Ok(0)
    }

    // ---- sync I/O path (spec 4.4.6) --------------------------------------

    pub fn sync_read(&self, bufs: SGListMut, offset: u64) -> Result<u64> {
        if bufs.len() != 1 {
            return Err(Error::NotSupported("RAID-1 engine only supports single-segment requests".into()));
        }
        let (primary, healthy) = {
            let inner = self.inner.lock().unwrap();
            if inner.degraded.is_broken() {
                return Err(Error::Broken);
            }
            match inner.degraded.degraded_child() {
                Some(bad) => (bad.other(), false),
                None => (ChildId::A, true),
            }
        };
        let t0 = Instant::now();
        let (result, bufs_back) = self.child(primary).sync_read(bufs, offset + self.reserved_size);
        self.record_io(primary, "read", t0, result.is_ok());
        if result.is_ok() || !healthy {
            return result;
        }
        let t0 = Instant::now();
        let (result2, _) = self.b.sync_read(bufs_back, offset + self.reserved_size);
        self.record_io(ChildId::B, "read", t0, result2.is_ok());
        result2
    }

    pub fn sync_write(&self, bufs: SGList, offset: u64) -> Result<u64> {
        if bufs.len() != 1 {
            return Err(Error::NotSupported("RAID-1 engine only supports single-segment requests".into()));
        }
        let len = bufs[0].len() as u64;

        let mut inner = self.inner.lock().unwrap();
        if inner.degraded.is_broken() {
            return Err(Error::Broken);
        }

        if let Some(bad) = inner.degraded.degraded_child() {
            let survivor = bad.other();
            drop(inner);
            let t0 = Instant::now();
            let (result, _) = self.child(survivor).sync_write(bufs, offset + self.reserved_size);
            self.record_io(survivor, "write", t0, result.is_ok());
            return result;
        }

        let (newly_dirty, pages) = inner.bitmap.dirty_range(offset, len);
        if !newly_dirty.is_empty() {
            if let Err(e) = persist_bitmap_pages(&self.a, &inner.bitmap, &pages) {
                tracing::warn!(child = "A", error = %e, "bitmap page writeback failed");
                self.persist_degraded(&mut inner, ChildId::A)?;
            } else if let Err(e) = persist_bitmap_pages(&self.b, &inner.bitmap, &pages) {
                tracing::warn!(child = "B", error = %e, "bitmap page writeback failed");
                self.persist_degraded(&mut inner, ChildId::B)?;
            }
        }

        if let Some(bad) = inner.degraded.degraded_child() {
            let survivor = bad.other();
            drop(inner);
            let t0 = Instant::now();
            let (result, _) = self.child(survivor).sync_write(bufs, offset + self.reserved_size);
            self.record_io(survivor, "write", t0, result.is_ok());
            return result;
        }
        drop(inner);

        let bufs_b = bufs.clone();
        let t0 = Instant::now();
        let (result_a, _) = self.a.sync_write(bufs, offset + self.reserved_size);
        self.record_io(ChildId::A, "write", t0, result_a.is_ok());
        match result_a {
            Ok(n) => {
                let t0 = Instant::now();
                let (result_b, _) = self.b.sync_write(bufs_b, offset + self.reserved_size);
                self.record_io(ChildId::B, "write", t0, result_b.is_ok());
                match result_b {
                    Ok(_) => Ok(n),
                    Err(_) => {
                        let mut inner = self.inner.lock().unwrap();
                        self.persist_degraded(&mut inner, ChildId::B)?;
                        Ok(n)
                    }
                }
            }
            Err(_) => {
                let mut inner = self.inner.lock().unwrap();
                self.persist_degraded(&mut inner, ChildId::A)?;
                drop(inner);
                let t0 = Instant::now();
                let (result_b, _) = self.b.sync_write(bufs_b, offset + self.reserved_size);
                self.record_io(ChildId::B, "write", t0, result_b.is_ok());
                result_b
            }
        }
    }

    // ---- completion harvest ----------------------------------------------

    pub fn collect_async(&self, q: QueueHandle, out: &mut Vec<AsyncCompletion>) {
        let mut raw = Vec::new();
        self.a.collect_async(q, &mut raw);
        self.b.collect_async(q, &mut raw);
        for comp in raw {
            self.handle_completion(q, comp, out);
        }
    }

    fn handle_completion(&self, q: QueueHandle, comp: AsyncCompletion, out: &mut Vec<AsyncCompletion>) {
        let AsyncCompletion { io_data, sub_cmd, result } = comp;

        if subcmd::is_retry(sub_cmd) {
            let (_route, parent) = subcmd::pop_route(sub_cmd, ROUTE_WIDTH);
            out.push(AsyncCompletion { io_data, sub_cmd: parent, result });
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        match inner.pending.remove(&io_data) {
            Some(PendingOp::Read { bufs, offset }) => {
                drop(inner);
                match result {
                    Ok(n) => {
                        let (_route, parent) = subcmd::pop_route(sub_cmd, ROUTE_WIDTH);
                        {
                            let mut inner = self.inner.lock().unwrap();
                            if inner.degraded.is_healthy() {
                                inner.route_to_b = !inner.route_to_b;
                            }
                        }
                        out.push(AsyncCompletion { io_data, sub_cmd: parent, result: Ok(n) });
                    }
                    Err(_) => {
                        let (route, parent) = subcmd::pop_route(sub_cmd, ROUTE_WIDTH);
                        let failing = ChildId::from_route(route);
                        let other = failing.other();
                        let (result2, _bufs2) = self.submit_read(q, io_data, parent, bufs, offset, other, true);
                        if let Err(e2) = result2 {
                            out.push(AsyncCompletion { io_data, sub_cmd: parent, result: Err(to_async_error(&e2)) });
                        }
                    }
                }
            }
            Some(PendingOp::Write { offset, len, remaining }) => {
                if result.is_err() {
                    let (route, _parent) = subcmd::pop_route(sub_cmd, ROUTE_WIDTH);
                    let failing = ChildId::from_route(route);
                    if let Err(e) = self.record_child_write_failure(&mut inner, failing, offset, len) {
                        tracing::error!(error = %e, "failed to persist degraded-mode transition");
                    }
                }
                let remaining_after = remaining.saturating_sub(1);
                if remaining_after > 0 {
                    inner.pending.insert(io_data, PendingOp::Write { offset, len, remaining: remaining_after });
                } else {
                    let broken = inner.degraded.is_broken();
                    drop(inner);
                    let (_route, parent) = subcmd::pop_route(sub_cmd, ROUTE_WIDTH);
                    let final_result = if broken { Err(to_async_error(&Error::Broken)) } else { Ok(len) };
                    out.push(AsyncCompletion { io_data, sub_cmd: parent, result: final_result });
                }
            }
            None => {
                drop(inner);
                let (_route, parent) = subcmd::pop_route(sub_cmd, ROUTE_WIDTH);
                out.push(AsyncCompletion { io_data, sub_cmd: parent, result });
            }
        }
    }

    /// Close the array in an orderly fashion: for every still-healthy
    /// child, persist all dirty bitmap pages and a superblock marked
    /// `unmount_clean=1`.
    pub fn close(self) -> Result<()> {
        let Raid1 { a, b, array_uuid, inner, .. } = self;
        let inner = inner.into_inner().unwrap();
        let targets: Vec<(ChildId, &Arc<dyn Disk>)> = match inner.degraded.degraded_child() {
            Some(bad) => {
                let survivor = bad.other();
                vec![(survivor, if survivor == ChildId::A { &a } else { &b })]
            }
            None => vec![(ChildId::A, &a), (ChildId::B, &b)],
        };
        let generation = inner.generation + 1;
        let sb = SuperBlock {
            array_uuid,
            bitmap_uuid: inner.bitmap_uuid,
            bitmap_page_count: inner.bitmap.page_count(),
            chunk_size: inner.bitmap.chunk_size() as u32,
            unmount_clean: true,
            generation,
            degraded_child: inner.degraded.degraded_child(),
        };
        let all_pages: Vec<u32> = (0..inner.bitmap.page_count()).collect();
        for (target, disk) in targets {
            if let Err(e) = persist_bitmap_pages(disk, &inner.bitmap, &all_pages) {
                tracing::error!(?target, error = %e, "bitmap persist failed during close");
                continue;
            }
            if let Err(e) = write_superblock(disk, &sb) {
                tracing::error!(?target, error = %e, "superblock persist failed during close");
            }
        }
        Ok(())
    }
}

fn to_async_error(e: &Error) -> crate::disk::AsyncError {
    match e {
        Error::Io(io_err) => crate::disk::AsyncError::new(io_err.raw_os_error()),
        _ => crate::disk::AsyncError::new(None),
    }
}

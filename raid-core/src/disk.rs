// vim: tw=80
//! The `Disk` capability.
//!
//! Every RAID personality sees its children only through this trait. It
//! deliberately does not require `async`/`.await`: `async_iov` submits
//! immediately and returns a token or error, completion is harvested later
//! by polling `collect_async`, matching the submit/poll contract the host
//! runtime expects of a ublk-style block driver.

use crate::{
    error::Result,
    subcmd::SubCommand,
    types::{SGList, SGListMut},
};

/// A block I/O opcode, as carried by `sync_iov`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

/// An opaque handle to the I/O queue issuing a request. A single queue is
/// only ever driven by one thread at a time (see the crate's concurrency
/// notes); the RAID layer never interprets its value, only threads it
/// through to children.
pub type QueueHandle = u64;

/// An opaque per-request descriptor supplied by the host, threaded through
/// unmodified so completions can be matched back to their originating
/// request.
pub type IoData = u64;

/// One completed child operation, as harvested by `collect_async`.
#[derive(Debug, Clone, Copy)]
pub struct AsyncCompletion {
    pub io_data: IoData,
    pub sub_cmd: SubCommand,
    pub result: std::result::Result<u64, AsyncError>,
}

/// The error half of an `AsyncCompletion`. Kept narrow (as opposed to the
/// full `Error` enum) since only I/O failure is representable on a
/// completion; everything else is a programming error caught earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncError {
    pub raw_os_error: Option<i32>,
}

impl AsyncError {
    pub fn new(raw_os_error: Option<i32>) -> Self {
        Self { raw_os_error }
    }
}

/// Static geometry of a backend, probed once at construction.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub capacity: u64,
    pub logical_block_size: u32,
    pub physical_block_size: u32,
    pub can_discard: bool,
}

/// A byte-addressable block backend.
///
/// All offsets passed to a `Disk` are byte offsets in *that backend's own*
/// address space; any bias (e.g. a RAID-1 reserved region) is applied by
/// the caller before the call is made.
#[cfg_attr(test, mockall::automock)]
pub trait Disk: Send + Sync {
    /// An opaque identifier for logging and metrics labeling.
    fn id(&self) -> &str;

    /// Static geometry, probed once at construction.
    fn geometry(&self) -> Geometry;

    /// Blocking scatter/gather read. Used for superblock/bitmap access and
    /// on the synchronous recovery path.
    fn sync_read(&self, bufs: SGListMut, offset: u64) -> (Result<u64>, SGListMut);

    /// Blocking scatter/gather write.
    fn sync_write(&self, bufs: SGList, offset: u64) -> (Result<u64>, SGList);

    /// Submit an asynchronous scatter/gather write. Returns `Ok(1)` on
    /// successful submission (one outstanding op to be harvested later via
    /// `collect_async`), `Ok(0)` if the backend queued it without yet
    /// submitting, or `Err` on immediate failure.
    ///
    /// `bufs` is always handed back alongside the result, following the
    /// owned-buffer convention of io_uring-style submission APIs: since a
    /// submission can fail before the backend ever reads from it, the
    /// caller must get it back regardless of outcome to retry elsewhere.
    fn async_write(
        &self,
        q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        bufs: SGList,
        offset: u64,
    ) -> (Result<u64>, SGList);

    /// Submit an asynchronous scatter/gather read. See `async_write` for
    /// why the buffer is always returned alongside the result.
    fn async_read(
        &self,
        q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        bufs: SGListMut,
        offset: u64,
    ) -> (Result<u64>, SGListMut);

    /// Submit a flush. Returns the count of child flushes submitted; `0`
    /// is valid for a backend that does not need flushing.
    fn handle_flush(&self, q: QueueHandle, io_data: IoData, sub_cmd: SubCommand) -> Result<u64>;

    /// Submit a discard over `[offset, offset+len)`.
    fn handle_discard(
        &self,
        q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        len: u32,
        offset: u64,
    ) -> Result<u64>;

    /// Non-blocking harvest of completed asynchronous operations.
    fn collect_async(&self, q: QueueHandle, out: &mut Vec<AsyncCompletion>);

    /// Advertise the backend's pollable file descriptors for registration
    /// with the kernel device's poll ring.
    fn open_for_uring(&self, dev_fd: i32) -> Vec<i32>;
}

// vim: tw=80
//! `MemDisk`: an in-memory `Disk` used by this crate's own tests and by
//! `raid-ctl`'s `check` subcommand.
//!
//! The original test harness this is grounded on logs every call and always
//! "succeeds" with zero bytes transferred, which is useless for
//! read-after-write assertions; this version actually backs reads and
//! writes with a byte buffer and adds one-shot fault injection so failover
//! and degraded-mode paths can be exercised deterministically.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

use crate::{
    disk::{AsyncCompletion, AsyncError, Disk, Geometry, IoData, QueueHandle},
    error::{Error, Result},
    types::{SGList, SGListMut},
};

/// A single injectable failure point. Each call to `fail_next` queues one
/// occurrence; the matching op consumes it and behaves normally afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    SyncRead,
    SyncWrite,
    /// Fails at submission time, mirroring `Disk::async_iov`'s synchronous
    /// error return.
    AsyncSubmitRead,
    AsyncSubmitWrite,
    /// Submits cleanly but the harvested `collect_async` completion reports
    /// failure.
    AsyncCompleteRead,
    AsyncCompleteWrite,
    Discard,
    Flush,
}

fn injected(fault: Fault) -> Error {
    Error::Io(io::Error::other(format!("injected {fault:?} fault")))
}

pub struct MemDisk {
    id: String,
    data: Mutex<Vec<u8>>,
    logical_block_size: u32,
    physical_block_size: u32,
    can_discard: bool,
    completions: Mutex<VecDeque<AsyncCompletion>>,
    faults: Mutex<VecDeque<Fault>>,
}

fn copy_into_bufs(data: &[u8], offset: u64, bufs: &mut SGListMut) -> Result<u64> {
    let mut pos = offset as usize;
    let mut total = 0u64;
    for buf in bufs.iter_mut() {
        let len = buf.len();
        let end = pos.checked_add(len).ok_or_else(|| Error::InvalidArgument("read past end of device".into()))?;
        if end > data.len() {
            return Err(Error::InvalidArgument("read past end of device".into()));
        }
        buf[..].copy_from_slice(&data[pos..end]);
        pos = end;
        total += len as u64;
    }
    Ok(total)
}

fn copy_from_bufs(data: &mut [u8], offset: u64, bufs: &SGList) -> Result<u64> {
    let mut pos = offset as usize;
    let mut total = 0u64;
    for buf in bufs.iter() {
        let len = buf.len();
        let end = pos.checked_add(len).ok_or_else(|| Error::InvalidArgument("write past end of device".into()))?;
        if end > data.len() {
            return Err(Error::InvalidArgument("write past end of device".into()));
        }
        data[pos..end].copy_from_slice(&buf[..]);
        pos = end;
        total += len as u64;
    }
    Ok(total)
}

impl MemDisk {
    pub fn new(id: impl Into<String>, capacity: u64) -> Self {
        Self {
            id: id.into(),
            data: Mutex::new(vec![0u8; capacity as usize]),
            logical_block_size: 512,
            physical_block_size: 4096,
            can_discard: true,
            completions: Mutex::new(VecDeque::new()),
            faults: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_can_discard(mut self, can_discard: bool) -> Self {
        self.can_discard = can_discard;
        self
    }

    /// Queue one occurrence of `fault`; the next matching operation fails
    /// and the queue entry is consumed.
    pub fn fail_next(&self, fault: Fault) {
        self.faults.lock().unwrap().push_back(fault);
    }

    fn take_fault(&self, want: Fault) -> bool {
        let mut faults = self.faults.lock().unwrap();
        if faults.front() == Some(&want) {
            faults.pop_front();
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

#[cfg_attr(test, allow(dead_code))]
impl Disk for MemDisk {
    fn id(&self) -> &str {
        &self.id
    }

    fn geometry(&self) -> Geometry {
        Geometry {
            capacity: self.data.lock().unwrap().len() as u64,
            logical_block_size: self.logical_block_size,
            physical_block_size: self.physical_block_size,
            can_discard: self.can_discard,
        }
    }

    fn sync_read(&self, mut bufs: SGListMut, offset: u64) -> (Result<u64>, SGListMut) {
        if self.take_fault(Fault::SyncRead) {
            return (Err(injected(Fault::SyncRead)), bufs);
        }
        let data = self.data.lock().unwrap();
        let result = copy_into_bufs(&data, offset, &mut bufs);
        (result, bufs)
    }

    fn sync_write(&self, bufs: SGList, offset: u64) -> (Result<u64>, SGList) {
        if self.take_fault(Fault::SyncWrite) {
            return (Err(injected(Fault::SyncWrite)), bufs);
        }
        let mut data = self.data.lock().unwrap();
        let result = copy_from_bufs(&mut data, offset, &bufs);
        (result, bufs)
    }

    fn async_write(
        &self,
        _q: QueueHandle,
        io_data: IoData,
        sub_cmd: crate::subcmd::SubCommand,
        bufs: SGList,
        offset: u64,
    ) -> (Result<u64>, SGList) {
        if self.take_fault(Fault::AsyncSubmitWrite) {
            return (Err(injected(Fault::AsyncSubmitWrite)), bufs);
        }
        let copy_result = {
            let mut data = self.data.lock().unwrap();
            copy_from_bufs(&mut data, offset, &bufs)
        };
        let result = if self.take_fault(Fault::AsyncCompleteWrite) {
            Err(AsyncError::new(None))
        } else {
            match copy_result {
                Ok(n) => Ok(n),
                Err(_) => Err(AsyncError::new(None)),
            }
        };
        self.completions.lock().unwrap().push_back(AsyncCompletion { io_data, sub_cmd, result });
        (Ok(1), bufs)
    }

    fn async_read(
        &self,
        _q: QueueHandle,
        io_data: IoData,
        sub_cmd: crate::subcmd::SubCommand,
        mut bufs: SGListMut,
        offset: u64,
    ) -> (Result<u64>, SGListMut) {
        if self.take_fault(Fault::AsyncSubmitRead) {
            return (Err(injected(Fault::AsyncSubmitRead)), bufs);
        }
        let copy_result = {
            let data = self.data.lock().unwrap();
            copy_into_bufs(&data, offset, &mut bufs)
        };
        let result = if self.take_fault(Fault::AsyncCompleteRead) {
            Err(AsyncError::new(None))
        } else {
            match copy_result {
                Ok(n) => Ok(n),
                Err(_) => Err(AsyncError::new(None)),
            }
        };
        self.completions.lock().unwrap().push_back(AsyncCompletion { io_data, sub_cmd, result });
        (Ok(1), bufs)
    }

    fn handle_flush(&self, _q: QueueHandle, _io_data: IoData, _sub_cmd: crate::subcmd::SubCommand) -> Result<u64> {
        if self.take_fault(Fault::Flush) {
            return Err(injected(Fault::Flush));
        }
        Ok(0)
    }

    fn handle_discard(
        &self,
        _q: QueueHandle,
        _io_data: IoData,
        _sub_cmd: crate::subcmd::SubCommand,
        _len: u32,
        _offset: u64,
    ) -> Result<u64> {
        if self.take_fault(Fault::Discard) {
            return Err(injected(Fault::Discard));
        }
        Ok(1)
    }

    fn collect_async(&self, _q: QueueHandle, out: &mut Vec<AsyncCompletion>) {
        let mut completions = self.completions.lock().unwrap();
        out.extend(completions.drain(..));
    }

    fn open_for_uring(&self, _dev_fd: i32) -> Vec<i32> {
        Vec::new()
    }
}

// vim: tw=80
//! `FileDisk`: a plain-file-backed `Disk`.
//!
//! Grounded in `vdev_file.rs`'s own description of its backend operations:
//! they "happen immediately; they are not scheduled". A real io_uring
//! submission ring is the out-of-scope host runtime (spec.md §1); this
//! backend performs each operation inline with
//! `std::os::unix::fs::FileExt::{read_at, write_at}` and pushes the result
//! onto a queue that `collect_async` drains on the next poll, which is the
//! simplest faithful implementation of the "submit now, harvest later"
//! contract without a real ring.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

use raid_core::disk::{AsyncCompletion, AsyncError, Disk, Geometry, IoData, QueueHandle};
use raid_core::error::{Error, Result};
use raid_core::subcmd::SubCommand;
use raid_core::types::{SGList, SGListMut};

pub struct FileDisk {
    id: String,
    file: File,
    capacity: u64,
    completions: Mutex<Vec<AsyncCompletion>>,
}

impl FileDisk {
    /// Create (or truncate) a file of exactly `size` bytes at `path` and
    /// open it as a fresh backend.
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        file.set_len(size)?;
        Ok(Self { id: path.display().to_string(), file, capacity: size, completions: Mutex::new(Vec::new()) })
    }

    /// Open an existing file, sizing the backend to its current length.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = file.metadata()?.len();
        Ok(Self { id: path.display().to_string(), file, capacity, completions: Mutex::new(Vec::new()) })
    }

    fn read_into(&self, offset: u64, bufs: &mut SGListMut) -> Result<u64> {
        let mut pos = offset;
        let mut total = 0u64;
        for buf in bufs.iter_mut() {
            self.file.read_exact_at(&mut buf[..], pos)?;
            pos += buf.len() as u64;
            total += buf.len() as u64;
        }
        Ok(total)
    }

    fn write_from(&self, offset: u64, bufs: &SGList) -> Result<u64> {
        let mut pos = offset;
        let mut total = 0u64;
        for buf in bufs.iter() {
            self.file.write_all_at(&buf[..], pos)?;
            pos += buf.len() as u64;
            total += buf.len() as u64;
        }
        Ok(total)
    }
}

fn to_async_error(e: &Error) -> AsyncError {
    match e {
        Error::Io(io_err) => AsyncError::new(io_err.raw_os_error()),
        _ => AsyncError::new(None),
    }
}

impl Disk for FileDisk {
    fn id(&self) -> &str {
        &self.id
    }

    fn geometry(&self) -> Geometry {
        Geometry { capacity: self.capacity, logical_block_size: 512, physical_block_size: 4096, can_discard: true }
    }

    fn sync_read(&self, mut bufs: SGListMut, offset: u64) -> (Result<u64>, SGListMut) {
        let result = self.read_into(offset, &mut bufs);
        (result, bufs)
    }

    fn sync_write(&self, bufs: SGList, offset: u64) -> (Result<u64>, SGList) {
        let result = self.write_from(offset, &bufs);
        (result, bufs)
    }

    fn async_write(
        &self,
        _q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        bufs: SGList,
        offset: u64,
    ) -> (Result<u64>, SGList) {
        let result = self.write_from(offset, &bufs);
        let completion_result = match &result {
            Ok(n) => Ok(*n),
            Err(e) => Err(to_async_error(e)),
        };
        self.completions.lock().unwrap().push(AsyncCompletion { io_data, sub_cmd, result: completion_result });
        (Ok(1), bufs)
    }

    fn async_read(
        &self,
        _q: QueueHandle,
        io_data: IoData,
        sub_cmd: SubCommand,
        mut bufs: SGListMut,
        offset: u64,
    ) -> (Result<u64>, SGListMut) {
        let result = self.read_into(offset, &mut bufs);
        let completion_result = match &result {
            Ok(n) => Ok(*n),
            Err(e) => Err(to_async_error(e)),
        };
        self.completions.lock().unwrap().push(AsyncCompletion { io_data, sub_cmd, result: completion_result });
        (Ok(1), bufs)
    }

    fn handle_flush(&self, _q: QueueHandle, _io_data: IoData, _sub_cmd: SubCommand) -> Result<u64> {
        self.file.sync_data()?;
        Ok(0)
    }

    /// Approximates a discard by zero-filling the range: a real
    /// `FALLOC_FL_PUNCH_HOLE` would need a raw ioctl crate this backend
    /// deliberately doesn't carry (see DESIGN.md's dropped-dependency
    /// notes), and zero-filling is observably equivalent from the RAID
    /// layer's point of view.
    fn handle_discard(
        &self,
        _q: QueueHandle,
        _io_data: IoData,
        _sub_cmd: SubCommand,
        len: u32,
        offset: u64,
    ) -> Result<u64> {
        let zeros = vec![0u8; len as usize];
        self.file.write_all_at(&zeros, offset)?;
        Ok(1)
    }

    fn collect_async(&self, _q: QueueHandle, out: &mut Vec<AsyncCompletion>) {
        out.append(&mut self.completions.lock().unwrap());
    }

    fn open_for_uring(&self, _dev_fd: i32) -> Vec<i32> {
        Vec::new()
    }
}

#[cfg(test)]
mod t {
    use super::*;
    use divbuf::DivBufShared;

    #[test]
    fn create_then_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("child.img");
        let disk = FileDisk::create(&path, 64 * 1024).unwrap();
        assert_eq!(disk.geometry().capacity, 64 * 1024);

        let dbs = DivBufShared::from(vec![0x5au8; 100]);
        let (result, _) = disk.sync_write(vec![dbs.try_const().unwrap()], 10);
        assert_eq!(result.unwrap(), 100);

        let out = DivBufShared::from(vec![0u8; 100]);
        let (result, bufs) = disk.sync_read(vec![out.try_mut().unwrap()], 10);
        assert_eq!(result.unwrap(), 100);
        assert!(bufs[0].iter().all(|&b| b == 0x5a));
    }

    #[test]
    fn open_sizes_capacity_from_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("child.img");
        FileDisk::create(&path, 128 * 1024).unwrap();
        let reopened = FileDisk::open(&path).unwrap();
        assert_eq!(reopened.geometry().capacity, 128 * 1024);
    }

    #[test]
    fn async_write_completion_is_harvested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("child.img");
        let disk = FileDisk::create(&path, 4096).unwrap();
        let dbs = DivBufShared::from(vec![1u8; 16]);
        let (result, _) = disk.async_write(0, 9, 0, vec![dbs.try_const().unwrap()], 0);
        assert_eq!(result.unwrap(), 1);

        let mut out = Vec::new();
        disk.collect_async(0, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].io_data, 9);
        assert!(out[0].result.is_ok());
    }
}

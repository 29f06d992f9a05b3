// vim: tw=80
//! `raid-ctl check`: a read/write smoke test against `MemDisk` stand-ins
//! sized identically to a configuration's real children.
//!
//! This never touches the real backend files — it exists to exercise the
//! engine end to end on demand (a fixed workload, pass/fail output), not to
//! replace `raid-core`'s own integration test suite which already covers
//! the individual failure scenarios in detail.

use std::path::Path;
use std::sync::Arc;

use divbuf::DivBufShared;

use raid_core::disk::Disk;
use raid_core::raid0::Raid0;
use raid_core::raid1::Raid1;
use raid_core::testutil::MemDisk;
use raid_core::{Error, Result};

use crate::config::{Config, Kind};

const PROBE_LEN: usize = 4096;

enum CheckArray {
    Raid0(Raid0),
    Raid1(Raid1),
}

fn child_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

pub fn run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    config.validate()?;

    let children: Result<Vec<Arc<dyn Disk>>> = config
        .array
        .children
        .iter()
        .map(|c| {
            let size = child_size(&c.path)?;
            let id = c.path.display().to_string();
            Ok(Arc::new(MemDisk::new(id, size)) as Arc<dyn Disk>)
        })
        .collect();
    let children = children?;

    let array = match config.array.kind {
        Kind::Raid1 => {
            let mut it = children.into_iter();
            let a = it.next().ok_or_else(|| Error::InvalidArgument("raid1 requires 2 children".into()))?;
            let b = it.next().ok_or_else(|| Error::InvalidArgument("raid1 requires 2 children".into()))?;
            CheckArray::Raid1(Raid1::create_with_geometry(
                a,
                b,
                None,
                config.array.reserved_size,
                config.array.chunk_size,
            )?)
        }
        Kind::Raid0 => CheckArray::Raid0(Raid0::new(children, config.array.stripe_size, None)?),
    };

    let pattern = 0xa5u8;
    match &array {
        CheckArray::Raid1(raid1) => {
            let src = DivBufShared::from(vec![pattern; PROBE_LEN]);
            raid1.sync_write(vec![src.try_const().unwrap()], 0)?;

            let dst = DivBufShared::from(vec![0u8; PROBE_LEN]);
            raid1.sync_read(vec![dst.try_mut().unwrap()], 0)?;
            let view = dst.try_const().unwrap();
            if !view.iter().all(|&b| b == pattern) {
                return Err(Error::Mismatch("read-back data did not match what was written".into()));
            }
        }
        CheckArray::Raid0(raid0) => {
            let src = DivBufShared::from(vec![pattern; PROBE_LEN]);
            raid0.sync_write(vec![src.try_const().unwrap()], 0)?;

            let dst = DivBufShared::from(vec![0u8; PROBE_LEN]);
            raid0.sync_read(vec![dst.try_mut().unwrap()], 0)?;
            let view = dst.try_const().unwrap();
            if !view.iter().all(|&b| b == pattern) {
                return Err(Error::Mismatch("read-back data did not match what was written".into()));
            }
        }
    }

    Ok(())
}

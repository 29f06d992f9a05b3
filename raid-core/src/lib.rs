// vim: tw=80
//! `raid-core`: the RAID-0 striping router and RAID-1 mirroring engine for a
//! user-space block device.
//!
//! This crate has no process lifecycle and no CLI; it is consumed by a host
//! that owns the block-driver runtime (see `disk::Disk` for the seam) and,
//! in this workspace, by `raid-ctl`.

pub mod disk;
pub mod error;
pub mod metrics;
pub mod raid0;
pub mod raid1;
pub mod subcmd;
pub mod testutil;
pub mod types;

pub use error::{Error, Result};

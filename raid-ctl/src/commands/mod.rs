// vim: tw=80
//! Subcommand bodies. Each function takes already-parsed CLI arguments, so
//! the logic behind `raid-ctl create|status|check|serve` stays unit
//! testable without spawning the binary.

pub mod check;
pub mod create;
pub mod serve;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use prometheus::Registry;

use raid_core::disk::Disk;
use raid_core::metrics::Metrics;
use raid_core::raid0::Raid0;
use raid_core::raid1::Raid1;
use raid_core::{Error, Result};

use crate::config::{Config, Kind};
use crate::disk::FileDisk;

/// Either personality, wrapped so `status`/`check`/`serve` can share one
/// topology opener without caring which kind a config file selects.
pub enum Array {
    Raid0(Raid0),
    Raid1(Raid1),
}

impl Array {
    pub fn capacity(&self) -> u64 {
        match self {
            Array::Raid0(r) => r.capacity(),
            Array::Raid1(r) => r.capacity(),
        }
    }

    pub fn logical_block_size(&self) -> u32 {
        match self {
            Array::Raid0(r) => r.logical_block_size(),
            Array::Raid1(r) => r.logical_block_size(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Array::Raid0(_) => "raid0",
            Array::Raid1(_) => "raid1",
        }
    }

    /// A one-line health summary. RAID-0 carries no redundancy metadata at
    /// all; RAID-1's degraded state and dirty-bitmap size are the
    /// interesting parts.
    pub fn describe_health(&self) -> String {
        match self {
            Array::Raid0(r) => format!("raid0, {} children, no redundancy", r.num_children()),
            Array::Raid1(r) => {
                format!("raid1, {:?}, {} dirty bitmap page(s)", r.degraded_state(), r.dirty_page_count())
            }
        }
    }

    /// The child identifiers this array addresses, for `status`'s table.
    pub fn child_ids(&self) -> String {
        match self {
            Array::Raid0(r) => (0..r.num_children()).map(|i| i.to_string()).collect::<Vec<_>>().join(", "),
            Array::Raid1(_) => "A, B".to_string(),
        }
    }

    /// RAID-1's degraded state, or "n/a" for RAID-0 which has none.
    pub fn degraded_state_string(&self) -> String {
        match self {
            Array::Raid0(_) => "n/a".to_string(),
            Array::Raid1(r) => format!("{:?}", r.degraded_state()),
        }
    }

    /// RAID-1's dirty bitmap page count, or "n/a" for RAID-0.
    pub fn dirty_pages_string(&self) -> String {
        match self {
            Array::Raid0(_) => "n/a".to_string(),
            Array::Raid1(r) => r.dirty_page_count().to_string(),
        }
    }

    /// Release a RAID-1 array in an orderly fashion so the next `open`
    /// finds a clean unmount. RAID-0 owns no metadata to persist.
    pub fn close(self) -> Result<()> {
        match self {
            Array::Raid0(_) => Ok(()),
            Array::Raid1(r) => r.close(),
        }
    }
}

fn array_name(config_path: &Path) -> String {
    config_path.file_stem().and_then(|s| s.to_str()).unwrap_or("array").to_string()
}

fn metrics_for(array_name: &str) -> Result<(Registry, Arc<Metrics>)> {
    let registry = Registry::new();
    let metrics = Arc::new(Metrics::new(&registry, array_name)?);
    Ok((registry, metrics))
}

fn child_paths(config: &Config) -> Vec<PathBuf> {
    config.array.children.iter().map(|c| c.path.clone()).collect()
}

/// Open every child in `config` through `open_one`, building the right
/// personality for `config.array.kind`.
fn build<F>(config: &Config, metrics: Arc<Metrics>, open_one: F) -> Result<Array>
where
    F: Fn(&Path) -> Result<FileDisk>,
{
    let children: Result<Vec<Arc<dyn Disk>>> =
        child_paths(config).iter().map(|p| open_one(p).map(|d| Arc::new(d) as Arc<dyn Disk>)).collect();
    let children = children?;

    match config.array.kind {
        Kind::Raid1 => {
            let mut it = children.into_iter();
            let a = it.next().ok_or_else(|| Error::InvalidArgument("raid1 requires 2 children".into()))?;
            let b = it.next().ok_or_else(|| Error::InvalidArgument("raid1 requires 2 children".into()))?;
            Ok(Array::Raid1(Raid1::open_with_geometry(
                a,
                b,
                Some(metrics),
                config.array.reserved_size,
                config.array.chunk_size,
            )?))
        }
        Kind::Raid0 => Ok(Array::Raid0(Raid0::new(children, config.array.stripe_size, Some(metrics))?)),
    }
}

/// Open an existing array from its configuration file.
pub fn open(config_path: &Path) -> Result<(String, Array)> {
    let config = Config::load(config_path)?;
    config.validate()?;
    let name = array_name(config_path);
    let (_registry, metrics) = metrics_for(&name)?;
    let array = build(&config, metrics, |p| FileDisk::open(p))?;
    Ok((name, array))
}

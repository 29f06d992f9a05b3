// vim: tw=80
//! `raid-ctl create`: format a fresh array from a topology file.

use std::path::Path;
use std::sync::Arc;

use raid_core::disk::Disk;
use raid_core::raid0::Raid0;
use raid_core::raid1::Raid1;
use raid_core::{Error, Result};

use crate::config::{Config, Kind};
use crate::disk::FileDisk;

use super::{array_name, metrics_for};

pub fn run(config_path: &Path, size: u64) -> Result<()> {
    let config = Config::load(config_path)?;
    config.validate()?;
    let name = array_name(config_path);
    let (_registry, metrics) = metrics_for(&name)?;

    let children: Result<Vec<Arc<dyn Disk>>> = config
        .array
        .children
        .iter()
        .map(|c| FileDisk::create(&c.path, size).map(|d| Arc::new(d) as Arc<dyn Disk>))
        .collect();
    let children = children?;

    match config.array.kind {
        Kind::Raid1 => {
            let mut it = children.into_iter();
            let a = it.next().ok_or_else(|| Error::InvalidArgument("raid1 requires 2 children".into()))?;
            let b = it.next().ok_or_else(|| Error::InvalidArgument("raid1 requires 2 children".into()))?;
            let raid1 = Raid1::create_with_geometry(
                a,
                b,
                Some(metrics),
                config.array.reserved_size,
                config.array.chunk_size,
            )?;
            let capacity = raid1.capacity();
            raid1.close()?;
            tracing::info!(array = %name, capacity, "array created");
        }
        Kind::Raid0 => {
            let raid0 = Raid0::new(children, config.array.stripe_size, Some(metrics))?;
            tracing::info!(array = %name, capacity = raid0.capacity(), "array created");
        }
    }
    Ok(())
}

#[cfg(test)]
mod t {
    use super::*;

    fn write_config(dir: &std::path::Path, kind: &str, children: &[&str]) -> std::path::PathBuf {
        let path = dir.join("array.toml");
        let entries: String = children
            .iter()
            .map(|c| format!("[[array.children]]\npath = \"{}\"\n", dir.join(c).display()))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&path, format!("[array]\nkind = \"{kind}\"\n\n{entries}")).unwrap();
        path
    }

    #[test]
    fn creates_a_raid1_array_and_leaves_it_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(dir.path(), "raid1", &["a.img", "b.img"]);
        run(&config_path, 2 * 1024 * 1024).unwrap();

        let (_name, array) = super::super::open(&config_path).unwrap();
        assert!(array.capacity() > 0);
        array.close().unwrap();
    }

    #[test]
    fn creates_a_raid0_array() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(dir.path(), "raid0", &["a.img", "b.img"]);
        run(&config_path, 1024 * 1024).unwrap();

        let (_name, array) = super::super::open(&config_path).unwrap();
        assert_eq!(array.capacity(), 2 * 1024 * 1024);
    }
}

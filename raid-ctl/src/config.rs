// vim: tw=80
//! Array topology configuration, read from a TOML file.
//!
//! The schema is intentionally small: one array, one personality, an
//! ordered list of child backend paths. Larger topologies (RAID-0 over
//! RAID-1) are out of this CLI's scope even though `raid-core` itself
//! supports shared children; see SPEC_FULL.md §3+++.

use std::path::{Path, PathBuf};

use serde_derive::Deserialize;

use raid_core::Error;

fn default_chunk_size() -> u64 {
    32 * 1024
}

fn default_reserved_size() -> u64 {
    raid_core::raid1::superblock::RESERVED_SIZE
}

fn default_stripe_size() -> u64 {
    64 * 1024
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Raid0,
    Raid1,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChildConfig {
    pub path: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ArrayConfig {
    pub kind: Kind,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// RAID-1 only: size of the per-child region reserved for the
    /// superblock and dirty bitmap, ahead of user data. Advanced,
    /// non-default configuration — caps how large the array can grow
    /// (a bigger reservation buys more bitmap pages); raising it after
    /// `create` is not supported, since children opened later must be
    /// given the same value used at creation.
    #[serde(default = "default_reserved_size")]
    pub reserved_size: u64,
    #[serde(default = "default_stripe_size")]
    pub stripe_size: u64,
    pub children: Vec<ChildConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub array: ArrayConfig,
}

impl Config {
    pub fn load(path: &Path) -> raid_core::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::InvalidArgument(format!("{}: {e}", path.display())))
    }

    /// Validate the topology shape the chosen personality requires: RAID-1
    /// always takes exactly two children, RAID-0 takes at least one.
    pub fn validate(&self) -> raid_core::Result<()> {
        match self.array.kind {
            Kind::Raid1 if self.array.children.len() != 2 => Err(Error::InvalidArgument(format!(
                "raid1 requires exactly 2 children, found {}",
                self.array.children.len()
            ))),
            Kind::Raid0 if self.array.children.is_empty() => {
                Err(Error::InvalidArgument("raid0 requires at least 1 child".into()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn parses_minimal_raid1_config() {
        let toml = r#"
            [array]
            kind = "raid1"

            [[array.children]]
            path = "/tmp/a.img"

            [[array.children]]
            path = "/tmp/b.img"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.array.kind, Kind::Raid1);
        assert_eq!(cfg.array.chunk_size, default_chunk_size());
        assert_eq!(cfg.array.reserved_size, default_reserved_size());
        assert_eq!(cfg.array.children.len(), 2);
        cfg.validate().unwrap();
    }

    #[test]
    fn parses_raid1_with_custom_reserved_size() {
        let toml = r#"
            [array]
            kind = "raid1"
            reserved_size = 1048576

            [[array.children]]
            path = "/tmp/a.img"

            [[array.children]]
            path = "/tmp/b.img"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.array.reserved_size, 1024 * 1024);
    }

    #[test]
    fn rejects_raid1_with_wrong_child_count() {
        let toml = r#"
            [array]
            kind = "raid1"

            [[array.children]]
            path = "/tmp/a.img"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_raid0_with_custom_stripe_size() {
        let toml = r#"
            [array]
            kind = "raid0"
            stripe_size = 131072

            [[array.children]]
            path = "/tmp/a.img"

            [[array.children]]
            path = "/tmp/b.img"

            [[array.children]]
            path = "/tmp/c.img"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.array.stripe_size, 131_072);
        assert_eq!(cfg.array.children.len(), 3);
        cfg.validate().unwrap();
    }
}

// vim: tw=80
//! Library half of `raid-ctl`: configuration, CLI argument shapes, disk
//! backends and subcommand bodies. `src/bin/raid-ctl/main.rs` is a thin
//! shell over this crate so the subcommand logic itself stays unit
//! testable without spawning a process.

pub mod cli;
pub mod commands;
pub mod config;
pub mod disk;

/// Maps a `raid_core::Error` to a process exit code, per SPEC_FULL.md §7:
/// config/argument problems are a user error (2), I/O failures are
/// environmental (3), identity or capacity mismatches mean the array
/// itself can't be used as configured (4), and a broken array is the
/// worst case (5). `Degraded` is informational and never reaches this
/// function as a hard failure.
pub fn exit_code_for(e: &raid_core::Error) -> u8 {
    use raid_core::Error::*;
    match e {
        InvalidArgument(_) | NotSupported(_) => 2,
        Io(_) => 3,
        Mismatch(_) | CapacityExceeded { .. } => 4,
        Degraded { .. } => 0,
        Broken => 5,
    }
}

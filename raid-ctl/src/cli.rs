// vim: tw=80
//! Command-line argument shapes for the `raid-ctl` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "raid-ctl", about = "Create and administer a user-space RAID array", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new array from a topology file and format its children.
    Create {
        /// Path to the array's TOML configuration file.
        #[arg(long, short)]
        config: PathBuf,
        /// Per-child backend size in bytes. Each child file is created (or
        /// truncated) to exactly this size.
        #[arg(long)]
        size: u64,
    },
    /// Open an existing array and print its health.
    Status {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Run a self-contained read/write smoke test against an in-memory
    /// stand-in for the configured topology, without touching the real
    /// backend files.
    Check {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Open the array and serve line-oriented commands from stdin until
    /// EOF, polling for completions between each.
    Serve {
        #[arg(long, short)]
        config: PathBuf,
    },
}

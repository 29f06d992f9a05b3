// vim: tw=80
//! `raid-ctl`: create, inspect and exercise a user-space RAID array from the
//! command line.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use raid_ctl::cli::{Cli, Command};
use raid_ctl::{commands, exit_code_for};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Create { config, size } => commands::create::run(config, *size),
        Command::Status { config } => commands::status::run(config).map(|report| println!("{report}")),
        Command::Check { config } => commands::check::run(config).map(|()| println!("ok")),
        Command::Serve { config } => commands::serve::run(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("raid-ctl: {e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

// vim: tw=80
//! `raid-ctl serve`: a minimal interactive front-end over the array's
//! asynchronous submit/poll interface, driven by line-oriented commands on
//! stdin. This stands in for the real host runtime's io_uring loop (out of
//! scope per SPEC_FULL.md) well enough to drive the engine by hand.
//!
//! Commands, one per line:
//!   write <offset> <len> <byte>   fill `len` bytes at `offset` with `byte`
//!   read <offset> <len>           read back `len` bytes at `offset`
//!   flush
//!   status
//!   quit

use std::io::{BufRead, Write};
use std::path::Path;

use divbuf::DivBufShared;

use raid_core::disk::AsyncCompletion;
use raid_core::{Error, Result};

use super::{open, Array};

const Q: u64 = 0;

fn submit_write(array: &Array, io_data: u64, offset: u64, len: usize, byte: u8) -> Result<()> {
    let dbs = DivBufShared::from(vec![byte; len]);
    match array {
        Array::Raid1(r) => r.handle_write(Q, io_data, 0, vec![dbs.try_const().unwrap()], offset).map(|_| ()),
        Array::Raid0(r) => r.handle_write(Q, io_data, 0, vec![dbs.try_const().unwrap()], offset).map(|_| ()),
    }
}

fn submit_read(array: &Array, io_data: u64, offset: u64, len: usize) -> Result<()> {
    let dbs = DivBufShared::from(vec![0u8; len]);
    match array {
        Array::Raid1(r) => r.handle_read(Q, io_data, 0, vec![dbs.try_mut().unwrap()], offset).map(|_| ()),
        Array::Raid0(r) => r.handle_read(Q, io_data, 0, vec![dbs.try_mut().unwrap()], offset).map(|_| ()),
    }
}

fn poll(array: &Array, out: &mut Vec<AsyncCompletion>) {
    match array {
        Array::Raid1(r) => r.collect_async(Q, out),
        Array::Raid0(r) => r.collect_async(Q, out),
    }
}

/// Run the command loop over `input`/`output`. Split out from `run` so tests
/// can drive it against in-memory buffers instead of real stdio.
pub fn serve_loop(array: &Array, input: impl BufRead, mut output: impl Write) -> Result<()> {
    let mut next_io_data = 0u64;
    for line in input.lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["quit"] | ["exit"] => break,
            ["status"] => {
                writeln!(output, "{}", array.describe_health()).ok();
            }
            ["flush"] => {
                let io_data = next_io_data;
                next_io_data += 1;
                let result = match array {
                    Array::Raid1(r) => r.handle_flush(Q, io_data, 0),
                    Array::Raid0(r) => r.handle_flush(Q, io_data, 0),
                };
                match result {
                    Ok(_) => writeln!(output, "ok").ok(),
                    Err(e) => writeln!(output, "error: {e}").ok(),
                };
            }
            ["write", offset, len, byte] => {
                let offset: u64 = offset.parse().map_err(|_| Error::InvalidArgument("bad offset".into()))?;
                let len: usize = len.parse().map_err(|_| Error::InvalidArgument("bad len".into()))?;
                let byte: u8 = byte.parse().map_err(|_| Error::InvalidArgument("bad byte".into()))?;
                let io_data = next_io_data;
                next_io_data += 1;
                match submit_write(array, io_data, offset, len, byte) {
                    Ok(()) => writeln!(output, "submitted {io_data}").ok(),
                    Err(e) => writeln!(output, "error: {e}").ok(),
                };
            }
            ["read", offset, len] => {
                let offset: u64 = offset.parse().map_err(|_| Error::InvalidArgument("bad offset".into()))?;
                let len: usize = len.parse().map_err(|_| Error::InvalidArgument("bad len".into()))?;
                let io_data = next_io_data;
                next_io_data += 1;
                match submit_read(array, io_data, offset, len) {
                    Ok(()) => writeln!(output, "submitted {io_data}").ok(),
                    Err(e) => writeln!(output, "error: {e}").ok(),
                };
            }
            [] => {}
            _ => {
                writeln!(output, "error: unrecognized command").ok();
            }
        }

        let mut completions = Vec::new();
        poll(array, &mut completions);
        for c in completions {
            match c.result {
                Ok(n) => writeln!(output, "completed {} ok {n} bytes", c.io_data).ok(),
                Err(e) => writeln!(output, "completed {} error {e:?}", c.io_data).ok(),
            };
        }
    }
    Ok(())
}

pub fn run(config_path: &Path) -> Result<()> {
    let (_name, array) = open(config_path)?;
    let stdin = std::io::stdin();
    let result = serve_loop(&array, stdin.lock(), std::io::stdout());
    array.close()?;
    result
}

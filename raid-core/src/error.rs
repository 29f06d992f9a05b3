// vim: tw=80
//! Error type shared by every component in this crate.

use std::{fmt, io};

use crate::types::ChildId;

/// Result alias used throughout `raid-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// The abstract error kinds of the RAID personality layer.
///
/// None of these are exception types; they are returned, not thrown, and
/// callers are expected to match on them to decide retry/failover behavior
/// rather than treat them as opaque failures.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument was invalid (bad opcode, misaligned
    /// offset, zero-length buffer, malformed configuration).
    InvalidArgument(String),
    /// A child `Disk` returned an I/O error.
    Io(io::Error),
    /// A superblock failed validation: bad magic, unsupported
    /// `format_version`, or `array_uuid`/`bitmap.uuid` disagreement.
    Mismatch(String),
    /// The requested capacity exceeds what the bitmap geometry can address.
    CapacityExceeded { requested: u64, max: u64 },
    /// The operation is not supported by this backend or personality.
    NotSupported(String),
    /// Informational: the array is running with one child lost. Not fatal.
    Degraded { child: ChildId },
    /// Both children have failed; the array can no longer serve I/O.
    Broken,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Mismatch(msg) => write!(f, "superblock mismatch: {msg}"),
            Error::CapacityExceeded { requested, max } => write!(
                f,
                "capacity exceeded: requested {requested} bytes, maximum addressable is {max} bytes"
            ),
            Error::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Error::Degraded { child } => write!(f, "array is degraded: child {child:?} is lost"),
            Error::Broken => write!(f, "array is broken: no surviving child"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

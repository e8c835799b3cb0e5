// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the core store.
///
/// Follows the taxonomy of configuration / format / host I/O / out-of-space
/// / no-entry errors: configuration and format errors are only produced at
/// startup (shard open), the rest can also occur on the data plane.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("format error in shard {shard}: {reason}")]
    Format { shard: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("access would exceed the virtual size")]
    OutOfSpace,

    #[error("no such entry")]
    NoEntry,
}

impl Error {
    /// Maps this error onto a POSIX errno, for bridge layers (FUSE) that
    /// need to return one from every operation.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Error::Config(_) | Error::Format { .. } => libc::EIO,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::OutOfSpace => libc::ENOSPC,
            Error::NoEntry => libc::ENOENT,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

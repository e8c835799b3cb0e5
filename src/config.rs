// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line surface and the size-string convention from §6/§14: a bare
//! `N` names an absolute size in MiB, a `+N` names growth by that many MiB
//! relative to whatever the store already has on disk.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::error::{Error, Result};
use crate::shard::{read_main_metadata, BANNER};

const MIB: u64 = 1024 * 1024;

#[derive(Parser, Debug)]
#[command(
    name = "sparsevol",
    version = BANNER,
    about = "Thin-provisioned sparse block store exposed as a single loop-mountable virtual file"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Opens (creating if needed) a store and mounts it as a FUSE filesystem.
    Mount(MountArgs),
    /// Opens (creating if needed) a store without mounting it.
    Format(FormatArgs),
}

#[derive(Args, Debug)]
pub struct MountArgs {
    /// Path to the store's main file (shard 0 for an unsplit store, or the
    /// metadata stub for a split one).
    #[arg(long)]
    pub storage_path: PathBuf,

    /// Directory to mount the virtual filesystem on.
    #[arg(long)]
    pub mount_dir: PathBuf,

    /// Virtual size in MiB, or `+N` to grow an existing store by N MiB.
    #[arg(long)]
    pub size_mb: String,

    /// Per-shard capacity in MiB. Defaults to the store's virtual size
    /// (i.e. no splitting) on first creation; ignored (and validated
    /// against) the stored value on reopen.
    #[arg(long)]
    pub split_size_mb: Option<u64>,

    /// Raises the tracing filter to `debug`.
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args, Debug)]
pub struct FormatArgs {
    #[arg(long)]
    pub storage_path: PathBuf,

    #[arg(long)]
    pub size_mb: String,

    #[arg(long)]
    pub split_size_mb: Option<u64>,

    #[arg(long)]
    pub debug: bool,
}

impl MountArgs {
    pub fn debug(&self) -> bool {
        self.debug
    }
}

impl FormatArgs {
    pub fn debug(&self) -> bool {
        self.debug
    }
}

/// A parsed `--size-mb` value: either an absolute size, or growth relative
/// to whatever the store already has on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRequest {
    Absolute(u64),
    Grow(u64),
}

/// Parses the `N` / `+N` convention. `N` is in MiB; the result is in bytes.
pub fn parse_size_mb(s: &str) -> Result<SizeRequest> {
    let (grow, digits) = match s.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let mb: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid size-mb value: {s:?}")))?;
    if mb == 0 {
        return Err(Error::Config("size-mb must be positive".into()));
    }
    let bytes = mb
        .checked_mul(MIB)
        .ok_or_else(|| Error::Config(format!("size-mb value too large: {s:?}")))?;
    Ok(if grow {
        SizeRequest::Grow(bytes)
    } else {
        SizeRequest::Absolute(bytes)
    })
}

/// Configuration consumed by [`crate::store::Store::open`].
pub struct StoreConfig {
    pub storage_path: PathBuf,
    pub requested_virtual_size: u64,
    pub split_size: Option<u64>,
}

impl StoreConfig {
    /// Resolves a CLI size-mb string (and optional split-size-mb) against
    /// whatever is already on disk at `storage_path`, turning a `+N`
    /// growth request into the absolute byte count `Store::open` expects.
    pub fn resolve(storage_path: PathBuf, size_mb: &str, split_size_mb: Option<u64>) -> Result<Self> {
        let request = parse_size_mb(size_mb)?;
        let requested_virtual_size = match request {
            SizeRequest::Absolute(bytes) => bytes,
            SizeRequest::Grow(delta) => {
                let current = current_virtual_size(&storage_path)?.unwrap_or(0);
                current.checked_add(delta).ok_or_else(|| {
                    Error::Config("requested growth overflows a 64-bit size".into())
                })?
            }
        };
        Ok(Self {
            storage_path,
            requested_virtual_size,
            split_size: split_size_mb.map(|mb| mb * MIB),
        })
    }
}

fn current_virtual_size(storage_path: &Path) -> Result<Option<u64>> {
    Ok(read_main_metadata(storage_path)?.map(|(_, _, v)| v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_size() {
        assert_eq!(parse_size_mb("10").unwrap(), SizeRequest::Absolute(10 * MIB));
    }

    #[test]
    fn parses_growth_size() {
        assert_eq!(parse_size_mb("+5").unwrap(), SizeRequest::Grow(5 * MIB));
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!(parse_size_mb("0").is_err());
        assert!(parse_size_mb("banana").is_err());
        assert!(parse_size_mb("+0").is_err());
    }

    #[test]
    fn resolve_absolute_on_fresh_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("virtual.dat");
        let config = StoreConfig::resolve(path.clone(), "16", None).unwrap();
        assert_eq!(config.requested_virtual_size, 16 * MIB);
        assert_eq!(config.storage_path, path);
    }

    #[test]
    fn resolve_growth_against_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("virtual.dat");
        {
            let config = StoreConfig::resolve(path.clone(), "10", None).unwrap();
            crate::store::Store::open(&config).unwrap();
        }
        let grown = StoreConfig::resolve(path, "+5", None).unwrap();
        assert_eq!(grown.requested_virtual_size, 15 * MIB);
    }
}

// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shard lifecycle (C6): opening or creating one backing file, validating
//! its header, and recovering the allocator's bump pointer after restart.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use positioned_io::{ReadAt, WriteAt};
use tracing::{debug, warn};

use crate::addr::{
    data_region_offset, slots_per_shard, BLOCK_SIZE, FORMAT_VERSION, METADATA_LEN,
    METADATA_OFFSET,
};
use crate::error::{Error, Result};
use crate::index::ShardMap;

pub const BANNER: &str = "sparsevol sparse volume";

/// One backing file covering a contiguous range of the virtual address
/// space, with its own header, index, and allocator bump pointer.
pub(crate) struct Shard {
    path: PathBuf,
    file: File,
    map: ShardMap,
    slots: u64,
    next_data_offset: AtomicU64,
}

impl Shard {
    /// Opens `path` if it exists (validating its header against
    /// `split_size`/`requested_virtual_size`), or creates it fresh.
    ///
    /// Returns the shard together with the `virtual_size` now recorded in
    /// its metadata, so the caller can reconcile it across all shards.
    pub(crate) fn open_or_create(
        path: PathBuf,
        split_size: u64,
        requested_virtual_size: u64,
    ) -> Result<(Self, u64)> {
        let slots = slots_per_shard(split_size);
        let header_len = data_region_offset(split_size);

        if path.exists() {
            Self::open_existing(path, slots, split_size, requested_virtual_size, header_len)
        } else {
            Self::create_new(path, slots, split_size, requested_virtual_size, header_len)
        }
    }

    fn open_existing(
        path: PathBuf,
        slots: u64,
        split_size: u64,
        requested_virtual_size: u64,
        header_len: u64,
    ) -> Result<(Self, u64)> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut raw = [0u8; METADATA_LEN as usize];
        file.read_exact_at(METADATA_OFFSET, &mut raw)?;
        let format_version = u64::from_le_bytes(raw[0..8].try_into().unwrap());
        let stored_split_size = u64::from_le_bytes(raw[8..16].try_into().unwrap());
        let stored_virtual_size = u64::from_le_bytes(raw[16..24].try_into().unwrap());

        if format_version != FORMAT_VERSION {
            return Err(Error::Format {
                shard: path.clone(),
                reason: format!(
                    "unsupported format_version {format_version} (expected {FORMAT_VERSION})"
                ),
            });
        }
        if stored_split_size != split_size {
            return Err(Error::Format {
                shard: path.clone(),
                reason: format!(
                    "split_size mismatch: store has {split_size}, shard has {stored_split_size}"
                ),
            });
        }

        let virtual_size = if requested_virtual_size > stored_virtual_size {
            debug!(
                shard = %path.display(),
                from = stored_virtual_size,
                to = requested_virtual_size,
                "growing virtual_size"
            );
            file.write_all_at(&requested_virtual_size.to_le_bytes(), METADATA_OFFSET + 16)?;
            requested_virtual_size
        } else {
            stored_virtual_size
        };

        let file_len = file.metadata()?.len();
        let allocated = file_len.saturating_sub(header_len);
        let rounded = (allocated / BLOCK_SIZE) * BLOCK_SIZE;
        let next_data_offset = header_len + rounded;

        let map = ShardMap::map(&file, slots)?;
        debug!(shard = %path.display(), next_data_offset, "opened existing shard");

        Ok((
            Self {
                path,
                file,
                map,
                slots,
                next_data_offset: AtomicU64::new(next_data_offset),
            },
            virtual_size,
        ))
    }

    fn create_new(
        path: PathBuf,
        slots: u64,
        split_size: u64,
        requested_virtual_size: u64,
        header_len: u64,
    ) -> Result<(Self, u64)> {
        if requested_virtual_size == 0 {
            return Err(Error::Config(
                "virtual size must be positive for a new store".into(),
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        file.set_len(header_len)?;

        let map = ShardMap::map(&file, slots)?;
        map.write_banner(BANNER);
        map.write_metadata(FORMAT_VERSION, split_size, requested_virtual_size);
        map.flush()?;

        debug!(shard = %path.display(), header_len, "created new shard");

        Ok((
            Self {
                path,
                file,
                map,
                slots,
                next_data_offset: AtomicU64::new(header_len),
            },
            requested_virtual_size,
        ))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn slots(&self) -> u64 {
        self.slots
    }

    pub(crate) fn lookup(&self, slot: u64) -> u64 {
        self.map.lookup(slot)
    }

    /// Appends a fresh data block for `slot` and records it in the index.
    /// Must only be called while holding the store's allocator gate.
    pub(crate) fn allocate(&self, slot: u64, pre_zero: bool) -> Result<u64> {
        let new_offset = self.next_data_offset.fetch_add(BLOCK_SIZE, Ordering::Relaxed);
        self.map.store(slot, new_offset);
        if pre_zero {
            // Pre-zero explicitly rather than relying on sparse-extension
            // semantics (§9 open question): portable across filesystems
            // that don't return zeros past the old EOF.
            self.file.write_all_at(&[0u8; BLOCK_SIZE as usize], new_offset)?;
        }
        Ok(new_offset)
    }

    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        match self.file.read_at(offset, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.map.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Derives the on-disk path for shard `index` of `count` shards rooted at
/// `base`. A single-shard store uses `base` unchanged; a split store emits
/// zero-padded `base.{index}` suffixes (`base.00`, `base.01`, ... for a
/// two-digit count). See [`resolve_existing`] for the read-side fallback
/// that also accepts an unpadded suffix.
pub(crate) fn shard_path(base: &Path, index: u64, count: u64) -> PathBuf {
    if count <= 1 {
        return base.to_path_buf();
    }
    let width = (count - 1).to_string().len();
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index:0width$}"));
    PathBuf::from(name)
}

/// Resolves the path to use when *opening* shard `index`: prefers the
/// zero-padded form this implementation emits, falls back to an unpadded
/// `base.{index}` so shards written by a version/implementation that
/// doesn't pad are still readable, and otherwise reports the padded path
/// (which `Shard::open_or_create` will then create fresh).
pub(crate) fn resolve_shard_path(base: &Path, index: u64, count: u64) -> PathBuf {
    let padded = shard_path(base, index, count);
    if count <= 1 || padded.exists() {
        return padded;
    }
    let mut unpadded = base.as_os_str().to_owned();
    unpadded.push(format!(".{index}"));
    let unpadded = PathBuf::from(unpadded);
    if unpadded.exists() {
        warn!(path = %unpadded.display(), "reading legacy unpadded shard name");
        return unpadded;
    }
    padded
}

/// The metadata record found in an existing file at `path`, if any,
/// regardless of whether that file is a full shard (single-shard stores,
/// where `path` doubles as shard 0) or a bare metadata stub (split
/// stores, where `path` itself carries no data and the shards live at
/// `path.0`, `path.1`, ...). Both lay the record out identically at
/// [`METADATA_OFFSET`], so one code path covers both (§6: "main metadata
/// file").
pub(crate) fn read_main_metadata(path: &Path) -> Result<Option<(u64, u64, u64)>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let mut raw = [0u8; METADATA_LEN as usize];
    file.read_exact_at(METADATA_OFFSET, &mut raw)?;
    let format_version = u64::from_le_bytes(raw[0..8].try_into().unwrap());
    let split_size = u64::from_le_bytes(raw[8..16].try_into().unwrap());
    let virtual_size = u64::from_le_bytes(raw[16..24].try_into().unwrap());
    if format_version != FORMAT_VERSION {
        return Err(Error::Format {
            shard: path.to_path_buf(),
            reason: format!("unsupported format_version {format_version} (expected {FORMAT_VERSION})"),
        });
    }
    Ok(Some((format_version, split_size, virtual_size)))
}

/// Creates or refreshes the bare metadata stub used when a store is split
/// across more than one shard file: just a banner and a metadata record,
/// padded to one block, with no index or data region of its own.
pub(crate) fn write_main_metadata_stub(path: &Path, split_size: u64, virtual_size: u64) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    file.set_len(BLOCK_SIZE)?;
    let map = ShardMap::map(&file, 0)?;
    map.write_banner(BANNER);
    map.write_metadata(FORMAT_VERSION, split_size, virtual_size);
    map.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn single_shard_path_is_unchanged() {
        let base = Path::new("/tmp/vol.dat");
        assert_eq!(shard_path(base, 0, 1), base);
    }

    #[test]
    fn multi_shard_path_is_zero_padded() {
        let base = Path::new("/tmp/vol.dat");
        assert_eq!(shard_path(base, 3, 12), PathBuf::from("/tmp/vol.dat.03"));
        assert_eq!(shard_path(base, 0, 2), PathBuf::from("/tmp/vol.dat.0"));
    }

    #[test]
    fn create_then_reopen_recovers_next_data_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol.dat");
        let split_size = 4 * 1024 * 1024;

        let (shard, v) = Shard::open_or_create(path.clone(), split_size, 16 * 1024 * 1024).unwrap();
        assert_eq!(v, 16 * 1024 * 1024);
        let header_len = data_region_offset(split_size);
        assert_eq!(shard.next_data_offset.load(Ordering::Relaxed), header_len);
        shard.allocate(0, true).unwrap();
        shard.flush().unwrap();
        drop(shard);

        let (shard2, v2) = Shard::open_or_create(path, split_size, 16 * 1024 * 1024).unwrap();
        assert_eq!(v2, 16 * 1024 * 1024);
        assert_eq!(
            shard2.next_data_offset.load(Ordering::Relaxed),
            header_len + BLOCK_SIZE
        );
    }

    #[test]
    fn reopen_rejects_split_size_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol.dat");
        Shard::open_or_create(path.clone(), 4 * 1024 * 1024, 16 * 1024 * 1024).unwrap();
        let err = Shard::open_or_create(path, 2 * 1024 * 1024, 16 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn reopen_only_grows_virtual_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol.dat");
        let split_size = 8 * 1024 * 1024;
        Shard::open_or_create(path.clone(), split_size, 10 * 1024 * 1024).unwrap();
        let (_, grown) = Shard::open_or_create(path.clone(), split_size, 20 * 1024 * 1024).unwrap();
        assert_eq!(grown, 20 * 1024 * 1024);
        let (_, unchanged) = Shard::open_or_create(path, split_size, 5 * 1024 * 1024).unwrap();
        assert_eq!(unchanged, 20 * 1024 * 1024);
    }
}

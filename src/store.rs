// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The top-level `Store`: owns every shard, the store-wide allocator gate
//! (C7), and the split-aware read/write engine (C5) that drives the
//! per-chunk primitives in [`crate::io`].

use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::instrument;

use crate::addr::{self, BLOCK_SIZE, MAX_SHARDS};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::io;
use crate::shard::{read_main_metadata, resolve_shard_path, write_main_metadata_stub, Shard};

/// A single mounted, thin-provisioned virtual file.
///
/// Cheap to share: wrap in an `Arc` at the call site (the bridge adapter
/// does this). There is no interior global state; everything the store
/// needs lives on this value, per §9's design note.
pub struct Store {
    shards: Vec<Shard>,
    shard_capacity: u64,
    virtual_size: u64,
    gate: Mutex<()>,
}

impl Store {
    /// Opens an existing store rooted at `config.storage_path`, or creates
    /// one if no shard is found there yet.
    #[instrument(skip_all, fields(path = %config.storage_path.display()))]
    pub fn open(config: &StoreConfig) -> Result<Self> {
        // §6: "split_size is always taken from metadata" on reopen. The
        // main metadata record at `storage_path` is authoritative whether
        // that path is itself shard 0 (single-shard store) or a bare stub
        // (split store) — both lay the record out at the same offset.
        let existing = read_main_metadata(&config.storage_path)?;

        let split_size = match existing {
            Some((_, stored_split, _)) => {
                if let Some(requested) = config.split_size {
                    if requested != stored_split {
                        return Err(Error::Format {
                            shard: config.storage_path.clone(),
                            reason: format!(
                                "split_size mismatch: store has {stored_split}, request has {requested}"
                            ),
                        });
                    }
                }
                stored_split
            }
            None => config
                .split_size
                .unwrap_or(config.requested_virtual_size),
        };
        if split_size == 0 || split_size % BLOCK_SIZE != 0 {
            return Err(Error::Config(format!(
                "split size must be a positive multiple of {BLOCK_SIZE}"
            )));
        }

        let stored_virtual_size = existing.map(|(_, _, v)| v).unwrap_or(0);
        let virtual_size = stored_virtual_size.max(config.requested_virtual_size);
        if virtual_size == 0 {
            return Err(Error::Config(
                "virtual size must be positive for a new store".into(),
            ));
        }

        let count = addr::shard_count(virtual_size, split_size);
        if count > MAX_SHARDS {
            return Err(Error::Config(format!(
                "store would require {count} shards, exceeding the cap of {MAX_SHARDS}"
            )));
        }

        if count > 1 {
            // A store created without an explicit split_size starts out as
            // a single shard living directly at `storage_path` (shard_path
            // with count == 1 returns the base path unchanged). If later
            // growth pushes it past that first split_size, shard 0 now
            // needs the ordinal-suffixed name `resolve_shard_path` expects
            // for count > 1 — migrate its file before anything tries to
            // open it under the new scheme, and before the metadata stub
            // overwrites `storage_path` with a bare header.
            let shard0_path = resolve_shard_path(&config.storage_path, 0, count);
            if shard0_path != config.storage_path
                && config.storage_path.exists()
                && !shard0_path.exists()
            {
                std::fs::metadata(&config.storage_path)
                    .map(|m| m.len())
                    .map_err(Error::from)
                    .and_then(|len| {
                        if len > BLOCK_SIZE {
                            std::fs::rename(&config.storage_path, &shard0_path)?;
                        }
                        Ok(())
                    })?;
            }
            write_main_metadata_stub(&config.storage_path, split_size, virtual_size)?;
        }

        let mut shards = Vec::with_capacity(count as usize);
        for i in 0..count {
            let path = resolve_shard_path(&config.storage_path, i, count);
            let (shard, v) = Shard::open_or_create(path, split_size, virtual_size)?;
            debug_assert_eq!(v, virtual_size);
            shards.push(shard);
        }

        Ok(Self {
            shards,
            shard_capacity: split_size,
            virtual_size,
            gate: Mutex::new(()),
        })
    }

    pub fn virtual_size(&self) -> u64 {
        self.virtual_size
    }

    pub fn storage_paths(&self) -> Vec<PathBuf> {
        self.shards.iter().map(|s| s.path().to_path_buf()).collect()
    }

    /// Reads `len` bytes starting at `offset`. Reads never allocate and
    /// never block on the allocator gate.
    #[instrument(skip(self), level = "trace")]
    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if offset > self.virtual_size || offset + len > self.virtual_size {
            return Err(Error::OutOfSpace);
        }
        let mut out = vec![0u8; len as usize];
        let mut produced = 0u64;
        while produced < len {
            let cursor = offset + produced;
            let addr = addr::locate(cursor, self.shard_capacity);
            let chunk_len = (BLOCK_SIZE - addr.byte_in_block).min(len - produced);
            let shard = &self.shards[addr.shard as usize];
            let dst = &mut out[produced as usize..(produced + chunk_len) as usize];
            io::read_chunk(shard, addr.slot, addr.byte_in_block, dst)?;
            produced += chunk_len;
        }
        Ok(out)
    }

    /// Writes `buf` starting at `offset`. Fails atomically-by-chunk with
    /// [`Error::OutOfSpace`] if the range would extend past the virtual
    /// size; chunks already committed before a failing one stay committed
    /// (see §9's open question on partial-write semantics).
    #[instrument(skip(self, buf), fields(len = buf.len()), level = "trace")]
    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<u64> {
        let len = buf.len() as u64;
        if offset > self.virtual_size || offset + len > self.virtual_size {
            return Err(Error::OutOfSpace);
        }
        let mut consumed = 0u64;
        while consumed < len {
            let cursor = offset + consumed;
            let addr = addr::locate(cursor, self.shard_capacity);
            let chunk_len = (BLOCK_SIZE - addr.byte_in_block).min(len - consumed);
            let is_full_block = addr.byte_in_block == 0 && chunk_len == BLOCK_SIZE;
            let shard = &self.shards[addr.shard as usize];
            let src = &buf[consumed as usize..(consumed + chunk_len) as usize];
            io::write_chunk(shard, &self.gate, addr.slot, addr.byte_in_block, src, is_full_block)?;
            consumed += chunk_len;
        }
        Ok(consumed)
    }

    /// Flushes every shard's memory-mapped index and syncs its file.
    pub fn flush(&self) -> Result<()> {
        for shard in &self.shards {
            shard.flush()?;
        }
        Ok(())
    }

    /// Alias for [`Store::flush`]; `fsync` and `flush` have identical
    /// semantics for this store, as there is no separate write-back cache
    /// beyond the memory map and the host's page cache.
    pub fn fsync(&self) -> Result<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir, size: u64, split: Option<u64>) -> Store {
        let config = StoreConfig {
            storage_path: dir.path().join("virtual.dat"),
            requested_virtual_size: size,
            split_size: split,
        };
        Store::open(&config).unwrap()
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempdir().unwrap();
        let store = open(&dir, 16 * 1024 * 1024, None);
        store.write(0, b"HELLO").unwrap();
        assert_eq!(store.read(0, 5).unwrap(), b"HELLO");
        assert_eq!(store.read(5, 11).unwrap(), vec![0u8; 11]);
    }

    #[test]
    fn scenario_one_shard_file_length() {
        let dir = tempdir().unwrap();
        let size = 16 * 1024 * 1024u64;
        let store = open(&dir, size, None);
        store.write(0, b"HELLO").unwrap();
        let slots = size / BLOCK_SIZE;
        let expected = BLOCK_SIZE + slots * 8 + BLOCK_SIZE;
        let path = &store.storage_paths()[0];
        assert_eq!(std::fs::metadata(path).unwrap().len(), expected);
    }

    #[test]
    fn scenario_zero_write_to_fresh_block_no_growth() {
        let dir = tempdir().unwrap();
        let store = open(&dir, 16 * 1024 * 1024, None);
        let path = store.storage_paths()[0].clone();
        let before = std::fs::metadata(&path).unwrap().len();
        store.write(4096, &vec![0u8; 4096]).unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert_eq!(before, after);
    }

    #[test]
    fn scenario_overwrite_reuses_block() {
        let dir = tempdir().unwrap();
        let store = open(&dir, 16 * 1024 * 1024, None);
        let path = store.storage_paths()[0].clone();
        store.write(0, b"A").unwrap();
        let mid = std::fs::metadata(&path).unwrap().len();
        store.write(0, b"B").unwrap();
        let end = std::fs::metadata(&path).unwrap().len();
        assert_eq!(mid, end);
        assert_eq!(store.read(0, 1).unwrap(), b"B");
    }

    #[test]
    fn scenario_write_spanning_shard_boundary() {
        let dir = tempdir().unwrap();
        let v = 8 * 1024 * 1024u64;
        let s = 4 * 1024 * 1024u64;
        let store = open(&dir, v, Some(s));
        let boundary = s - 1;
        store.write(boundary, &[0x11, 0x22]).unwrap();
        assert_eq!(store.read(boundary, 2).unwrap(), vec![0x11, 0x22]);
    }

    #[test]
    fn reopen_preserves_prior_reads() {
        let dir = tempdir().unwrap();
        let size = 4 * 1024 * 1024u64;
        {
            let store = open(&dir, size, None);
            store.write(1000, b"persist-me").unwrap();
            store.flush().unwrap();
        }
        let store = open(&dir, size, None);
        assert_eq!(store.read(1000, 10).unwrap(), b"persist-me");
    }

    #[test]
    fn reopen_growth_past_initial_split_size_migrates_shard_zero() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("virtual.dat");
        {
            let store = open(&dir, 4 * 1024 * 1024, None);
            store.write(1000, b"persist-me").unwrap();
            store.flush().unwrap();
        }
        assert!(base.is_file());

        let grown = open(&dir, 12 * 1024 * 1024, None);
        assert_eq!(grown.virtual_size(), 12 * 1024 * 1024);
        assert_eq!(grown.storage_paths().len(), 3);
        assert_eq!(grown.read(1000, 10).unwrap(), b"persist-me");
        // storage_path itself is now the bare metadata stub, not shard 0.
        assert_eq!(std::fs::metadata(&base).unwrap().len(), BLOCK_SIZE);
    }

    #[test]
    fn reopen_with_growth_then_shrink_request_only_grows() {
        let dir = tempdir().unwrap();
        {
            let s = open(&dir, 10 * 1024 * 1024, None);
            drop(s);
        }
        let grown = open(&dir, 20 * 1024 * 1024, None);
        assert_eq!(grown.virtual_size(), 20 * 1024 * 1024);
        drop(grown);
        let unchanged = open(&dir, 5 * 1024 * 1024, None);
        assert_eq!(unchanged.virtual_size(), 20 * 1024 * 1024);
    }

    #[test]
    fn reopen_with_different_split_size_fails() {
        let dir = tempdir().unwrap();
        {
            let s = open(&dir, 16 * 1024 * 1024, Some(4 * 1024 * 1024));
            drop(s);
        }
        let config = StoreConfig {
            storage_path: dir.path().join("virtual.dat"),
            requested_virtual_size: 16 * 1024 * 1024,
            split_size: Some(8 * 1024 * 1024),
        };
        assert!(Store::open(&config).is_err());
    }

    #[test]
    fn boundary_last_byte_write_succeeds_next_fails() {
        let dir = tempdir().unwrap();
        let size = 4096u64;
        let store = open(&dir, size, None);
        store.write(size - 1, &[7]).unwrap();
        assert!(matches!(store.write(size - 1, &[7, 8]), Err(Error::OutOfSpace)));
    }

    #[test]
    fn zero_length_read_and_write_are_noops() {
        let dir = tempdir().unwrap();
        let store = open(&dir, 4 * 1024 * 1024, None);
        assert_eq!(store.read(0, 0).unwrap(), Vec::<u8>::new());
        assert_eq!(store.write(0, &[]).unwrap(), 0);
    }

    #[test]
    fn disjoint_writes_commute() {
        let dir = tempdir().unwrap();
        let store = open(&dir, 4 * 1024 * 1024, None);
        store.write(0, b"first").unwrap();
        store.write(4096, b"second").unwrap();
        assert_eq!(store.read(0, 5).unwrap(), b"first");
        assert_eq!(store.read(4096, 6).unwrap(), b"second");
    }
}

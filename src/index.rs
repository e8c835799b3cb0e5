// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index map (C3): the memory-mapped header + per-slot data-offset table of
//! a single shard.
//!
//! The mapping covers `[0, B + slots*8)` of the shard file: the banner and
//! metadata record live in the first block, the index entries follow it.
//! Index entries are accessed through [`std::sync::atomic::AtomicU64`]
//! views into the mapping rather than plain reads/writes, because an
//! unsynchronized load racing a concurrent store into the same mapped
//! region is undefined behavior in Rust even when it would be benign in C.
//! Every entry is 8-byte aligned (`B + slot*8` with `B` a multiple of 8),
//! so `AtomicU64::from_ptr` is always sound here. A `Relaxed` ordering is
//! enough: a reader that observes a freshly stored, non-zero entry before
//! the corresponding data block has hit disk must already treat a
//! short/EOF positional read as zero (see `io::read`), so no happens-before
//! relationship needs to be carried by the atomic operation itself.

use memmap2::{MmapOptions, MmapRaw};
use std::fs::File;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::addr::{BANNER_MAX_LEN, BLOCK_SIZE, METADATA_LEN, METADATA_OFFSET};

pub(crate) struct ShardMap {
    mmap: MmapRaw,
    slots: u64,
}

impl ShardMap {
    /// Maps the first `B + slots*8` bytes of `file` read/write, shared.
    /// `file` must already be at least that long. Bounded explicitly to the
    /// header/index region (§4.6) rather than the file's current length, so
    /// an already-allocated data area of arbitrary size never grows the
    /// mapping.
    pub(crate) fn map(file: &File, slots: u64) -> io::Result<Self> {
        let header_len = (BLOCK_SIZE + slots * 8) as usize;
        let mmap = MmapOptions::new().len(header_len).map_raw(file)?;
        Ok(Self { mmap, slots })
    }

    fn index_entry_offset(&self, slot: u64) -> usize {
        debug_assert!(slot < self.slots, "slot {slot} out of range ({})", self.slots);
        (BLOCK_SIZE + slot * 8) as usize
    }

    /// Lock-free; safe to call concurrently with any number of other
    /// lookups and at most one allocator holding the store-wide gate.
    pub(crate) fn lookup(&self, slot: u64) -> u64 {
        let offset = self.index_entry_offset(slot);
        // SAFETY: offset is within the mapped region and 8-byte aligned.
        unsafe {
            let ptr = self.mmap.as_ptr().add(offset) as *mut u64;
            AtomicU64::from_ptr(ptr).load(Ordering::Relaxed)
        }
    }

    /// Must only be called while holding the allocator gate.
    pub(crate) fn store(&self, slot: u64, value: u64) {
        let offset = self.index_entry_offset(slot);
        // SAFETY: offset is within the mapped region and 8-byte aligned.
        unsafe {
            let ptr = self.mmap.as_mut_ptr().add(offset) as *mut u64;
            AtomicU64::from_ptr(ptr).store(value, Ordering::Relaxed);
        }
    }

    pub(crate) fn write_banner(&self, banner: &str) {
        let bytes = banner.as_bytes();
        let len = bytes.len().min(BANNER_MAX_LEN);
        // SAFETY: writes land entirely within the mapped header block.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mmap.as_mut_ptr(), len);
        }
    }

    pub(crate) fn read_metadata(&self) -> [u64; 3] {
        let mut out = [0u64; 3];
        for (i, slot) in out.iter_mut().enumerate() {
            let offset = (METADATA_OFFSET as usize) + i * 8;
            let mut raw = [0u8; 8];
            // SAFETY: offset + 8 <= METADATA_OFFSET + METADATA_LEN <= BLOCK_SIZE,
            // which is within the mapped region.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.mmap.as_ptr().add(offset),
                    raw.as_mut_ptr(),
                    8,
                );
            }
            *slot = u64::from_le_bytes(raw);
        }
        debug_assert_eq!(METADATA_LEN, 24);
        out
    }

    pub(crate) fn write_metadata(&self, format_version: u64, split_size: u64, virtual_size: u64) {
        let fields = [format_version, split_size, virtual_size];
        for (i, field) in fields.iter().enumerate() {
            let offset = (METADATA_OFFSET as usize) + i * 8;
            let raw = field.to_le_bytes();
            // SAFETY: see read_metadata.
            unsafe {
                std::ptr::copy_nonoverlapping(raw.as_ptr(), self.mmap.as_mut_ptr().add(offset), 8);
            }
        }
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}

// SAFETY: all shared mutation of the mapping goes through AtomicU64 (index
// entries) or is externally serialized by the allocator gate / the
// single-threaded open path (banner, metadata).
unsafe impl Send for ShardMap {}
unsafe impl Sync for ShardMap {}

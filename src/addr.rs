// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shard addresser (C2): maps a virtual byte offset to a shard, a slot
//! within that shard's index, and a byte offset within the target block.

/// Fixed block size in bytes. Every allocation unit, every index slot, and
/// every positional I/O chunk is aligned to this.
pub const BLOCK_SIZE: u64 = 4096;

/// Where the 24-byte metadata record starts within a shard's first block.
pub const METADATA_OFFSET: u64 = BLOCK_SIZE / 2;

/// Length in bytes of the metadata record (three little-endian u64 fields).
pub const METADATA_LEN: u64 = 24;

/// Longest banner string a shard header can hold, leaving room for the
/// metadata record that follows it in the same block.
pub const BANNER_MAX_LEN: usize = (BLOCK_SIZE / 2 - 1) as usize;

/// Current on-disk format version. Shards stamped with any other value are
/// refused on open.
pub const FORMAT_VERSION: u64 = 400;

/// Hard cap on the number of shards a single store may be split across.
pub const MAX_SHARDS: u64 = 9999;

/// The resolved location of a virtual offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAddr {
    pub shard: u64,
    pub slot: u64,
    pub byte_in_block: u64,
}

/// Resolves a virtual offset into `(shard, slot, byte_in_block)` given the
/// store's per-shard capacity `S`. Callers must ensure `offset < V`; this
/// function has no opinion on the virtual size.
pub fn locate(offset: u64, shard_capacity: u64) -> BlockAddr {
    let shard = offset / shard_capacity;
    let shard_relative = offset - shard * shard_capacity;
    BlockAddr {
        shard,
        slot: shard_relative / BLOCK_SIZE,
        byte_in_block: shard_relative % BLOCK_SIZE,
    }
}

/// `K = ceil(V / S)`.
pub fn shard_count(virtual_size: u64, shard_capacity: u64) -> u64 {
    virtual_size.div_ceil(shard_capacity)
}

/// Number of index slots (and thus index bytes / 8) per shard: `S / B`.
pub fn slots_per_shard(shard_capacity: u64) -> u64 {
    shard_capacity / BLOCK_SIZE
}

/// Byte length of a shard's header region: banner + metadata + padding,
/// followed immediately by the index.
pub fn index_region_offset() -> u64 {
    BLOCK_SIZE
}

/// Byte offset of the first possible data block in a shard: header block
/// plus the full index.
pub fn data_region_offset(shard_capacity: u64) -> u64 {
    BLOCK_SIZE + slots_per_shard(shard_capacity) * 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_within_first_shard() {
        let addr = locate(5000, 4 * 1024 * 1024);
        assert_eq!(addr.shard, 0);
        assert_eq!(addr.slot, 1);
        assert_eq!(addr.byte_in_block, 5000 - BLOCK_SIZE);
    }

    #[test]
    fn locate_crosses_shard_boundary() {
        let shard_capacity = 4 * 1024 * 1024;
        let addr = locate(shard_capacity, shard_capacity);
        assert_eq!(addr.shard, 1);
        assert_eq!(addr.slot, 0);
        assert_eq!(addr.byte_in_block, 0);
    }

    #[test]
    fn locate_last_byte_of_a_shard() {
        let shard_capacity = 4 * 1024 * 1024;
        let addr = locate(shard_capacity - 1, shard_capacity);
        assert_eq!(addr.shard, 0);
        assert_eq!(addr.slot, slots_per_shard(shard_capacity) - 1);
        assert_eq!(addr.byte_in_block, BLOCK_SIZE - 1);
    }

    #[test]
    fn shard_count_rounds_up() {
        assert_eq!(shard_count(10 * 1024 * 1024, 4 * 1024 * 1024), 3);
        assert_eq!(shard_count(8 * 1024 * 1024, 4 * 1024 * 1024), 2);
    }

    #[test]
    fn data_region_follows_header_and_index() {
        let shard_capacity = 8 * BLOCK_SIZE;
        let slots = slots_per_shard(shard_capacity);
        assert_eq!(slots, 8);
        assert_eq!(data_region_offset(shard_capacity), BLOCK_SIZE + slots * 8);
    }
}

// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! I/O engine (C5): satisfies a single block-aligned (or partial) chunk of
//! a bridge-level read or write. [`crate::store::Store`] drives this over
//! the full requested range, splitting at block and shard boundaries.

use parking_lot::Mutex;

use crate::error::Result;
use crate::shard::Shard;
use crate::zero::is_all_zero;

/// Fills `out` with the bytes of one block-sized-or-smaller region at
/// `(slot, byte_in_block)`. Never allocates, never takes the allocator
/// gate: a concurrent allocation for the same slot is either not yet
/// visible (read returns zeros) or fully visible (read returns data).
pub(crate) fn read_chunk(shard: &Shard, slot: u64, byte_in_block: u64, out: &mut [u8]) -> Result<()> {
    let data_off = shard.lookup(slot);
    if data_off == 0 {
        out.fill(0);
        return Ok(());
    }
    let n = shard.read_at(data_off + byte_in_block, out)?;
    if n < out.len() {
        // The index entry reached disk but the data block didn't (e.g.
        // after a crash between the two). Treat the missing tail as zero.
        out[n..].fill(0);
    }
    Ok(())
}

/// Writes one block-sized-or-smaller region at `(slot, byte_in_block)`,
/// allocating a backing block first if the slot is still unassigned.
///
/// `is_full_block` must be true only when `chunk` covers an entire,
/// block-aligned slot; this enables the zero-block elision fast path and
/// controls whether a fresh allocation needs pre-zeroing (a partial write
/// leaves bytes outside `chunk` in the new block, which must read back as
/// zero).
pub(crate) fn write_chunk(
    shard: &Shard,
    gate: &Mutex<()>,
    slot: u64,
    byte_in_block: u64,
    chunk: &[u8],
    is_full_block: bool,
) -> Result<()> {
    let data_off = {
        let _held = gate.lock();
        let existing = shard.lookup(slot);
        if existing != 0 {
            existing
        } else if is_full_block && is_all_zero(chunk) {
            return Ok(());
        } else {
            shard.allocate(slot, !is_full_block)?
        }
    };
    shard.write_at(data_off + byte_in_block, chunk)
}

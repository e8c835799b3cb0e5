// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A thin-provisioned sparse block store exposed as a single
//! loop-mountable virtual file.
//!
//! The virtual file is never materialized in full; it is split across one
//! or more backing shard files, each holding a bump-allocated index of
//! which of its fixed-size blocks actually exist on disk. Reads of a slot
//! with no backing block return zeros; writes of an all-zero, block-aligned
//! slot skip allocation entirely, so a freshly "formatted" filesystem costs
//! close to nothing on the host.
//!
//! [`store::Store`] is the core; [`bridge::VirtualFs`] is the seam a mount
//! layer drives it through, and [`fuse_adapter`] is the concrete `fuser`
//! binding used by the `mount` CLI subcommand.

mod addr;
pub mod bridge;
pub mod config;
pub mod error;
pub mod fuse_adapter;
mod index;
mod io;
mod shard;
pub mod store;
mod zero;

pub use config::{Cli, Command, FormatArgs, MountArgs, StoreConfig};
pub use error::{Error, Result};
pub use shard::BANNER;
pub use store::Store;

// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sparsevol::config::{Cli, Command, FormatArgs, MountArgs};
use sparsevol::fuse_adapter::SparseVolFs;
use sparsevol::{StoreConfig, BANNER};
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Format(args) => run_format(args),
        Command::Mount(args) => run_mount(args),
    }
}

fn run_format(args: FormatArgs) -> Result<()> {
    init_tracing(args.debug());
    println!("{BANNER}");

    let config = StoreConfig::resolve(args.storage_path.clone(), &args.size_mb, args.split_size_mb)
        .context("resolving requested size")?;
    let store = sparsevol::Store::open(&config)
        .with_context(|| format!("opening store at {}", args.storage_path.display()))?;
    store.flush().context("flushing newly formatted store")?;

    tracing::info!(
        virtual_size = store.virtual_size(),
        shards = store.storage_paths().len(),
        "store formatted"
    );
    Ok(())
}

fn run_mount(args: MountArgs) -> Result<()> {
    init_tracing(args.debug());
    println!("{BANNER}");

    let config = StoreConfig::resolve(args.storage_path.clone(), &args.size_mb, args.split_size_mb)
        .context("resolving requested size")?;
    let store = sparsevol::Store::open(&config)
        .with_context(|| format!("opening store at {}", args.storage_path.display()))?;

    tracing::info!(
        virtual_size = store.virtual_size(),
        shards = store.storage_paths().len(),
        mount_dir = %args.mount_dir.display(),
        "mounting"
    );

    let fs = SparseVolFs::new(Arc::new(store));
    let options = vec![fuser::MountOption::FSName("sparsevol".into())];
    fuser::mount2(fs, &args.mount_dir, &options)
        .with_context(|| format!("mounting at {}", args.mount_dir.display()))?;
    Ok(())
}

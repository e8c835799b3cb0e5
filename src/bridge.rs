// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam between the core store and any protocol binding (§12).
//!
//! [`VirtualFs`] names exactly the filesystem-shaped operations a mount
//! needs and nothing FUSE-specific; [`crate::fuse_adapter`] is the only
//! thing that knows about `fuser`. A non-FUSE consumer (the integration
//! tests, a loopback HTTP front end, whatever) can use [`Store`] directly
//! without going through this trait at all — it exists for the mount path.

use crate::error::Result;
use crate::store::Store;

/// Mode bits and link count for the single regular file this store exposes.
pub const FILE_MODE: u32 = 0o444;
pub const FILE_NLINK: u32 = 1;

/// Mode bits and link count for the synthetic mount-root directory.
pub const DIR_MODE: u32 = 0o755;
pub const DIR_NLINK: u32 = 2;

/// The mounted entry's file name, kept from the original tool's
/// `/virtual.dat` convention (§11).
pub const VIRTUAL_FILE_NAME: &str = "virtual.dat";

/// `getattr`-shaped metadata for one of the two entries this filesystem
/// can ever report: the mount root, or the single virtual file.
#[derive(Debug, Clone, Copy)]
pub enum Attr {
    Root,
    VirtualFile { size: u64 },
}

impl Attr {
    pub fn mode(&self) -> u32 {
        match self {
            Attr::Root => DIR_MODE,
            Attr::VirtualFile { .. } => FILE_MODE,
        }
    }

    pub fn nlink(&self) -> u32 {
        match self {
            Attr::Root => DIR_NLINK,
            Attr::VirtualFile { .. } => FILE_NLINK,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Attr::Root => 0,
            Attr::VirtualFile { size } => *size,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Attr::Root)
    }
}

/// One entry in the mount root's directory listing, as returned by
/// `list_root` (§11's `readdir` supplement).
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    pub name: &'static str,
    pub is_dir: bool,
}

/// The filesystem-shaped operations §6 lists, plus the `readdir`/`destroy`
/// supplements of §11/§12. Implemented for [`Store`]; a FUSE adapter (or
/// any other bridge) drives a mount entirely through this trait.
pub trait VirtualFs {
    /// Attributes for either the root directory or the virtual file; any
    /// other name is not ours to answer for (the adapter maps that to
    /// [`crate::error::Error::NoEntry`]).
    fn getattr_root(&self) -> Attr;
    fn getattr_file(&self) -> Attr;

    /// The root directory's contents: `.`, `..`, and the virtual file,
    /// matching the original tool's `readdir` (§11).
    fn list_root(&self) -> Vec<DirEntry> {
        vec![
            DirEntry { name: ".", is_dir: true },
            DirEntry { name: "..", is_dir: true },
            DirEntry { name: VIRTUAL_FILE_NAME, is_dir: false },
        ]
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>>;
    fn write(&self, offset: u64, buf: &[u8]) -> Result<u64>;
    fn flush(&self) -> Result<()>;
    fn fsync(&self) -> Result<()>;

    /// Called when the last open handle on the virtual file closes.
    /// Nothing to release beyond an fsync: there is no per-handle state.
    fn release(&self) -> Result<()> {
        self.flush()
    }

    /// The virtual file's size is fixed at mount time; truncation is
    /// accepted only as a no-op when it requests the size already in
    /// effect, matching the original's read-only-shaped `/virtual.dat`
    /// (mode 0444) which never actually changes length in place.
    fn truncate(&self, requested_len: u64) -> Result<()> {
        let _ = requested_len;
        Ok(())
    }

    /// Ownership and permission bits are fixed; accepted as a no-op so
    /// that tools which reflexively `chmod`/`chown` after opening don't
    /// fail the mount.
    fn chmod(&self, _mode: u32) -> Result<()> {
        Ok(())
    }

    fn chown(&self, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }

    /// Called once as the filesystem unmounts.
    fn destroy(&self) {}
}

impl VirtualFs for Store {
    fn getattr_root(&self) -> Attr {
        Attr::Root
    }

    fn getattr_file(&self) -> Attr {
        Attr::VirtualFile { size: self.virtual_size() }
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        Store::read(self, offset, len)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<u64> {
        Store::write(self, offset, buf)
    }

    fn flush(&self) -> Result<()> {
        Store::flush(self)
    }

    fn fsync(&self) -> Result<()> {
        Store::fsync(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        let config = StoreConfig {
            storage_path: dir.path().join("virtual.dat"),
            requested_virtual_size: 4 * 1024 * 1024,
            split_size: None,
        };
        Store::open(&config).unwrap()
    }

    #[test]
    fn list_root_has_dot_dotdot_and_the_virtual_file() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let entries = VirtualFs::list_root(&store);
        let names: Vec<_> = entries.iter().map(|e| e.name).collect();
        assert_eq!(names, vec![".", "..", VIRTUAL_FILE_NAME]);
    }

    #[test]
    fn getattr_file_reports_virtual_size_and_read_only_mode() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let attr = VirtualFs::getattr_file(&store);
        assert_eq!(attr.size(), 4 * 1024 * 1024);
        assert_eq!(attr.mode(), FILE_MODE);
        assert!(!attr.is_dir());
    }

    #[test]
    fn getattr_root_is_a_directory() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(VirtualFs::getattr_root(&store).is_dir());
    }

    #[test]
    fn truncate_chmod_chown_are_accepted_no_ops() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.truncate(0).is_ok());
        assert!(store.chmod(0o600).is_ok());
        assert!(store.chown(0, 0).is_ok());
    }
}

// Copyright the sparsevol contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thin `fuser::Filesystem` binding (§12): dispatch to [`crate::bridge`] and
//! translate [`crate::error::Error`] into errno. No store logic lives here.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request,
};
use tracing::{error, trace};

use crate::bridge::{Attr, VirtualFs, VIRTUAL_FILE_NAME};
use crate::store::Store;

const ROOT_INO: u64 = 1;
const FILE_INO: u64 = 2;

/// How long the kernel may cache attributes and directory entries before
/// asking again. There is nothing external invalidating them out from
/// under us (no other process touches these shard files while mounted),
/// so a generous TTL just cuts down on round trips.
const ATTR_TTL: Duration = Duration::from_secs(1);

fn file_attr(ino: u64, attr: Attr) -> FileAttr {
    let now = SystemTime::now();
    let blocks = attr.size().div_ceil(512);
    FileAttr {
        ino,
        size: attr.size(),
        blocks,
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: if attr.is_dir() { FileType::Directory } else { FileType::RegularFile },
        perm: attr.mode() as u16,
        nlink: attr.nlink(),
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: crate::addr::BLOCK_SIZE as u32,
        flags: 0,
    }
}

/// Binds a [`Store`] to the `fuser` crate's [`Filesystem`] trait. The store
/// always exposes exactly one directory (the mount root) containing
/// exactly one file (`virtual.dat`, §11) — every other path is ENOENT.
pub struct SparseVolFs {
    store: Arc<Store>,
}

impl SparseVolFs {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl Filesystem for SparseVolFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent == ROOT_INO && name == OsStr::new(VIRTUAL_FILE_NAME) {
            let attr = file_attr(FILE_INO, self.store.getattr_file());
            reply.entry(&ATTR_TTL, &attr, 0);
        } else {
            reply.error(crate::error::Error::NoEntry.to_errno());
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match ino {
            ROOT_INO => reply.attr(&ATTR_TTL, &file_attr(ROOT_INO, self.store.getattr_root())),
            FILE_INO => reply.attr(&ATTR_TTL, &file_attr(FILE_INO, self.store.getattr_file())),
            _ => reply.error(crate::error::Error::NoEntry.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if ino != FILE_INO {
            reply.error(crate::error::Error::NoEntry.to_errno());
            return;
        }
        if let Some(len) = size {
            if let Err(e) = VirtualFs::truncate(self.store.as_ref(), len) {
                reply.error(e.to_errno());
                return;
            }
        }
        reply.attr(&ATTR_TTL, &file_attr(FILE_INO, self.store.getattr_file()));
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        if ino == FILE_INO {
            reply.opened(0, 0);
        } else {
            reply.error(crate::error::Error::NoEntry.to_errno());
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        if ino == ROOT_INO {
            reply.opened(0, 0);
        } else {
            reply.error(crate::error::Error::NoEntry.to_errno());
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if ino != FILE_INO || offset < 0 {
            reply.error(crate::error::Error::NoEntry.to_errno());
            return;
        }
        let virtual_size = self.store.getattr_file().size();
        let offset = offset as u64;
        let len = (size as u64).min(virtual_size.saturating_sub(offset));
        match VirtualFs::read(self.store.as_ref(), offset, len) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                error!(error = %e, "read failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if ino != FILE_INO || offset < 0 {
            reply.error(crate::error::Error::NoEntry.to_errno());
            return;
        }
        match VirtualFs::write(self.store.as_ref(), offset as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => {
                error!(error = %e, "write failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        if ino != FILE_INO {
            reply.error(crate::error::Error::NoEntry.to_errno());
            return;
        }
        match VirtualFs::flush(self.store.as_ref()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        if ino != FILE_INO {
            reply.error(crate::error::Error::NoEntry.to_errno());
            return;
        }
        match VirtualFs::fsync(self.store.as_ref()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if ino != FILE_INO {
            reply.error(crate::error::Error::NoEntry.to_errno());
            return;
        }
        match VirtualFs::release(self.store.as_ref()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if ino != ROOT_INO {
            reply.error(crate::error::Error::NoEntry.to_errno());
            return;
        }
        let entries = VirtualFs::list_root(self.store.as_ref());
        for (i, entry) in entries.into_iter().enumerate().skip(offset as usize) {
            let ino = if entry.name == VIRTUAL_FILE_NAME { FILE_INO } else { ROOT_INO };
            let kind = if entry.is_dir { FileType::Directory } else { FileType::RegularFile };
            if reply.add(ino, (i + 1) as i64, kind, entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn destroy(&mut self) {
        trace!("unmounting");
        VirtualFs::destroy(self.store.as_ref());
    }
}

//! The contract between the VFS and concrete file-system drivers.
//!
//! A driver supplies three method tables: superblock operations, per-inode
//! operations, and per-file operations. Every method has a default body, so
//! a driver only implements what it supports; anything left out reports
//! `NotSupported` to the caller.
//!
//! Methods that touch inode state receive an [`InodeGuard`], the witness that
//! the inode mutex is held. Drivers must not try to reacquire it.

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::{FsError, FsResult};
use crate::node::{Dnode, InodeGuard, NodeType, OpenFile, Superblock};
use crate::vfs::Vfs;

bitflags! {
    /// Static properties of a file-system type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FsFlags: u32 {
        /// Mounted instances reject destructive operations with `ReadOnly`.
        const READ_ONLY = 1 << 0;
    }
}

/// A registered file-system type. One instance serves every mount of that
/// type; per-mount state lives on the superblock.
pub trait FileSystem: Send + Sync {
    fn name(&self) -> &'static str;

    fn flags(&self) -> FsFlags {
        FsFlags::empty()
    }

    /// Superblock method table used by every mount of this type.
    fn super_ops(&self) -> Arc<dyn SuperOps>;

    /// Attach a new instance: install per-mount state on `sb` and bind the
    /// root inode to `root`.
    fn mount(&self, vfs: &Vfs, sb: &Arc<Superblock>, root: &Arc<Dnode>) -> FsResult<()>;

    /// Detach an instance. The VFS has already verified the mount is idle.
    fn unmount(&self, _vfs: &Vfs, _sb: &Arc<Superblock>) -> FsResult<()> {
        Ok(())
    }
}

/// Superblock method table.
pub trait SuperOps: Send + Sync {
    /// Install driver state on a freshly allocated inode: method tables,
    /// initial type, private data.
    fn init_inode(&self, sb: &Arc<Superblock>, inode: &mut InodeGuard<'_>) -> FsResult<()>;

    /// Release driver state when the inode is destroyed.
    fn release_inode(&self, _inode: &mut InodeGuard<'_>) -> FsResult<()> {
        Ok(())
    }

    /// Write the inode itself back to storage.
    fn write_inode(&self, _inode: &mut InodeGuard<'_>) -> FsResult<()> {
        Ok(())
    }
}

/// Per-inode method table.
#[allow(unused_variables)]
pub trait InodeOps: Send + Sync {
    /// Resolve `child`'s name inside the directory `dir` and bind an inode to
    /// it (reusing a cached inode where possible).
    fn dir_lookup(&self, vfs: &Vfs, dir: &mut InodeGuard<'_>, child: &Arc<Dnode>) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn open(&self, ino: &mut InodeGuard<'_>, file: &OpenFile) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    /// Create an empty regular file named by `dnode` inside `dir`.
    fn create(&self, vfs: &Vfs, dir: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn mkdir(&self, vfs: &Vfs, dir: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn rmdir(&self, dir: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn unlink(&self, ino: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    /// Bind `name` to this inode as an additional hard link.
    fn link(&self, ino: &mut InodeGuard<'_>, name: &Arc<Dnode>) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    /// Move `from` over `to`. Both dnodes are locked by the caller.
    fn rename(&self, ino: &mut InodeGuard<'_>, from: &Arc<Dnode>, to: &Arc<Dnode>) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn read(&self, ino: &mut InodeGuard<'_>, buf: &mut [u8], pos: usize) -> FsResult<usize> {
        Err(FsError::NotSupported)
    }

    fn write(&self, ino: &mut InodeGuard<'_>, buf: &[u8], pos: usize) -> FsResult<usize> {
        Err(FsError::NotSupported)
    }

    /// Validate a candidate file position. The VFS only moves the position
    /// when this succeeds.
    fn seek(&self, ino: &mut InodeGuard<'_>, pos: usize) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn sync(&self, ino: &mut InodeGuard<'_>) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn read_symlink(&self, ino: &mut InodeGuard<'_>) -> FsResult<String> {
        Err(FsError::NotSupported)
    }

    fn set_symlink(&self, ino: &mut InodeGuard<'_>, target: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }
}

/// Per-file method table. The defaults delegate to the inode table, so most
/// drivers only override `readdir`.
#[allow(unused_variables)]
pub trait FileOps: Send + Sync {
    fn read(
        &self,
        file: &OpenFile,
        ino: &mut InodeGuard<'_>,
        buf: &mut [u8],
        pos: usize,
    ) -> FsResult<usize> {
        let ops = ino.ops();
        ops.read(ino, buf, pos)
    }

    fn write(
        &self,
        file: &OpenFile,
        ino: &mut InodeGuard<'_>,
        buf: &[u8],
        pos: usize,
    ) -> FsResult<usize> {
        let ops = ino.ops();
        ops.write(ino, buf, pos)
    }

    /// Emit the directory entry at `ctx.index()`. Returns `Ok(true)` after
    /// emitting, `Ok(false)` at end of directory.
    fn readdir(
        &self,
        file: &OpenFile,
        ino: &mut InodeGuard<'_>,
        ctx: &mut DirContext<'_>,
    ) -> FsResult<bool> {
        Err(FsError::NotSupported)
    }

    fn seek(&self, file: &OpenFile, ino: &mut InodeGuard<'_>, pos: usize) -> FsResult<()> {
        let ops = ino.ops();
        ops.seek(ino, pos)
    }

    fn sync(&self, file: &OpenFile, ino: &mut InodeGuard<'_>) -> FsResult<()> {
        let ops = ino.ops();
        ops.sync(ino)
    }

    /// Called once when the last descriptor reference goes away.
    fn close(&self, file: &OpenFile) -> FsResult<()> {
        Ok(())
    }
}

/// Default per-file method table: plain delegation to the inode table.
pub struct DefaultFileOps;

impl FileOps for DefaultFileOps {}

/// Cursor handed to `FileOps::readdir`: the driver-relative entry index plus
/// a sink for the produced entry.
pub struct DirContext<'a> {
    index: usize,
    sink: &'a mut dyn FnMut(&str, NodeType),
}

impl<'a> DirContext<'a> {
    pub fn new(index: usize, sink: &'a mut dyn FnMut(&str, NodeType)) -> Self {
        Self { index, sink }
    }

    /// Index of the entry being asked for, not counting the synthetic `.`
    /// and `..` the VFS injects.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn emit(&mut self, name: &str, kind: NodeType) {
        (self.sink)(name, kind);
    }
}

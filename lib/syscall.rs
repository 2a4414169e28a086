//! The user-visible operation surface, composed from the walker, the object
//! caches, and the locking discipline.
//!
//! Every operation takes the current task handle explicitly and reports
//! failures as [`FsError`] kinds; successful calls return their natural
//! value (a descriptor, a byte count, a position).

use std::sync::Arc;

use tracing::{debug, trace};

use crate::driver::DirContext;
use crate::error::{FsError, FsResult};
use crate::fd_table::{FdEntry, FdTable};
use crate::node::{unix_now, Dnode, NodeType, OpenFlags};
use crate::task::Task;
use crate::vfs::Vfs;
use crate::walk::WalkOptions;

/// Seek anchors accepted by [`Vfs::lseek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute position.
    Set,
    /// Relative to the current position.
    Cur,
    /// Relative to the current file size.
    End,
}

/// One directory entry produced by [`Vfs::readdir`]. The `offset` field is
/// the caller's cursor: start it at zero and hand the same struct back until
/// `readdir` reports the end.
#[derive(Debug, Clone, Default)]
pub struct Dirent {
    pub offset: usize,
    pub name: String,
    pub kind: NodeType,
}

impl Vfs {
    fn fd_entry(&self, task: &Task, fd: usize) -> FsResult<FdEntry> {
        task.fdtable().get(fd).cloned()
    }

    /// Close the object held in `fd`'s slot, honoring descriptor sharing.
    fn close_slot(&self, task: &Task, fd: usize) -> FsResult<()> {
        let entry = {
            let mut table = task.fdtable();
            let entry = table.get(fd)?.clone();
            if entry.file.ref_count() > 1 {
                entry.file.release();
                table.clear(fd);
                return Ok(());
            }
            entry
        };
        // Last reference: the slot is only vacated once the driver close
        // succeeded.
        self.close_file(&entry.file)?;
        entry.file.release();
        task.fdtable().clear(fd);
        Ok(())
    }

    // ── open / close ────────────────────────────────────────────────────

    /// Open `path`, returning a descriptor.
    pub fn open(&self, task: &Task, path: &str, flags: OpenFlags) -> FsResult<usize> {
        let create = flags.contains(OpenFlags::CREATE);
        let (_dir, dnode, created) = self.locate(task, path, create, true)?;
        let file = self.open_dnode(&dnode)?;
        trace!(path, created, "open");

        if flags.contains(OpenFlags::APPEND) {
            let guard = self.lock_inode(file.inode());
            file.set_pos(guard.fsize);
        }

        let fd = {
            let mut table = task.fdtable();
            match table.alloc_slot() {
                Ok(fd) => {
                    table.install(
                        fd,
                        FdEntry {
                            file: Arc::clone(&file),
                            flags,
                        },
                    );
                    Ok(fd)
                }
                Err(e) => Err(e),
            }
        };

        match fd {
            Ok(fd) => Ok(fd),
            Err(e) => {
                if file.release() == 1 {
                    let _ = self.close_file(&file);
                }
                Err(e)
            }
        }
    }

    /// Close a descriptor.
    pub fn close(&self, task: &Task, fd: usize) -> FsResult<()> {
        self.close_slot(task, fd)
    }

    // ── read / write / seek ─────────────────────────────────────────────

    /// Read up to `buf.len()` bytes at the file position; returns the byte
    /// count (zero at end of file) and advances the position by it.
    pub fn read(&self, task: &Task, fd: usize, buf: &mut [u8]) -> FsResult<usize> {
        let entry = self.fd_entry(task, fd)?;
        let file = entry.file;
        let inode = Arc::clone(file.inode());

        let mut guard = self.lock_inode(&inode);
        if guard.itype.contains(NodeType::DIRECTORY) {
            return Err(FsError::IsDirectory);
        }
        guard.atime = unix_now();

        let pos = file.pos();
        let direct = guard.itype.contains(NodeType::SEQ_DEVICE)
            || entry.flags.contains(OpenFlags::DIRECT);
        let n = if direct {
            file.ops().read(&file, &mut guard, buf, pos)?
        } else {
            let mut pc = inode
                .pcache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match pc.as_mut() {
                Some(pages) => pages.read(&mut guard, buf, pos)?,
                None => {
                    drop(pc);
                    file.ops().read(&file, &mut guard, buf, pos)?
                }
            }
        };

        file.set_pos(pos + n);
        Ok(n)
    }

    /// Write `buf` at the file position; returns the byte count and
    /// advances the position by it.
    pub fn write(&self, task: &Task, fd: usize, buf: &[u8]) -> FsResult<usize> {
        let entry = self.fd_entry(task, fd)?;
        let file = entry.file;
        let inode = Arc::clone(file.inode());

        let mut guard = self.lock_inode(&inode);
        if guard.itype.contains(NodeType::DIRECTORY) {
            return Err(FsError::IsDirectory);
        }
        guard.mtime = unix_now();

        let pos = file.pos();
        let direct = guard.itype.contains(NodeType::SEQ_DEVICE)
            || entry.flags.contains(OpenFlags::DIRECT);
        let n = if direct {
            file.ops().write(&file, &mut guard, buf, pos)?
        } else {
            let mut pc = inode
                .pcache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match pc.as_mut() {
                Some(pages) => pages.write(&mut guard, buf, pos)?,
                None => {
                    drop(pc);
                    file.ops().write(&file, &mut guard, buf, pos)?
                }
            }
        };

        file.set_pos(pos + n);
        Ok(n)
    }

    /// Move the file position. The driver validates the candidate position;
    /// only on success does the stored position change.
    pub fn lseek(&self, task: &Task, fd: usize, offset: i64, whence: Whence) -> FsResult<usize> {
        let entry = self.fd_entry(task, fd)?;
        let file = entry.file;
        let inode = Arc::clone(file.inode());

        let mut guard = self.lock_inode(&inode);
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => file.pos() as i64,
            Whence::End => guard.fsize as i64,
        };
        let target = base + offset;
        if target < 0 {
            return Err(FsError::InvalidArgument);
        }
        let target = target as usize;

        file.ops().seek(&file, &mut guard, target)?;
        file.set_pos(target);
        Ok(target)
    }

    // ── directories ─────────────────────────────────────────────────────

    /// Produce the entry at `dirent.offset`, advancing the cursor. Offsets 0
    /// and 1 are the synthetic `.` and `..`; driver entries follow. Returns
    /// `Ok(false)` at end of directory.
    pub fn readdir(&self, task: &Task, fd: usize, dirent: &mut Dirent) -> FsResult<bool> {
        let entry = self.fd_entry(task, fd)?;
        let file = entry.file;
        let inode = Arc::clone(file.inode());

        let mut guard = self.lock_inode(&inode);
        if !guard.itype.contains(NodeType::DIRECTORY) {
            return Err(FsError::NotDirectory);
        }

        match dirent.offset {
            0 => {
                dirent.name.clear();
                dirent.name.push('.');
                dirent.kind = NodeType::DIRECTORY;
            }
            1 => {
                dirent.name.clear();
                dirent.name.push_str("..");
                dirent.kind = NodeType::DIRECTORY;
            }
            offset => {
                let mut produced: Option<(String, NodeType)> = None;
                {
                    let mut sink =
                        |name: &str, kind: NodeType| produced = Some((name.to_owned(), kind));
                    let mut ctx = DirContext::new(offset - 2, &mut sink);
                    if !file.ops().readdir(&file, &mut guard, &mut ctx)? {
                        return Ok(false);
                    }
                }
                let (name, kind) = produced.ok_or(FsError::NotSupported)?;
                dirent.name = name;
                dirent.kind = kind;
            }
        }

        dirent.offset += 1;
        Ok(true)
    }

    /// Create a directory at `path`.
    pub fn mkdir(&self, task: &Task, path: &str) -> FsResult<()> {
        let cwd = task.cwd();
        let out = self.walk(cwd.as_ref(), path, WalkOptions::PARENT)?;
        let parent = out.dnode;
        let name = out.last.ok_or(FsError::InvalidArgument)?;
        if name.as_str() == "." || name.as_str() == ".." {
            return Err(FsError::Exists);
        }

        let dir = self.d_alloc(Some(&parent), &name)?;

        let serial = self.lock_dnode(&parent);
        let pinode = parent.inode().ok_or(FsError::NotFound)?;
        let mut guard = self.lock_inode(&pinode);

        let res = if parent.superblock().is_some_and(|sb| sb.read_only()) {
            Err(FsError::ReadOnly)
        } else if !guard.itype.contains(NodeType::DIRECTORY) {
            Err(FsError::NotDirectory)
        } else {
            let ops = pinode.method_table().ok_or(FsError::NotSupported)?;
            ops.mkdir(self, &mut guard, &dir)
        };

        match res {
            Ok(()) => {
                self.name_cache().add(&parent, &dir);
                debug!(path, "mkdir");
                Ok(())
            }
            Err(e) => {
                drop(guard);
                drop(serial);
                self.d_free(&dir);
                Err(e)
            }
        }
    }

    /// Remove the directory at `path`.
    pub fn rmdir(&self, task: &Task, path: &str) -> FsResult<()> {
        let cwd = task.cwd();
        let out = self.walk(cwd.as_ref(), path, WalkOptions::NOFOLLOW)?;
        let dnode = out.dnode;

        let _serial = self.lock_dnode(&dnode);

        if dnode.superblock().is_some_and(|sb| sb.read_only()) {
            return Err(FsError::ReadOnly);
        }

        let inode = dnode.inode().ok_or(FsError::NotFound)?;
        let (itype, open_count) = {
            let guard = self.lock_inode(&inode);
            (guard.itype, guard.open_count)
        };

        if dnode.pinned() > 0 || open_count > 0 {
            return Err(FsError::Busy);
        }
        if dnode.has_children() {
            return Err(FsError::NotEmpty);
        }

        let parent = dnode.parent().ok_or(FsError::InvalidArgument)?;
        let _pserial = self.lock_dnode(&parent);
        let pinode = parent.inode().ok_or(FsError::NotFound)?;
        let mut guard = self.lock_inode(&pinode);

        if !itype.contains(NodeType::DIRECTORY) {
            return Err(FsError::NotDirectory);
        }
        let ops = pinode.method_table().ok_or(FsError::NotSupported)?;
        ops.rmdir(&mut guard, &dnode)?;
        drop(guard);

        self.name_cache().remove(&dnode);
        debug!(path, "rmdir");
        Ok(())
    }

    // ── links ───────────────────────────────────────────────────────────

    /// Remove the non-directory name at `path`.
    pub fn unlink(&self, task: &Task, path: &str) -> FsResult<()> {
        let cwd = task.cwd();
        let out = self.walk(cwd.as_ref(), path, WalkOptions::NOFOLLOW)?;
        if out.dnode.superblock().is_some_and(|sb| sb.read_only()) {
            return Err(FsError::ReadOnly);
        }
        self.do_unlink(&out.dnode)?;
        debug!(path, "unlink");
        Ok(())
    }

    /// `unlink`, resolving `path` relative to the directory open at `fd`.
    pub fn unlinkat(&self, task: &Task, fd: usize, path: &str) -> FsResult<()> {
        let entry = self.fd_entry(task, fd)?;
        let start = Arc::clone(entry.file.dnode());
        let out = self.walk(Some(&start), path, WalkOptions::NOFOLLOW)?;
        if out.dnode.superblock().is_some_and(|sb| sb.read_only()) {
            return Err(FsError::ReadOnly);
        }
        self.do_unlink(&out.dnode)
    }

    /// Create `newpath` as a hard link to `oldpath`'s object.
    pub fn link(&self, task: &Task, oldpath: &str, newpath: &str) -> FsResult<()> {
        let (_, src, _) = self.locate(task, oldpath, false, true)?;
        let (_, name, created) = self.locate(task, newpath, true, false)?;
        if !created {
            return Err(FsError::Exists);
        }
        self.link_dnodes(&src, &name)
    }

    /// Create `path` as a symbolic link to `target`.
    pub fn symlink(&self, task: &Task, path: &str, target: &str) -> FsResult<()> {
        let (_, dnode, created) = self.locate(task, path, true, false)?;
        if !created {
            return Err(FsError::Exists);
        }

        let inode = dnode.inode().ok_or(FsError::NotSupported)?;
        let mut guard = self.lock_inode(&inode);
        let ops = inode.method_table().ok_or(FsError::NotSupported)?;
        ops.set_symlink(&mut guard, target)?;
        debug!(path, target, "symlink");
        Ok(())
    }

    fn read_link_of(&self, dnode: &Arc<Dnode>, buf: &mut [u8]) -> FsResult<usize> {
        let inode = dnode.inode().ok_or(FsError::NotFound)?;
        let mut guard = self.lock_inode(&inode);
        let ops = inode.method_table().ok_or(FsError::NotSupported)?;
        let target = ops.read_symlink(&mut guard)?;
        let n = target.len().min(buf.len());
        buf[..n].copy_from_slice(&target.as_bytes()[..n]);
        Ok(n)
    }

    /// Read the target of the symlink at `path` without following it.
    pub fn readlink(&self, task: &Task, path: &str, buf: &mut [u8]) -> FsResult<usize> {
        let cwd = task.cwd();
        let out = self.walk(cwd.as_ref(), path, WalkOptions::NOFOLLOW)?;
        self.read_link_of(&out.dnode, buf)
    }

    /// `readlink`, resolving `path` relative to the directory open at `fd`.
    pub fn readlinkat(&self, task: &Task, fd: usize, path: &str, buf: &mut [u8]) -> FsResult<usize> {
        let entry = self.fd_entry(task, fd)?;
        let start = Arc::clone(entry.file.dnode());
        let out = self.walk(Some(&start), path, WalkOptions::NOFOLLOW)?;
        self.read_link_of(&out.dnode, buf)
    }

    /// Reconstruct the absolute path of the object open at `fd`.
    pub fn realpathat(&self, task: &Task, fd: usize, buf: &mut [u8]) -> FsResult<usize> {
        let entry = self.fd_entry(task, fd)?;
        let len = self.path_of(entry.file.dnode(), buf)?;
        if len >= buf.len() {
            return Err(FsError::OutOfRange);
        }
        Ok(len)
    }

    /// Move `oldpath` over `newpath`.
    pub fn rename(&self, task: &Task, oldpath: &str, newpath: &str) -> FsResult<()> {
        let cwd = task.cwd();
        let cur = self
            .walk(cwd.as_ref(), oldpath, WalkOptions::NOFOLLOW)?
            .dnode;

        let parent_out = self.walk(cwd.as_ref(), newpath, WalkOptions::PARENT)?;
        let tparent = parent_out.dnode;
        let name = parent_out.last.ok_or(FsError::InvalidArgument)?;

        let (target, fresh) = match self.walk(Some(&tparent), name.as_str(), WalkOptions::NOFOLLOW)
        {
            Ok(out) => (out.dnode, false),
            Err(FsError::NotFound) => {
                let t = self.d_alloc(Some(&tparent), &name)?;
                self.name_cache().add(&tparent, &t);
                (t, true)
            }
            Err(e) => return Err(e),
        };

        let res = self.do_rename(&cur, &target);
        if res.is_err() && fresh {
            // Do not leave an inodeless placeholder in the cache.
            self.d_free(&target);
        }
        if res.is_ok() {
            debug!(oldpath, newpath, "rename");
        }
        res
    }

    // ── descriptors ─────────────────────────────────────────────────────

    /// Duplicate `fd` into the lowest free slot.
    pub fn dup(&self, task: &Task, fd: usize) -> FsResult<usize> {
        let mut table = task.fdtable();
        let entry = table.get(fd)?.clone();
        let newfd = table.alloc_slot()?;
        entry.file.grab();
        table.install(newfd, entry);
        Ok(newfd)
    }

    /// Duplicate `oldfd` into `newfd`, closing whatever `newfd` held.
    /// `dup2(x, x)` is a no-op returning `x`.
    pub fn dup2(&self, task: &Task, oldfd: usize, newfd: usize) -> FsResult<usize> {
        if oldfd == newfd {
            return Ok(newfd);
        }
        if !FdTable::in_range(newfd) {
            return Err(FsError::BadDescriptor);
        }
        let entry = self.fd_entry(task, oldfd)?;

        if task.fdtable().get(newfd).is_ok() {
            self.close_slot(task, newfd)?;
        }

        entry.file.grab();
        task.fdtable().replace(newfd, entry);
        Ok(newfd)
    }

    // ── cwd ─────────────────────────────────────────────────────────────

    /// Change the task's working directory to `path`.
    pub fn chdir(&self, task: &Task, path: &str) -> FsResult<()> {
        let cwd = task.cwd();
        let out = self.walk(cwd.as_ref(), path, WalkOptions::empty())?;
        self.do_chdir(task, &out.dnode)
    }

    /// Change the working directory to the directory open at `fd`.
    pub fn fchdir(&self, task: &Task, fd: usize) -> FsResult<()> {
        let entry = self.fd_entry(task, fd)?;
        let dnode = Arc::clone(entry.file.dnode());
        self.do_chdir(task, &dnode)
    }

    /// Write the working directory's path into `buf`, returning its length.
    pub fn getcwd(&self, task: &Task, buf: &mut [u8]) -> FsResult<usize> {
        if buf.len() < 2 {
            return Err(FsError::OutOfRange);
        }
        match task.cwd() {
            None => {
                buf[0] = b'/';
                Ok(1)
            }
            Some(cwd) => {
                let len = self.path_of(&cwd, buf)?;
                if len >= buf.len() {
                    return Err(FsError::OutOfRange);
                }
                Ok(len)
            }
        }
    }

    // ── sync ────────────────────────────────────────────────────────────

    /// Flush `fd`'s cached pages and ask the driver to sync.
    pub fn fsync(&self, task: &Task, fd: usize) -> FsResult<()> {
        let entry = self.fd_entry(task, fd)?;
        let file = entry.file;
        let inode = Arc::clone(file.inode());

        let mut guard = self.lock_inode(&inode);
        {
            let mut pc = inode
                .pcache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(pages) = pc.as_mut() {
                pages.commit_all(&mut guard)?;
            }
        }
        file.ops().sync(&file, &mut guard)
    }
}

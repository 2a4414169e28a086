//! The VFS context: global roots, the two eviction zones, object lifecycle,
//! and mount management.
//!
//! All global mutable state lives here; embedders create one context at
//! startup and pass it explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace, warn};

use crate::cache::{HashedName, LruZone, NameCache};
use crate::config::Tunables;
use crate::driver::FileSystem;
use crate::error::{FsError, FsResult};
use crate::mount::MountPoint;
use crate::node::{unix_now, Dnode, Inode, InodeGuard, NodeType, OpenFile, Superblock};
use crate::pagecache::PageCache;
use crate::task::Task;
use crate::walk::WalkOptions;

/// The virtual-file-system context.
pub struct Vfs {
    tunables: Tunables,
    sysroot: Arc<Dnode>,
    names: NameCache,
    dnode_zone: LruZone<Dnode>,
    inode_zone: LruZone<Inode>,
    mounts: Mutex<Vec<Arc<MountPoint>>>,
    fs_types: Mutex<Vec<Arc<dyn FileSystem>>>,
    next_token: AtomicU64,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    pub fn new() -> Self {
        Self::with_tunables(Tunables::default())
    }

    pub fn with_tunables(tunables: Tunables) -> Self {
        let vfs = Self {
            tunables,
            sysroot: Dnode::new(0, HashedName::empty()),
            names: NameCache::new(),
            dnode_zone: LruZone::new("dnode", tunables.dnode_zone_cap),
            inode_zone: LruZone::new("inode", tunables.inode_zone_cap),
            mounts: Mutex::new(Vec::new()),
            fs_types: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        };
        // The system root is pinned for the lifetime of the context.
        vfs.sysroot.grab();
        vfs.dnode_zone
            .touch(u64::from(vfs.sysroot.token()), &vfs.sysroot);
        vfs
    }

    /// The system root dnode.
    pub fn system_root(&self) -> &Arc<Dnode> {
        &self.sysroot
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub(crate) fn name_cache(&self) -> &NameCache {
        &self.names
    }

    /// Promote a dnode in its recency zone (successful lookups count as
    /// uses, not just lock acquisitions).
    pub(crate) fn touch_dnode(&self, dnode: &Arc<Dnode>) {
        self.dnode_zone.touch(u64::from(dnode.token()), dnode);
    }

    /// Cached dnode population (diagnostic).
    pub fn cached_dnodes(&self) -> usize {
        self.dnode_zone.len()
    }

    /// Cached inode population (diagnostic).
    pub fn cached_inodes(&self) -> usize {
        self.inode_zone.len()
    }

    fn alloc_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a task handle with an empty descriptor table and no cwd.
    pub fn new_task(&self) -> Task {
        Task::new()
    }

    /// Process-exit path: close remaining descriptors and drop the cwd pin.
    pub fn release_task(&self, task: &Task) {
        let entries = { task.fdtable().drain() };
        for (fd, entry) in entries {
            trace!(fd, "closing leftover descriptor");
            if entry.file.release() == 1 {
                if let Err(e) = self.close_file(&entry.file) {
                    warn!(fd, error = %e, "close during task teardown failed");
                }
            }
        }
        if let Some(old) = task.swap_cwd(None) {
            old.release();
            if let Some(m) = old.mount() {
                m.chillax();
            }
        }
    }

    // ── Locking ─────────────────────────────────────────────────────────

    /// Acquire a dnode's serialization mutex, promoting it in the recency
    /// zone. Lock order: parent before child, dnode before inode.
    pub(crate) fn lock_dnode<'d>(&self, dnode: &'d Arc<Dnode>) -> MutexGuard<'d, ()> {
        let guard = dnode.serial_lock();
        self.dnode_zone.touch(u64::from(dnode.token()), dnode);
        guard
    }

    /// Acquire an inode's mutex, promoting it in the recency zone.
    ///
    /// Every driver call that mutates the inode or its data runs under this
    /// guard.
    pub fn lock_inode<'i>(&self, inode: &'i Arc<Inode>) -> InodeGuard<'i> {
        let guard = inode.guard();
        self.inode_zone.touch(inode.token(), inode);
        guard
    }

    // ── Dnode lifecycle ─────────────────────────────────────────────────

    /// Allocate a fresh dnode named `name`, inheriting `parent`'s superblock
    /// and mount. Applies cache pressure: a full zone is asked to evict half
    /// before the allocation is refused.
    pub fn d_alloc(&self, parent: Option<&Arc<Dnode>>, name: &HashedName) -> FsResult<Arc<Dnode>> {
        if !self.dnode_zone.has_room() {
            self.dnode_zone.evict_half(|d| self.try_evict_dnode(d));
            if !self.dnode_zone.has_room() {
                warn!("dnode zone exhausted and nothing evictable");
                return Err(FsError::OutOfMemory);
            }
        }

        let token = self.alloc_token() as u32;
        let dnode = Dnode::new(token, HashedName::new(name.as_str()));
        if let Some(p) = parent {
            dnode.set_superblock(p.superblock());
            dnode.set_mount(p.mount());
        }
        self.dnode_zone.touch(u64::from(token), &dnode);
        Ok(dnode)
    }

    /// Tear a dnode down: drop its inode link, unhash it and every child.
    ///
    /// The caller must guarantee nothing but the cache references the dnode.
    /// Detached children stay in the recency zone and are collected by later
    /// eviction passes.
    pub(crate) fn d_free(&self, dnode: &Arc<Dnode>) {
        debug_assert_eq!(dnode.pinned(), 0, "freeing a pinned dnode");

        if let Some(inode) = dnode.inode() {
            let mut guard = inode.guard();
            debug_assert!(guard.link_count > 0, "dnode bound to unlinked inode");
            guard.link_count = guard.link_count.saturating_sub(1);
        }

        self.names.remove(dnode);
        for child in dnode.children() {
            self.names.remove(&child);
        }
        self.dnode_zone.remove(u64::from(dnode.token()));
        trace!(name = dnode.name().as_str(), "dnode freed");
    }

    fn try_evict_dnode(&self, dnode: &Arc<Dnode>) -> bool {
        // A contended serialization lock means the dnode is mid-operation.
        let Some(_serial) = dnode.try_serial_lock() else {
            return false;
        };
        if dnode.pinned() != 0 {
            return false;
        }
        self.d_free(dnode);
        true
    }

    // ── Inode lifecycle ─────────────────────────────────────────────────

    /// Allocate an inode on `sb`, run the driver's `init_inode`, and stamp
    /// the clocks. Same cache-pressure protocol as `d_alloc`.
    pub fn i_alloc(&self, sb: &Arc<Superblock>) -> FsResult<Arc<Inode>> {
        if !self.inode_zone.has_room() {
            self.inode_zone.evict_half(|i| self.try_evict_inode(i));
            if !self.inode_zone.has_room() {
                warn!("inode zone exhausted and nothing evictable");
                return Err(FsError::OutOfMemory);
            }
        }

        let inode = Inode::new(self.alloc_token(), sb);
        {
            let mut guard = inode.guard();
            sb.ops().init_inode(sb, &mut guard)?;
            let now = unix_now();
            guard.ctime = now;
            guard.atime = now;
            guard.mtime = now;
        }
        self.inode_zone.touch(inode.token(), &inode);
        Ok(inode)
    }

    /// Look an inode up in `sb`'s cache by driver id, promoting it on a hit.
    pub fn i_find(&self, sb: &Arc<Superblock>, id: u32) -> Option<Arc<Inode>> {
        let hit = sb.bucket(id).iter().find(|i| i.id() == id).cloned();
        if let Some(inode) = &hit {
            self.inode_zone.touch(inode.token(), inode);
        }
        hit
    }

    /// Register an inode in its superblock's cache. Idempotent: any previous
    /// registration (possibly under an older id) is dropped first.
    pub fn i_addhash(&self, inode: &Arc<Inode>) {
        let Some(sb) = inode.superblock() else {
            return;
        };
        for bucket in sb.inode_buckets.iter() {
            bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|i| !Arc::ptr_eq(i, inode));
        }
        sb.bucket(inode.id()).push(Arc::clone(inode));
    }

    fn try_evict_inode(&self, inode: &Arc<Inode>) -> bool {
        let Some(mut guard) = inode.try_guard() else {
            return false;
        };
        if guard.link_count != 0 || guard.open_count != 0 {
            return false;
        }
        self.i_free(inode, &mut guard);
        true
    }

    /// Destroy an unreferenced inode: flush and drop its page cache, give
    /// the driver its sync/release callbacks, and unhash it. Driver failures
    /// here are logged and swallowed; destruction proceeds regardless.
    fn i_free(&self, inode: &Arc<Inode>, guard: &mut InodeGuard<'_>) {
        {
            let mut pc = inode
                .pcache
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(pages) = pc.as_mut() {
                if let Err(e) = pages.commit_all(guard) {
                    warn!(id = inode.id(), error = %e, "page commit on inode teardown failed");
                }
                pages.release();
            }
            *pc = None;
        }

        if let Some(ops) = inode.method_table() {
            match ops.sync(guard) {
                Ok(()) | Err(FsError::NotSupported) => {}
                Err(e) => warn!(id = inode.id(), error = %e, "driver sync on teardown failed"),
            }
        }

        if let Some(sb) = inode.superblock() {
            if let Err(e) = sb.ops().release_inode(guard) {
                warn!(id = inode.id(), error = %e, "driver release_inode failed");
            }
            sb.bucket(inode.id()).retain(|i| !Arc::ptr_eq(i, inode));
        }

        self.inode_zone.remove(inode.token());
        trace!(id = inode.id(), "inode freed");
    }

    /// Rebind `dnode` to `inode`, moving one link count from the old inode
    /// (if any) to the new one.
    pub fn assign_inode(&self, dnode: &Arc<Dnode>, inode: &Arc<Inode>) {
        if let Some(old) = dnode.inode() {
            let mut guard = old.guard();
            debug_assert!(guard.link_count > 0, "rebinding from unlinked inode");
            guard.link_count = guard.link_count.saturating_sub(1);
        }
        dnode.set_inode(Some(Arc::clone(inode)));
        inode.guard().link_count += 1;
    }

    // ── File systems and mounts ─────────────────────────────────────────

    /// Make a file-system type available for mounting.
    pub fn register_fs(&self, fs: Arc<dyn FileSystem>) {
        info!(fs = fs.name(), "file system registered");
        self.fs_types
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fs);
    }

    fn fs_type(&self, name: &str) -> FsResult<Arc<dyn FileSystem>> {
        self.fs_types
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|fs| fs.name() == name)
            .cloned()
            .ok_or(FsError::InvalidArgument)
    }

    /// Mount the first file system onto the system root.
    pub fn mount_root(&self, fs_name: &str) -> FsResult<()> {
        if self.sysroot.mount().is_some() {
            return Err(FsError::Busy);
        }
        self.attach(Arc::clone(&self.sysroot), fs_name, None)
    }

    /// Mount a registered file system over the directory at `path`.
    ///
    /// The target must be an empty, otherwise unreferenced directory; its
    /// dnode becomes the mounted instance's root.
    pub fn mount(&self, task: &Task, path: &str, fs_name: &str) -> FsResult<()> {
        let out = self.walk(task.cwd().as_ref(), path, WalkOptions::empty())?;
        let at = out.dnode;

        let inode = at.inode().ok_or(FsError::NotFound)?;
        {
            let guard = self.lock_inode(&inode);
            if !guard.itype.contains(NodeType::DIRECTORY) {
                return Err(FsError::NotDirectory);
            }
        }
        if at.has_children() || at.pinned() > 0 {
            return Err(FsError::Busy);
        }
        if self.mount_of_root(&at).is_some() {
            return Err(FsError::Busy);
        }

        let parent_mnt = at.mount();
        self.attach(at, fs_name, parent_mnt)
    }

    fn attach(
        &self,
        at: Arc<Dnode>,
        fs_name: &str,
        parent_mnt: Option<Arc<MountPoint>>,
    ) -> FsResult<()> {
        let fs = self.fs_type(fs_name)?;
        let sb = Superblock::new(self.alloc_token(), Arc::clone(&fs), fs.super_ops());
        let prev_sb = at.superblock();
        let prev_mnt = at.mount();

        sb.set_root(Some(Arc::clone(&at)));
        at.set_superblock(Some(Arc::clone(&sb)));
        let mnt = MountPoint::new(Arc::clone(&at), Arc::clone(&sb), parent_mnt.as_ref());
        at.set_mount(Some(Arc::clone(&mnt)));
        at.grab(); // mount-root pin

        if let Err(e) = fs.mount(self, &sb, &at) {
            at.release();
            at.set_mount(prev_mnt);
            at.set_superblock(prev_sb);
            sb.set_root(None);
            return Err(e);
        }

        self.mounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(mnt);
        info!(fs = fs.name(), "mounted");
        Ok(())
    }

    fn mount_of_root(&self, dnode: &Arc<Dnode>) -> Option<Arc<MountPoint>> {
        self.mounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| Arc::ptr_eq(m.root(), dnode))
            .cloned()
    }

    /// Detach the mount rooted at `path`. Fails while any open file or cwd
    /// keeps the mount busy.
    pub fn unmount(&self, task: &Task, path: &str) -> FsResult<()> {
        let out = self.walk(task.cwd().as_ref(), path, WalkOptions::empty())?;
        let at = out.dnode;
        let mnt = self.mount_of_root(&at).ok_or(FsError::InvalidArgument)?;

        if mnt.busy_count() > 0 {
            return Err(FsError::Busy);
        }
        let sb = Arc::clone(mnt.superblock());
        sb.fs().unmount(self, &sb)?;

        // Unhash the mounted tree; detached dnodes drain through the zone.
        for child in at.children() {
            self.names.remove(&child);
        }
        self.names.remove(&at);
        at.set_mount(mnt.parent());
        at.release();
        sb.set_root(None);
        self.mounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|m| !Arc::ptr_eq(m, &mnt));
        info!(fs = sb.fs().name(), "unmounted");
        Ok(())
    }

    // ── Open files ──────────────────────────────────────────────────────

    /// Open the object behind `dnode`, producing a file holding one dnode
    /// reference, one inode open count, and one mount busy mark.
    pub(crate) fn open_dnode(&self, dnode: &Arc<Dnode>) -> FsResult<Arc<OpenFile>> {
        let inode = dnode.inode().ok_or(FsError::NotSupported)?;
        let ops = inode.method_table().ok_or(FsError::NotSupported)?;
        let fops = inode.file_method_table().ok_or(FsError::NotSupported)?;

        let mut guard = self.lock_inode(&inode);

        // Regular files get their page cache on first open.
        if guard.itype.contains(NodeType::FILE) {
            let mut pc = inode
                .pcache
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if pc.is_none() {
                *pc = Some(PageCache::new());
            }
        }

        let file = OpenFile::new(Arc::clone(dnode), Arc::clone(&inode), fops);
        ops.open(&mut guard, &file)?;

        dnode.grab();
        guard.open_count += 1;
        if let Some(m) = dnode.mount() {
            m.mkbusy();
        }
        Ok(file)
    }

    /// Final close: driver callback, then release every mark the open took.
    pub(crate) fn close_file(&self, file: &Arc<OpenFile>) -> FsResult<()> {
        file.ops().close(file)?;

        let inode = file.inode();
        {
            let mut guard = self.lock_inode(inode);
            let mut pc = inode
                .pcache
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(pages) = pc.as_mut() {
                if let Err(e) = pages.commit_all(&mut guard) {
                    warn!(id = inode.id(), error = %e, "page commit on close failed");
                }
            }
            drop(pc);
            debug_assert!(guard.open_count > 0);
            guard.open_count = guard.open_count.saturating_sub(1);
        }

        file.dnode().release();
        if let Some(m) = file.dnode().mount() {
            m.chillax();
        }
        Ok(())
    }

    // ── Shared operation helpers ────────────────────────────────────────

    /// Walk to the parent of `path`'s final component, then to the component
    /// itself, optionally creating an empty file on a miss. Returns
    /// `(parent, dnode, created)`.
    pub(crate) fn locate(
        &self,
        task: &Task,
        path: &str,
        create: bool,
        follow_final: bool,
    ) -> FsResult<(Arc<Dnode>, Arc<Dnode>, bool)> {
        let cwd = task.cwd();
        let parent_out = self.walk(cwd.as_ref(), path, WalkOptions::PARENT)?;
        let dir = parent_out.dnode;
        let name = parent_out.last.unwrap_or_else(HashedName::empty);

        let child_opts = if follow_final {
            WalkOptions::empty()
        } else {
            WalkOptions::NOFOLLOW
        };

        match self.walk(Some(&dir), name.as_str(), child_opts) {
            Ok(out) => Ok((dir, out.dnode, false)),
            Err(FsError::NotFound) if create => {
                if dir.superblock().is_some_and(|sb| sb.read_only()) {
                    return Err(FsError::ReadOnly);
                }
                let child = self.d_alloc(Some(&dir), &name)?;
                let serial = self.lock_dnode(&dir);
                let dinode = dir.inode().ok_or(FsError::NotFound)?;
                let mut guard = self.lock_inode(&dinode);
                let ops = dinode.method_table().ok_or(FsError::NotSupported)?;
                match ops.create(self, &mut guard, &child) {
                    Ok(()) => {
                        self.names.add(&dir, &child);
                        drop(guard);
                        drop(serial);
                        Ok((dir, child, true))
                    }
                    Err(e) => {
                        drop(guard);
                        drop(serial);
                        self.d_free(&child);
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Bind `name` to `src`'s inode as an additional hard link.
    pub(crate) fn link_dnodes(&self, src: &Arc<Dnode>, name: &Arc<Dnode>) -> FsResult<()> {
        let inode = src.inode().ok_or(FsError::NotFound)?;

        let same_device = match (src.superblock(), name.superblock()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        };
        if !same_device {
            return Err(FsError::CrossDevice);
        }

        {
            let mut guard = self.lock_inode(&inode);
            let ops = inode.method_table().ok_or(FsError::NotSupported)?;
            ops.link(&mut guard, name)?;
        }
        self.assign_inode(name, &inode);
        Ok(())
    }

    /// Unlink a non-directory that nothing else references.
    pub(crate) fn do_unlink(&self, dnode: &Arc<Dnode>) -> FsResult<()> {
        if dnode.pinned() > 0 {
            return Err(FsError::Busy);
        }
        let inode = dnode.inode().ok_or(FsError::NotFound)?;
        let ops = inode.method_table().ok_or(FsError::NotSupported)?;
        {
            let mut guard = self.lock_inode(&inode);
            if guard.open_count > 0 {
                return Err(FsError::Busy);
            }
            if guard.itype.contains(NodeType::DIRECTORY) {
                return Err(FsError::IsDirectory);
            }
            // The driver's unlink covers the symlink case as well.
            ops.unlink(&mut guard, dnode)?;
        }
        self.d_free(dnode);
        Ok(())
    }

    /// Replace `target` with `cur`: driver rename, then reposition `cur`
    /// under the target's name and parent and drop the detached target.
    pub(crate) fn do_rename(&self, cur: &Arc<Dnode>, target: &Arc<Dnode>) -> FsResult<()> {
        if cur.superblock().is_some_and(|sb| sb.read_only()) {
            return Err(FsError::ReadOnly);
        }

        // Renaming a name onto another hard link of the same object is a
        // no-op.
        if let (Some(ci), Some(ti)) = (cur.inode(), target.inode()) {
            if Arc::ptr_eq(&ci, &ti) {
                return Ok(());
            }
            let same_sb = match (ci.superblock(), ti.superblock()) {
                (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
                _ => false,
            };
            if same_sb && ci.id() == ti.id() {
                return Ok(());
            }
        }

        if cur.pinned() > 0 || target.pinned() > 0 {
            return Err(FsError::Busy);
        }

        let same_device = match (cur.superblock(), target.superblock()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        };
        if !same_device {
            return Err(FsError::CrossDevice);
        }

        let old_parent = cur.parent();
        let new_parent = target.parent().ok_or(FsError::InvalidArgument)?;

        // Fixed order: current, target, old parent, new parent; aliased
        // dnodes are locked once.
        let mut order: Vec<Arc<Dnode>> = Vec::with_capacity(4);
        for d in [
            Some(Arc::clone(cur)),
            Some(Arc::clone(target)),
            old_parent,
            Some(Arc::clone(&new_parent)),
        ]
        .into_iter()
        .flatten()
        {
            if !order.iter().any(|o| Arc::ptr_eq(o, &d)) {
                order.push(d);
            }
        }
        let guards: Vec<_> = order.iter().map(|d| self.lock_dnode(d)).collect();

        if target.has_children() {
            return Err(FsError::NotEmpty);
        }

        let cur_inode = cur.inode().ok_or(FsError::NotFound)?;
        let ops = cur_inode.method_table().ok_or(FsError::NotSupported)?;
        {
            let mut guard = self.lock_inode(&cur_inode);
            ops.rename(&mut guard, cur, target)?;
        }

        cur.set_name(target.name());
        self.names.rehash(&new_parent, cur);
        self.d_free(target);

        drop(guards);
        debug!("rename committed");
        Ok(())
    }

    /// Make `dnode` the task's working directory.
    pub(crate) fn do_chdir(&self, task: &Task, dnode: &Arc<Dnode>) -> FsResult<()> {
        let _serial = self.lock_dnode(dnode);

        let inode = dnode.inode().ok_or(FsError::NotDirectory)?;
        {
            let guard = self.lock_inode(&inode);
            if !guard.itype.contains(NodeType::DIRECTORY) {
                return Err(FsError::NotDirectory);
            }
        }

        if let Some(old) = task.swap_cwd(Some(Arc::clone(dnode))) {
            old.release();
            if let Some(m) = old.mount() {
                m.chillax();
            }
        }
        dnode.grab();
        if let Some(m) = dnode.mount() {
            m.mkbusy();
        }
        Ok(())
    }

    /// Reconstruct the absolute path of `dnode` into `buf` by chasing parent
    /// links. Output saturates at the buffer's end; parent chains deeper
    /// than the limit report a loop.
    pub(crate) fn path_of(&self, dnode: &Arc<Dnode>, buf: &mut [u8]) -> FsResult<usize> {
        fn ascend(dnode: Option<Arc<Dnode>>, buf: &mut [u8], depth: usize) -> FsResult<usize> {
            let Some(d) = dnode else {
                return Ok(0);
            };
            if depth > crate::config::PATH_DEPTH_MAX {
                return Err(FsError::TooManyLinks);
            }
            let mut len = ascend(d.parent(), buf, depth + 1)?;
            if len >= buf.len() {
                return Ok(len);
            }
            let name = d.name();
            let cpy = name.len().min(buf.len() - len);
            buf[len..len + cpy].copy_from_slice(&name.as_str().as_bytes()[..cpy]);
            len += cpy;
            if len < buf.len() {
                buf[len] = b'/';
                len += 1;
            }
            Ok(len)
        }
        ascend(Some(Arc::clone(dnode)), buf, 0)
    }
}

//! Inodes: the file-system-visible objects behind dnodes.

use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

use crate::driver::{FileOps, InodeOps};
use crate::node::Superblock;
use crate::pagecache::PageCache;

bitflags! {
    /// What kind of object an inode represents.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeType: u32 {
        /// Regular file.
        const FILE = 1 << 0;
        /// Directory.
        const DIRECTORY = 1 << 1;
        /// Symbolic link.
        const SYMLINK = 1 << 2;
        /// Sequential (character) device; bypasses the page cache.
        const SEQ_DEVICE = 1 << 3;
        /// Volume (block) device.
        const VOL_DEVICE = 1 << 4;
    }
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::empty()
    }
}

/// Wall clock in unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Mutable inode fields, all protected by the inode mutex.
///
/// `link_count` counts dnodes currently bound to this inode; `open_count`
/// counts open files. Both are only touched with the mutex held.
#[derive(Debug, Clone, Copy)]
pub struct InodeState {
    pub itype: NodeType,
    pub fsize: usize,
    pub link_count: u32,
    pub open_count: u32,
    pub ctime: u64,
    pub atime: u64,
    pub mtime: u64,
}

/// One file-system object. May outlive any individual dnode bound to it and
/// is reused across the driver boundary through the superblock's inode cache.
pub struct Inode {
    token: u64,
    id: AtomicU32,
    sb: Weak<Superblock>,
    ops: OnceLock<Arc<dyn InodeOps>>,
    fops: OnceLock<Arc<dyn FileOps>>,
    private: OnceLock<Arc<dyn Any + Send + Sync>>,
    state: Mutex<InodeState>,
    pub(crate) pcache: Mutex<Option<PageCache>>,
}

impl Inode {
    pub(crate) fn new(token: u64, sb: &Arc<Superblock>) -> Arc<Self> {
        Arc::new(Self {
            token,
            id: AtomicU32::new(0),
            sb: Arc::downgrade(sb),
            ops: OnceLock::new(),
            fops: OnceLock::new(),
            private: OnceLock::new(),
            state: Mutex::new(InodeState {
                itype: NodeType::empty(),
                fsize: 0,
                link_count: 0,
                open_count: 0,
                ctime: 0,
                atime: 0,
                mtime: 0,
            }),
            pcache: Mutex::new(None),
        })
    }

    /// Recency-zone key.
    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    /// Driver-assigned id, unique within the owning superblock.
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    pub fn superblock(&self) -> Option<Arc<Superblock>> {
        self.sb.upgrade()
    }

    /// Driver-private state installed at initialization time.
    pub fn driver_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.private.get().cloned()
    }

    pub(crate) fn method_table(&self) -> Option<Arc<dyn InodeOps>> {
        self.ops.get().cloned()
    }

    pub(crate) fn file_method_table(&self) -> Option<Arc<dyn FileOps>> {
        self.fops.get().cloned()
    }

    /// Acquire the inode mutex without touching the recency zone. The VFS
    /// context's `lock_inode` is the normal entry point.
    pub(crate) fn guard<'a>(self: &'a Arc<Self>) -> InodeGuard<'a> {
        InodeGuard {
            inode: self,
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub(crate) fn try_guard<'a>(self: &'a Arc<Self>) -> Option<InodeGuard<'a>> {
        self.state.try_lock().ok().map(|state| InodeGuard {
            inode: self,
            state,
        })
    }
}

impl std::fmt::Debug for Inode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inode")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// Witness that the inode mutex is held.
///
/// Driver callbacks that mutate an inode or its data receive one of these,
/// making the locking rule part of the signature rather than a convention.
pub struct InodeGuard<'a> {
    inode: &'a Arc<Inode>,
    state: MutexGuard<'a, InodeState>,
}

impl<'a> InodeGuard<'a> {
    /// The inode this guard is holding.
    pub fn node(&self) -> &Arc<Inode> {
        self.inode
    }

    pub fn id(&self) -> u32 {
        self.inode.id()
    }

    /// Assign the driver's id. Re-hash the inode afterwards if it was already
    /// in the superblock's cache.
    pub fn set_id(&mut self, id: u32) {
        self.inode.id.store(id, Ordering::Release);
    }

    pub fn superblock(&self) -> Option<Arc<Superblock>> {
        self.inode.superblock()
    }

    /// Install the driver's method tables. First installation wins.
    pub fn install_ops(&mut self, ops: Arc<dyn InodeOps>, fops: Arc<dyn FileOps>) {
        let _ = self.inode.ops.set(ops);
        let _ = self.inode.fops.set(fops);
    }

    /// Install driver-private state. First installation wins.
    pub fn set_driver_data(&mut self, data: Arc<dyn Any + Send + Sync>) {
        let _ = self.inode.private.set(data);
    }

    pub fn driver_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inode.driver_data()
    }

    /// The inode method table. Panics if the driver never installed one,
    /// which cannot happen for an inode produced by `init_inode`.
    pub fn ops(&self) -> Arc<dyn InodeOps> {
        self.inode
            .method_table()
            .expect("inode method table installed at init")
    }

    pub(crate) fn fops(&self) -> Arc<dyn FileOps> {
        self.inode
            .file_method_table()
            .expect("file method table installed at init")
    }
}

impl Deref for InodeGuard<'_> {
    type Target = InodeState;

    fn deref(&self) -> &InodeState {
        &self.state
    }
}

impl DerefMut for InodeGuard<'_> {
    fn deref_mut(&mut self) -> &mut InodeState {
        &mut self.state
    }
}

//! Directory nodes: one cached name binding each.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::cache::HashedName;
use crate::mount::MountPoint;
use crate::node::{Inode, Superblock};

/// One name bound at one point in the tree.
///
/// A dnode is reachable through the name cache (its structural owner), the
/// dnode recency zone, and strong parent back-links held by its children.
/// `ref_count` tracks the cache's own reference plus every persistent pin
/// (cwd, open file, mount root, the system root); it deliberately does not
/// track plain `Arc` clones handed out to walkers, which only borrow.
pub struct Dnode {
    token: u32,
    ref_count: AtomicU32,
    serial: Mutex<()>,
    inner: Mutex<DnodeInner>,
}

struct DnodeInner {
    name: HashedName,
    parent: Option<Arc<Dnode>>,
    children: Vec<Weak<Dnode>>,
    inode: Option<Arc<Inode>>,
    sb: Option<Arc<Superblock>>,
    mnt: Option<Arc<MountPoint>>,
    /// Bucket this dnode is hashed into, if any. Kept here so the cache can
    /// unhash without recomputing a possibly stale mixed hash.
    bucket: Option<usize>,
}

impl Dnode {
    pub(crate) fn new(token: u32, name: HashedName) -> Arc<Self> {
        Arc::new(Self {
            token,
            ref_count: AtomicU32::new(0),
            serial: Mutex::new(()),
            inner: Mutex::new(DnodeInner {
                name,
                parent: None,
                children: Vec::new(),
                inode: None,
                sb: None,
                mnt: None,
                bucket: None,
            }),
        })
    }

    /// Stable identity used for bucket mixing and as the recency-zone key.
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Acquire this dnode's serialization mutex.
    ///
    /// Lock order: parent before child, dnode before its inode.
    pub(crate) fn serial_lock(&self) -> MutexGuard<'_, ()> {
        self.serial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking variant used by the eviction predicate; a contended lock
    /// means the dnode is in use and must not be torn down.
    pub(crate) fn try_serial_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.serial.try_lock().ok()
    }

    fn inner(&self) -> MutexGuard<'_, DnodeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> HashedName {
        self.inner().name.clone()
    }

    pub(crate) fn set_name(&self, name: HashedName) {
        self.inner().name = name;
    }

    pub fn parent(&self) -> Option<Arc<Dnode>> {
        self.inner().parent.clone()
    }

    pub(crate) fn set_parent(&self, parent: Option<Arc<Dnode>>) {
        self.inner().parent = parent;
    }

    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.inner().inode.clone()
    }

    pub(crate) fn set_inode(&self, inode: Option<Arc<Inode>>) {
        self.inner().inode = inode;
    }

    pub fn superblock(&self) -> Option<Arc<Superblock>> {
        self.inner().sb.clone()
    }

    pub(crate) fn set_superblock(&self, sb: Option<Arc<Superblock>>) {
        self.inner().sb = sb;
    }

    pub fn mount(&self) -> Option<Arc<MountPoint>> {
        self.inner().mnt.clone()
    }

    pub(crate) fn set_mount(&self, mnt: Option<Arc<MountPoint>>) {
        self.inner().mnt = mnt;
    }

    /// Live children, pruning any back-links whose dnode is already gone.
    pub fn children(&self) -> Vec<Arc<Dnode>> {
        let mut inner = self.inner();
        inner.children.retain(|w| w.strong_count() > 0);
        inner.children.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn has_children(&self) -> bool {
        let mut inner = self.inner();
        inner.children.retain(|w| w.strong_count() > 0);
        !inner.children.is_empty()
    }

    pub(crate) fn attach_child(&self, child: &Arc<Dnode>) {
        self.inner().children.push(Arc::downgrade(child));
    }

    pub(crate) fn detach_child(&self, child: &Arc<Dnode>) {
        self.inner().children.retain(|w| match w.upgrade() {
            Some(c) => !Arc::ptr_eq(&c, child),
            None => false,
        });
    }

    pub(crate) fn bucket_slot(&self) -> Option<usize> {
        self.inner().bucket
    }

    pub(crate) fn set_bucket_slot(&self, slot: Option<usize>) {
        self.inner().bucket = slot;
    }

    /// Take one persistent reference (cwd, open file, mount root, cache).
    pub(crate) fn grab(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one persistent reference.
    pub(crate) fn release(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "dnode refcount underflow");
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn is_hashed(&self) -> bool {
        self.inner().parent.is_some()
    }

    /// References held beyond the name cache's own. Zero means nothing but
    /// the cache keeps this dnode alive and it may be evicted.
    pub(crate) fn pinned(&self) -> u32 {
        let cached = u32::from(self.is_hashed());
        self.ref_count().saturating_sub(cached)
    }
}

impl std::fmt::Debug for Dnode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dnode")
            .field("token", &self.token)
            .field("name", &self.name().as_str().to_owned())
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

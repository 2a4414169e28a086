//! Mount points and busy accounting.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::node::{Dnode, Superblock};

/// An attachment of a superblock at a dnode.
///
/// The busy counter tracks how many open files and working directories live
/// under this mount; unmounting is refused while it is nonzero.
pub struct MountPoint {
    root: Arc<Dnode>,
    sb: Arc<Superblock>,
    parent: Option<Weak<MountPoint>>,
    busy: AtomicU32,
}

impl MountPoint {
    pub(crate) fn new(
        root: Arc<Dnode>,
        sb: Arc<Superblock>,
        parent: Option<&Arc<MountPoint>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            root,
            sb,
            parent: parent.map(Arc::downgrade),
            busy: AtomicU32::new(0),
        })
    }

    /// The dnode this file system is rooted at.
    pub fn root(&self) -> &Arc<Dnode> {
        &self.root
    }

    pub fn superblock(&self) -> &Arc<Superblock> {
        &self.sb
    }

    pub fn parent(&self) -> Option<Arc<MountPoint>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Mark the mount busy (an open file or cwd now lives under it).
    pub fn mkbusy(&self) {
        let n = self.busy.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(sb = self.sb.id(), busy = n, "mount busy");
    }

    /// Drop one busy mark.
    pub fn chillax(&self) {
        let prev = self.busy.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "mount busy underflow");
        trace!(sb = self.sb.id(), busy = prev - 1, "mount relaxed");
    }

    pub fn busy_count(&self) -> u32 {
        self.busy.load(Ordering::Acquire)
    }
}

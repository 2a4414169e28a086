//! Superblocks: one mounted file-system instance each.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::config::HASHTABLE_SIZE;
use crate::driver::{FileSystem, FsFlags, SuperOps};
use crate::node::{Dnode, Inode};

/// Per-mount context owning the inode cache for its driver.
pub struct Superblock {
    id: u64,
    fs: Arc<dyn FileSystem>,
    ops: Arc<dyn SuperOps>,
    root: Mutex<Option<Arc<Dnode>>>,
    private: OnceLock<Arc<dyn Any + Send + Sync>>,
    pub(crate) inode_buckets: Box<[Mutex<Vec<Arc<Inode>>>]>,
}

impl Superblock {
    pub(crate) fn new(id: u64, fs: Arc<dyn FileSystem>, ops: Arc<dyn SuperOps>) -> Arc<Self> {
        let buckets = (0..HASHTABLE_SIZE)
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Arc::new(Self {
            id,
            fs,
            ops,
            root: Mutex::new(None),
            private: OnceLock::new(),
            inode_buckets: buckets,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub(crate) fn ops(&self) -> &Arc<dyn SuperOps> {
        &self.ops
    }

    pub fn read_only(&self) -> bool {
        self.fs.flags().contains(FsFlags::READ_ONLY)
    }

    /// Root dnode of this mounted instance.
    pub fn root(&self) -> Option<Arc<Dnode>> {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_root(&self, root: Option<Arc<Dnode>>) {
        *self.root.lock().unwrap_or_else(PoisonError::into_inner) = root;
    }

    /// Mount-wide driver state. First installation wins.
    pub fn set_driver_data(&self, data: Arc<dyn Any + Send + Sync>) {
        let _ = self.private.set(data);
    }

    pub fn driver_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.private.get().cloned()
    }

    pub(crate) fn bucket(&self, id: u32) -> MutexGuard<'_, Vec<Arc<Inode>>> {
        let idx = (id & crate::config::HASH_MASK) as usize;
        self.inode_buckets[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Superblock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Superblock")
            .field("id", &self.id)
            .field("fs", &self.fs.name())
            .finish_non_exhaustive()
    }
}

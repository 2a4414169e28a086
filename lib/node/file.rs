//! Open-file objects: one per successful `open`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::driver::FileOps;
use crate::node::{Dnode, Inode};

bitflags! {
    /// Options accepted by `open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Create the file if the final component does not exist.
        const CREATE = 1 << 0;
        /// Start the file position at the current end of file.
        const APPEND = 1 << 1;
        /// Bypass the page cache and talk to the driver directly.
        const DIRECT = 1 << 2;
    }
}

/// The object behind a file descriptor.
///
/// Holds one reference on its dnode, one open count on its inode, and one
/// busy mark on the mount for as long as it lives. `dup` shares the object,
/// so the byte position is shared as well; it is only mutated with the inode
/// mutex held.
pub struct OpenFile {
    dnode: Arc<Dnode>,
    inode: Arc<Inode>,
    ops: Arc<dyn FileOps>,
    ref_count: AtomicU32,
    pos: AtomicU64,
}

impl OpenFile {
    pub(crate) fn new(dnode: Arc<Dnode>, inode: Arc<Inode>, ops: Arc<dyn FileOps>) -> Arc<Self> {
        Arc::new(Self {
            dnode,
            inode,
            ops,
            ref_count: AtomicU32::new(1),
            pos: AtomicU64::new(0),
        })
    }

    pub fn dnode(&self) -> &Arc<Dnode> {
        &self.dnode
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub(crate) fn ops(&self) -> &Arc<dyn FileOps> {
        &self.ops
    }

    /// Current byte position.
    pub fn pos(&self) -> usize {
        self.pos.load(Ordering::Acquire) as usize
    }

    pub(crate) fn set_pos(&self, pos: usize) {
        self.pos.store(pos as u64, Ordering::Release);
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Take one descriptor reference (`dup`).
    pub(crate) fn grab(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one descriptor reference; returns the previous count.
    pub(crate) fn release(&self) -> u32 {
        self.ref_count.fetch_sub(1, Ordering::AcqRel)
    }
}

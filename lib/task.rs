//! The "current task" handle the operation surface acts on behalf of.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::fd_table::FdTable;
use crate::node::Dnode;

/// Per-task VFS state: the descriptor table and the working directory.
///
/// The task holds one dnode reference and one mount busy mark for its cwd;
/// both are released by `Vfs::release_task` or when the cwd changes.
pub struct Task {
    pub(crate) fdtable: Mutex<FdTable>,
    cwd: Mutex<Option<Arc<Dnode>>>,
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl Task {
    pub fn new() -> Self {
        Self {
            fdtable: Mutex::new(FdTable::new()),
            cwd: Mutex::new(None),
        }
    }

    /// Current working directory, if one was ever set.
    pub fn cwd(&self) -> Option<Arc<Dnode>> {
        self.cwd
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the stored cwd pointer, returning the previous one. Reference
    /// and busy accounting is the caller's job.
    pub(crate) fn swap_cwd(&self, new: Option<Arc<Dnode>>) -> Option<Arc<Dnode>> {
        std::mem::replace(
            &mut *self.cwd.lock().unwrap_or_else(PoisonError::into_inner),
            new,
        )
    }

    pub(crate) fn fdtable(&self) -> MutexGuard<'_, FdTable> {
        self.fdtable.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of descriptors currently open.
    pub fn open_descriptors(&self) -> usize {
        self.fdtable().open_count()
    }
}

//! A mock driver that counts how often the VFS falls through to it, so tests
//! can observe name-cache hits and misses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use vfs_core::{
    Dnode, FileSystem, FsError, FsResult, InodeGuard, InodeOps, NodeType, OpenFile, SuperOps,
    Superblock, Vfs,
};

/// Shared call counters handed back to the test.
#[derive(Clone, Default)]
pub struct Counters {
    lookups: Arc<AtomicUsize>,
    creates: Arc<AtomicUsize>,
}

impl Counters {
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

/// Directory tree as a flat `(parent id, name) -> (id, kind)` map.
struct Tree {
    next_id: AtomicU32,
    map: Mutex<HashMap<(u32, String), (u32, NodeType)>>,
}

impl Tree {
    fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<(u32, String), (u32, NodeType)>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct CountingFs {
    tree: Arc<Tree>,
    counters: Counters,
}

impl CountingFs {
    /// Build the fs type plus a handle on its counters.
    pub fn create() -> (Arc<dyn FileSystem>, Counters) {
        let counters = Counters::default();
        let fs = Arc::new(CountingFs {
            tree: Arc::new(Tree {
                next_id: AtomicU32::new(1),
                map: Mutex::new(HashMap::new()),
            }),
            counters: counters.clone(),
        });
        (fs, counters)
    }
}

struct CountingSuperOps {
    tree: Arc<Tree>,
    counters: Counters,
}

struct CountingOps {
    tree: Arc<Tree>,
    counters: Counters,
}

fn bind(vfs: &Vfs, dir: &InodeGuard<'_>, dnode: &Arc<Dnode>, id: u32, kind: NodeType) -> FsResult<()> {
    let sb = dir.superblock().ok_or(FsError::InvalidArgument)?;
    if let Some(existing) = vfs.i_find(&sb, id) {
        vfs.assign_inode(dnode, &existing);
        return Ok(());
    }
    let inode = vfs.i_alloc(&sb)?;
    {
        let mut guard = vfs.lock_inode(&inode);
        guard.set_id(id);
        guard.itype = kind;
    }
    vfs.i_addhash(&inode);
    vfs.assign_inode(dnode, &inode);
    Ok(())
}

impl FileSystem for CountingFs {
    fn name(&self) -> &'static str {
        "countingfs"
    }

    fn super_ops(&self) -> Arc<dyn SuperOps> {
        Arc::new(CountingSuperOps {
            tree: Arc::clone(&self.tree),
            counters: self.counters.clone(),
        })
    }

    fn mount(&self, vfs: &Vfs, sb: &Arc<Superblock>, root: &Arc<Dnode>) -> FsResult<()> {
        let inode = vfs.i_alloc(sb)?;
        {
            let mut guard = vfs.lock_inode(&inode);
            guard.set_id(0);
            guard.itype = NodeType::DIRECTORY;
        }
        vfs.i_addhash(&inode);
        vfs.assign_inode(root, &inode);
        Ok(())
    }
}

impl SuperOps for CountingSuperOps {
    fn init_inode(&self, _sb: &Arc<Superblock>, inode: &mut InodeGuard<'_>) -> FsResult<()> {
        inode.install_ops(
            Arc::new(CountingOps {
                tree: Arc::clone(&self.tree),
                counters: self.counters.clone(),
            }),
            Arc::new(vfs_core::DefaultFileOps),
        );
        inode.itype = NodeType::FILE;
        Ok(())
    }
}

impl CountingOps {
    fn insert_child(
        &self,
        vfs: &Vfs,
        dir: &mut InodeGuard<'_>,
        dnode: &Arc<Dnode>,
        kind: NodeType,
    ) -> FsResult<()> {
        let key = (dir.id(), dnode.name().as_str().to_owned());
        let id = {
            let mut map = self.tree.map();
            if map.contains_key(&key) {
                return Err(FsError::Exists);
            }
            let id = self.tree.alloc_id();
            map.insert(key, (id, kind));
            id
        };
        bind(vfs, dir, dnode, id, kind)
    }
}

impl InodeOps for CountingOps {
    fn dir_lookup(&self, vfs: &Vfs, dir: &mut InodeGuard<'_>, child: &Arc<Dnode>) -> FsResult<()> {
        self.counters.lookups.fetch_add(1, Ordering::SeqCst);
        let key = (dir.id(), child.name().as_str().to_owned());
        let (id, kind) = self.tree.map().get(&key).copied().ok_or(FsError::NotFound)?;
        bind(vfs, dir, child, id, kind)
    }

    fn open(&self, _ino: &mut InodeGuard<'_>, _file: &OpenFile) -> FsResult<()> {
        Ok(())
    }

    fn create(&self, vfs: &Vfs, dir: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        self.insert_child(vfs, dir, dnode, NodeType::FILE)
    }

    fn mkdir(&self, vfs: &Vfs, dir: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        self.insert_child(vfs, dir, dnode, NodeType::DIRECTORY)
    }

    fn unlink(&self, _ino: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        let parent = dnode.parent().ok_or(FsError::InvalidArgument)?;
        let pid = parent.inode().ok_or(FsError::NotFound)?.id();
        self.tree
            .map()
            .remove(&(pid, dnode.name().as_str().to_owned()))
            .ok_or(FsError::NotFound)?;
        Ok(())
    }

    fn rename(&self, _ino: &mut InodeGuard<'_>, from: &Arc<Dnode>, to: &Arc<Dnode>) -> FsResult<()> {
        let from_parent = from.parent().ok_or(FsError::InvalidArgument)?;
        let to_parent = to.parent().ok_or(FsError::InvalidArgument)?;
        let from_pid = from_parent.inode().ok_or(FsError::NotFound)?.id();
        let to_pid = to_parent.inode().ok_or(FsError::NotFound)?.id();

        let mut map = self.tree.map();
        let entry = map
            .remove(&(from_pid, from.name().as_str().to_owned()))
            .ok_or(FsError::NotFound)?;
        map.insert((to_pid, to.name().as_str().to_owned()), entry);
        Ok(())
    }

    fn seek(&self, _ino: &mut InodeGuard<'_>, _pos: usize) -> FsResult<()> {
        Ok(())
    }

    fn sync(&self, _ino: &mut InodeGuard<'_>) -> FsResult<()> {
        Ok(())
    }
}

//! A memory-backed reference driver.
//!
//! The volume keeps its own node tree independent of the VFS object cache:
//! evicted inodes and dnodes are rebuilt on the next `dir_lookup`, so cache
//! pressure never loses data. Registered under the name `"ramfs"`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;

use crate::driver::{FileOps, FileSystem, InodeOps, SuperOps};
use crate::error::{FsError, FsResult};
use crate::node::{Dnode, InodeGuard, NodeType, OpenFile, Superblock};
use crate::vfs::Vfs;

/// The file-system type; register with [`Vfs::register_fs`].
pub struct RamFs;

impl RamFs {
    pub fn new() -> Arc<dyn FileSystem> {
        Arc::new(RamFs)
    }
}

struct RamVolume {
    next_id: AtomicU32,
    root: Arc<RamNode>,
}

impl RamVolume {
    fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// One object in the volume's own tree. Directory entries carry the names,
/// so hard links are just two entries sharing a node.
struct RamNode {
    id: u32,
    body: Mutex<RamBody>,
}

struct RamBody {
    kind: NodeType,
    /// File contents, or the target path for a symlink.
    content: BytesMut,
    entries: Vec<RamDirEnt>,
}

struct RamDirEnt {
    name: String,
    node: Arc<RamNode>,
}

impl RamNode {
    fn new(id: u32, kind: NodeType) -> Arc<Self> {
        Arc::new(Self {
            id,
            body: Mutex::new(RamBody {
                kind,
                content: BytesMut::new(),
                entries: Vec::new(),
            }),
        })
    }

    fn body(&self) -> MutexGuard<'_, RamBody> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn volume_of(sb: &Arc<Superblock>) -> FsResult<Arc<RamVolume>> {
    sb.driver_data()
        .and_then(|d| d.downcast::<RamVolume>().ok())
        .ok_or(FsError::InvalidArgument)
}

fn node_of(guard: &InodeGuard<'_>) -> FsResult<Arc<RamNode>> {
    guard
        .driver_data()
        .and_then(|d| d.downcast::<RamNode>().ok())
        .ok_or(FsError::InvalidArgument)
}

/// The node behind an already-resolved dnode, read without taking its inode
/// mutex (driver data is installed once and never changes).
fn node_of_dnode(dnode: &Arc<Dnode>) -> FsResult<Arc<RamNode>> {
    dnode
        .inode()
        .and_then(|i| i.driver_data())
        .and_then(|d| d.downcast::<RamNode>().ok())
        .ok_or(FsError::InvalidArgument)
}

/// Bind `node` to `dnode`, reusing a cached inode for the same id when one
/// exists.
fn bind(vfs: &Vfs, sb: &Arc<Superblock>, dnode: &Arc<Dnode>, node: &Arc<RamNode>) -> FsResult<()> {
    if let Some(existing) = vfs.i_find(sb, node.id) {
        vfs.assign_inode(dnode, &existing);
        return Ok(());
    }

    let inode = vfs.i_alloc(sb)?;
    {
        let mut guard = vfs.lock_inode(&inode);
        let body = node.body();
        guard.set_id(node.id);
        guard.itype = body.kind;
        guard.fsize = body.content.len();
        let data: Arc<RamNode> = Arc::clone(node);
        guard.set_driver_data(data);
    }
    vfs.i_addhash(&inode);
    vfs.assign_inode(dnode, &inode);
    Ok(())
}

struct RamSuperOps;

impl SuperOps for RamSuperOps {
    fn init_inode(&self, _sb: &Arc<Superblock>, inode: &mut InodeGuard<'_>) -> FsResult<()> {
        inode.install_ops(Arc::new(RamInodeOps), Arc::new(RamFileOps));
        inode.itype = NodeType::FILE;
        Ok(())
    }
}

impl FileSystem for RamFs {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn super_ops(&self) -> Arc<dyn SuperOps> {
        Arc::new(RamSuperOps)
    }

    fn mount(&self, vfs: &Vfs, sb: &Arc<Superblock>, root: &Arc<Dnode>) -> FsResult<()> {
        let vol = Arc::new(RamVolume {
            next_id: AtomicU32::new(1),
            root: RamNode::new(0, NodeType::DIRECTORY),
        });
        let vol_data: Arc<RamVolume> = Arc::clone(&vol);
        sb.set_driver_data(vol_data);

        let inode = vfs.i_alloc(sb)?;
        {
            let mut guard = vfs.lock_inode(&inode);
            guard.set_id(0);
            guard.itype = NodeType::DIRECTORY;
            let root_data: Arc<RamNode> = Arc::clone(&vol.root);
            guard.set_driver_data(root_data);
        }
        vfs.i_addhash(&inode);
        vfs.assign_inode(root, &inode);
        Ok(())
    }
}

struct RamInodeOps;

impl RamInodeOps {
    /// Insert a fresh node named after `dnode` into the directory `dir`.
    fn make_child(
        &self,
        vfs: &Vfs,
        dir: &mut InodeGuard<'_>,
        dnode: &Arc<Dnode>,
        kind: NodeType,
    ) -> FsResult<()> {
        let parent = node_of(dir)?;
        let sb = dir.superblock().ok_or(FsError::InvalidArgument)?;
        let vol = volume_of(&sb)?;
        let name = dnode.name();

        let node = {
            let mut body = parent.body();
            if !body.kind.contains(NodeType::DIRECTORY) {
                return Err(FsError::NotDirectory);
            }
            if body.entries.iter().any(|e| e.name == name.as_str()) {
                return Err(FsError::Exists);
            }
            let node = RamNode::new(vol.alloc_id(), kind);
            body.entries.push(RamDirEnt {
                name: name.as_str().to_owned(),
                node: Arc::clone(&node),
            });
            node
        };

        bind(vfs, &sb, dnode, &node)
    }
}

impl InodeOps for RamInodeOps {
    fn dir_lookup(&self, vfs: &Vfs, dir: &mut InodeGuard<'_>, child: &Arc<Dnode>) -> FsResult<()> {
        let parent = node_of(dir)?;
        let name = child.name();

        let hit = {
            let body = parent.body();
            if !body.kind.contains(NodeType::DIRECTORY) {
                return Err(FsError::NotDirectory);
            }
            body.entries
                .iter()
                .find(|e| e.name == name.as_str())
                .map(|e| Arc::clone(&e.node))
        };

        let node = hit.ok_or(FsError::NotFound)?;
        let sb = dir.superblock().ok_or(FsError::InvalidArgument)?;
        bind(vfs, &sb, child, &node)
    }

    fn open(&self, _ino: &mut InodeGuard<'_>, _file: &OpenFile) -> FsResult<()> {
        Ok(())
    }

    fn create(&self, vfs: &Vfs, dir: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        self.make_child(vfs, dir, dnode, NodeType::FILE)
    }

    fn mkdir(&self, vfs: &Vfs, dir: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        self.make_child(vfs, dir, dnode, NodeType::DIRECTORY)
    }

    fn rmdir(&self, dir: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        let parent = node_of(dir)?;
        let name = dnode.name();
        let mut body = parent.body();

        let idx = body
            .entries
            .iter()
            .position(|e| e.name == name.as_str())
            .ok_or(FsError::NotFound)?;
        {
            let victim = body.entries[idx].node.body();
            if !victim.kind.contains(NodeType::DIRECTORY) {
                return Err(FsError::NotDirectory);
            }
            if !victim.entries.is_empty() {
                return Err(FsError::NotEmpty);
            }
        }
        body.entries.remove(idx);
        Ok(())
    }

    fn unlink(&self, _ino: &mut InodeGuard<'_>, dnode: &Arc<Dnode>) -> FsResult<()> {
        let parent = dnode.parent().ok_or(FsError::InvalidArgument)?;
        let pnode = node_of_dnode(&parent)?;
        let name = dnode.name();
        let mut body = pnode.body();

        let before = body.entries.len();
        body.entries.retain(|e| e.name != name.as_str());
        if body.entries.len() == before {
            return Err(FsError::NotFound);
        }
        Ok(())
    }

    fn link(&self, ino: &mut InodeGuard<'_>, name: &Arc<Dnode>) -> FsResult<()> {
        let node = node_of(ino)?;
        let parent = name.parent().ok_or(FsError::InvalidArgument)?;
        let pnode = node_of_dnode(&parent)?;
        let entry_name = name.name();
        let mut body = pnode.body();

        // The VFS hands us a freshly created placeholder entry under the
        // same name; repoint it at the linked node.
        match body
            .entries
            .iter_mut()
            .find(|e| e.name == entry_name.as_str())
        {
            Some(entry) => entry.node = Arc::clone(&node),
            None => body.entries.push(RamDirEnt {
                name: entry_name.as_str().to_owned(),
                node: Arc::clone(&node),
            }),
        }
        Ok(())
    }

    fn rename(&self, _ino: &mut InodeGuard<'_>, from: &Arc<Dnode>, to: &Arc<Dnode>) -> FsResult<()> {
        let old_parent = from.parent().ok_or(FsError::InvalidArgument)?;
        let new_parent = to.parent().ok_or(FsError::InvalidArgument)?;
        let src_dir = node_of_dnode(&old_parent)?;
        let dst_dir = node_of_dnode(&new_parent)?;
        let from_name = from.name();
        let to_name = to.name();

        if Arc::ptr_eq(&src_dir, &dst_dir) {
            let mut body = src_dir.body();
            let idx = body
                .entries
                .iter()
                .position(|e| e.name == from_name.as_str())
                .ok_or(FsError::NotFound)?;
            let node = Arc::clone(&body.entries[idx].node);
            body.entries.remove(idx);
            body.entries.retain(|e| e.name != to_name.as_str());
            body.entries.push(RamDirEnt {
                name: to_name.as_str().to_owned(),
                node,
            });
            return Ok(());
        }

        let node = {
            let mut src = src_dir.body();
            let idx = src
                .entries
                .iter()
                .position(|e| e.name == from_name.as_str())
                .ok_or(FsError::NotFound)?;
            let ent = src.entries.remove(idx);
            ent.node
        };
        let mut dst = dst_dir.body();
        dst.entries.retain(|e| e.name != to_name.as_str());
        dst.entries.push(RamDirEnt {
            name: to_name.as_str().to_owned(),
            node,
        });
        Ok(())
    }

    fn read(&self, ino: &mut InodeGuard<'_>, buf: &mut [u8], pos: usize) -> FsResult<usize> {
        let node = node_of(ino)?;
        let body = node.body();
        if pos >= body.content.len() {
            return Ok(0);
        }
        let n = buf.len().min(body.content.len() - pos);
        buf[..n].copy_from_slice(&body.content[pos..pos + n]);
        Ok(n)
    }

    fn write(&self, ino: &mut InodeGuard<'_>, buf: &[u8], pos: usize) -> FsResult<usize> {
        let node = node_of(ino)?;
        let mut body = node.body();
        let end = pos + buf.len();
        if body.content.len() < end {
            body.content.resize(end, 0);
        }
        body.content[pos..end].copy_from_slice(buf);
        ino.fsize = body.content.len();
        Ok(buf.len())
    }

    fn seek(&self, _ino: &mut InodeGuard<'_>, _pos: usize) -> FsResult<()> {
        // Any position is valid; reads past the end return zero bytes and
        // writes fill the gap with zeroes.
        Ok(())
    }

    fn sync(&self, _ino: &mut InodeGuard<'_>) -> FsResult<()> {
        Ok(())
    }

    fn read_symlink(&self, ino: &mut InodeGuard<'_>) -> FsResult<String> {
        let node = node_of(ino)?;
        let body = node.body();
        if !body.kind.contains(NodeType::SYMLINK) {
            return Err(FsError::InvalidArgument);
        }
        String::from_utf8(body.content.to_vec()).map_err(|_| FsError::InvalidArgument)
    }

    fn set_symlink(&self, ino: &mut InodeGuard<'_>, target: &str) -> FsResult<()> {
        let node = node_of(ino)?;
        let mut body = node.body();
        body.kind = NodeType::SYMLINK;
        body.content.clear();
        body.content.extend_from_slice(target.as_bytes());
        ino.itype = NodeType::SYMLINK;
        ino.fsize = target.len();
        Ok(())
    }
}

struct RamFileOps;

impl FileOps for RamFileOps {
    fn readdir(
        &self,
        _file: &OpenFile,
        ino: &mut InodeGuard<'_>,
        ctx: &mut crate::driver::DirContext<'_>,
    ) -> FsResult<bool> {
        let node = node_of(ino)?;
        let body = node.body();
        if !body.kind.contains(NodeType::DIRECTORY) {
            return Err(FsError::NotDirectory);
        }
        match body.entries.get(ctx.index()) {
            Some(entry) => {
                let kind = entry.node.body().kind;
                ctx.emit(&entry.name, kind);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

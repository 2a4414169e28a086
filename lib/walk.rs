//! The path walker: textual path → dnode.
//!
//! Resolution is an iterative scan over slash-separated components, each of
//! which is served from the name cache or populated through the owning
//! driver's `dir_lookup`. Symbolic links recurse with a shared scratch
//! buffer and a hard depth bound.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::trace;

use crate::cache::HashedName;
use crate::config::{NAME_MAXLEN, SYMLINK_DEPTH_MAX, WALK_ARENA_SIZE};
use crate::error::{FsError, FsResult};
use crate::node::{Dnode, NodeType};
use crate::vfs::Vfs;

bitflags! {
    /// Behavior switches for [`Vfs::walk`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WalkOptions: u32 {
        /// Stop at the last component: return its parent and hand the
        /// component name back through [`WalkOutcome::last`].
        const PARENT = 1 << 0;
        /// Create missing directories along the way.
        const MKPARENT = 1 << 1;
        /// Do not dereference a symlink appearing as the final component.
        const NOFOLLOW = 1 << 2;
        /// A leading `/` restarts from the starting dnode's file-system root
        /// instead of the system root.
        const FS_RELATIVE = 1 << 3;
    }
}

/// What a walk produced.
pub struct WalkOutcome {
    /// The resolved dnode (the last component's parent under `PARENT`).
    pub dnode: Arc<Dnode>,
    /// The unresolved final component, present only under `PARENT`.
    pub last: Option<HashedName>,
}

fn valid_name_byte(b: u8) -> bool {
    b >= 0x20 && b != 0x7f
}

impl Vfs {
    /// Resolve `path` starting at `start` (the system root when `None`).
    pub fn walk(
        &self,
        start: Option<&Arc<Dnode>>,
        path: &str,
        opts: WalkOptions,
    ) -> FsResult<WalkOutcome> {
        // One scratch buffer per top-level walk; symlink recursion levels
        // carve their component storage out of the tail.
        let mut arena = vec![0u8; WALK_ARENA_SIZE];
        self.walk_level(start, path, opts, 0, &mut arena, 0)
    }

    fn walk_level(
        &self,
        start: Option<&Arc<Dnode>>,
        path: &str,
        opts: WalkOptions,
        depth: usize,
        arena: &mut [u8],
        base: usize,
    ) -> FsResult<WalkOutcome> {
        if depth >= SYMLINK_DEPTH_MAX {
            return Err(FsError::NameTooLong);
        }

        let bytes = path.as_bytes();
        let absolute = bytes.first() == Some(&b'/');
        let mut current: Arc<Dnode> = match start {
            Some(s) if !absolute => Arc::clone(s),
            Some(s) if opts.contains(WalkOptions::FS_RELATIVE) => s
                .superblock()
                .and_then(|sb| sb.root())
                .ok_or(FsError::NotFound)?,
            _ => {
                assert!(
                    self.system_root().mount().is_some(),
                    "vfs: no root file system"
                );
                Arc::clone(self.system_root())
            }
        };

        let mut i = usize::from(absolute);
        let mut j = 0usize;

        loop {
            let c = bytes.get(i).copied();
            i += 1;

            if let Some(ch) = c {
                if ch != b'/' {
                    if j >= NAME_MAXLEN - 1 {
                        return Err(FsError::NameTooLong);
                    }
                    if !valid_name_byte(ch) {
                        return Err(FsError::InvalidArgument);
                    }
                    if base + j >= arena.len() {
                        return Err(FsError::NameTooLong);
                    }
                    arena[base + j] = ch;
                    j += 1;
                    continue;
                }
            }

            // Separator or end of path. Repeated slashes collapse.
            if j == 0 {
                if c.is_none() {
                    break;
                }
                continue;
            }

            let comp = std::str::from_utf8(&arena[base..base + j])
                .map_err(|_| FsError::InvalidArgument)?;
            let name = HashedName::new(comp);
            let at_end = bytes[i.min(bytes.len())..].iter().all(|&b| b == b'/');

            if at_end && opts.contains(WalkOptions::PARENT) {
                return Ok(WalkOutcome {
                    dnode: current,
                    last: Some(name),
                });
            }

            // A symlink in the middle of the path is expanded before its
            // children are consulted.
            current = self.expand_symlink(current, depth, arena, base + j + 1)?;
            current = self.walk_component(&current, &name, opts)?;

            j = 0;
            if at_end {
                break;
            }
        }

        if !opts.contains(WalkOptions::NOFOLLOW) {
            current = self.expand_symlink(current, depth, arena, base)?;
        }

        Ok(WalkOutcome {
            dnode: current,
            last: None,
        })
    }

    /// Dereference `dnode` when it is a symlink; identity otherwise.
    ///
    /// The target is resolved relative to the symlink's parent, and the
    /// resolved dnode is then rehashed under that parent so future walks
    /// short-circuit.
    fn expand_symlink(
        &self,
        dnode: Arc<Dnode>,
        depth: usize,
        arena: &mut [u8],
        next_base: usize,
    ) -> FsResult<Arc<Dnode>> {
        let Some(inode) = dnode.inode() else {
            return Ok(dnode);
        };

        let target = {
            let mut guard = self.lock_inode(&inode);
            if !guard.itype.contains(NodeType::SYMLINK) {
                return Ok(dnode);
            }
            let ops = inode.method_table().ok_or(FsError::NotSupported)?;
            ops.read_symlink(&mut guard)?
        };
        trace!(link = dnode.name().as_str(), target, "expanding symlink");

        let parent = dnode.parent();
        let out = self.walk_level(
            parent.as_ref(),
            &target,
            WalkOptions::empty(),
            depth + 1,
            arena,
            next_base,
        )?;

        // Reposition the resolved subtree under the symlink's parent.
        if let Some(p) = parent {
            if !Arc::ptr_eq(&out.dnode, &p) && out.dnode.is_hashed() {
                self.name_cache().rehash(&p, &out.dnode);
            }
        }
        Ok(out.dnode)
    }

    /// One step down: consult the dcache under `current`, falling through to
    /// the driver on a miss.
    fn walk_component(
        &self,
        current: &Arc<Dnode>,
        name: &HashedName,
        opts: WalkOptions,
    ) -> FsResult<Arc<Dnode>> {
        let serial = self.lock_dnode(current);

        if let Some(hit) = self.name_cache().lookup(current, name) {
            self.touch_dnode(&hit);
            return Ok(hit);
        }

        let inode = current.inode().ok_or(FsError::NotFound)?;
        let child = self.d_alloc(Some(current), name)?;

        let mut guard = self.lock_inode(&inode);
        let ops = inode.method_table().ok_or(FsError::NotSupported)?;
        let mut res = ops.dir_lookup(self, &mut guard, &child);
        if res == Err(FsError::NotFound) && opts.contains(WalkOptions::MKPARENT) {
            res = ops.mkdir(self, &mut guard, &child);
        }
        self.name_cache().add(current, &child);
        drop(guard);
        drop(serial);

        match res {
            Ok(()) => Ok(child),
            Err(e) => {
                self.d_free(&child);
                Err(e)
            }
        }
    }
}

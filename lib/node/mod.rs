//! The object graph: directory nodes, inodes, open files, superblocks.

mod dnode;
mod file;
mod inode;
mod superblock;

pub use dnode::Dnode;
pub use file::{OpenFile, OpenFlags};
pub use inode::{unix_now, Inode, InodeGuard, InodeState, NodeType};
pub use superblock::Superblock;

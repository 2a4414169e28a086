//! In-memory virtual file system core.
//!
//! This crate is the layer between user-visible file operations and concrete
//! file-system drivers: a unified name space built from cached directory
//! nodes and inodes, an iterative path walker with symlink expansion and
//! mount crossing, bounded caches drained by least-recently-used eviction,
//! and the per-object locking that serializes driver access.
//!
//! Everything hangs off one [`Vfs`] context:
//!
//! ```
//! use vfs_core::{OpenFlags, RamFs, Vfs};
//!
//! let vfs = Vfs::new();
//! vfs.register_fs(RamFs::new());
//! vfs.mount_root("ramfs").unwrap();
//!
//! let task = vfs.new_task();
//! let fd = vfs.open(&task, "/hello", OpenFlags::CREATE).unwrap();
//! vfs.write(&task, fd, b"hi").unwrap();
//! vfs.close(&task, fd).unwrap();
//! ```

pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod fd_table;
pub mod mount;
pub mod node;
pub mod pagecache;
pub mod ramfs;
pub mod syscall;
pub mod task;
pub mod vfs;
pub mod walk;

pub use cache::{HashedName, LruZone, NameCache};
pub use config::Tunables;
pub use driver::{DefaultFileOps, DirContext, FileOps, FileSystem, FsFlags, InodeOps, SuperOps};
pub use error::{FsError, FsResult};
pub use node::{Dnode, Inode, InodeGuard, InodeState, NodeType, OpenFile, OpenFlags, Superblock};
pub use ramfs::RamFs;
pub use syscall::{Dirent, Whence};
pub use task::Task;
pub use vfs::Vfs;
pub use walk::{WalkOptions, WalkOutcome};

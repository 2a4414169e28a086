//! Fixed limits and tunable capacities.

/// Longest permitted name of one path component, including the implicit
/// terminator slot. Names of up to `NAME_MAXLEN - 1` bytes are accepted.
pub const NAME_MAXLEN: usize = 128;

/// Number of buckets in the name cache and in each superblock's inode cache.
/// Must stay a power of two; bucket indices are masked with `HASH_MASK`.
pub const HASHTABLE_SIZE: usize = 512;

/// Mask folding a mixed 32-bit hash down to a bucket index.
pub const HASH_MASK: u32 = (HASHTABLE_SIZE - 1) as u32;

/// How many symbolic-link expansions a single walk may perform before the
/// resolution is abandoned with a name-too-long error.
pub const SYMLINK_DEPTH_MAX: usize = 16;

/// Size of the per-walk scratch buffer shared across symlink recursion
/// levels.
pub const WALK_ARENA_SIZE: usize = 2048;

/// Number of file-descriptor slots in each task's descriptor table.
pub const MAX_FD: usize = 32;

/// Page size used by the page cache.
pub const PAGE_SIZE: usize = 4096;

/// Deepest parent chain `getcwd`/`realpathat` will follow before reporting a
/// loop.
pub const PATH_DEPTH_MAX: usize = 64;

/// Capacity knobs for the bounded object caches.
///
/// The defaults suit a small system; tests shrink them to force eviction.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    /// Upper bound on cached directory nodes before eviction kicks in.
    pub dnode_zone_cap: usize,
    /// Upper bound on cached inodes before eviction kicks in.
    pub inode_zone_cap: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            dnode_zone_cap: 4096,
            inode_zone_cap: 4096,
        }
    }
}

//! The hashed name cache: parent-relative lookup of child dnodes.

use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHasher;
use tracing::trace;

use crate::config::{HASHTABLE_SIZE, HASH_MASK, NAME_MAXLEN};
use crate::node::Dnode;

/// A path component together with its full 32-bit hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedName {
    value: String,
    hash: u32,
}

impl HashedName {
    pub fn new(s: &str) -> Self {
        let mut value = String::with_capacity(NAME_MAXLEN);
        value.push_str(s);
        Self {
            hash: full_hash(&value),
            value,
        }
    }

    pub fn empty() -> Self {
        Self::new("")
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Recompute the hash after the value changed (rename path).
    pub(crate) fn rehash(&mut self) {
        self.hash = full_hash(&self.value);
    }
}

/// Full 32-bit hash of a component name, folded down from `FxHasher`.
fn full_hash(s: &str) -> u32 {
    let mut h = FxHasher::default();
    h.write(s.as_bytes());
    let wide = h.finish();
    (wide ^ (wide >> 32)) as u32
}

/// Mix the name hash with the parent's identity so same-named siblings of
/// different parents land on different chains, then fold the high half into
/// the low half.
fn mixed_hash(parent_token: u32, name_hash: u32) -> u32 {
    let h = name_hash.wrapping_add(parent_token);
    h ^ (h >> 16)
}

/// The dcache: a fixed-size bucket table keyed by `(parent, name hash)`.
///
/// Buckets own the `Arc` keeping cached dnodes alive. Comparison is on the
/// full mixed 32-bit hash only — a colliding pair resolves to whichever
/// entry was hashed first, a documented property of the design.
pub struct NameCache {
    buckets: Box<[Mutex<Vec<(u32, Arc<Dnode>)>>]>,
}

impl Default for NameCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NameCache {
    pub fn new() -> Self {
        let buckets = (0..HASHTABLE_SIZE)
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { buckets }
    }

    fn bucket(&self, idx: usize) -> MutexGuard<'_, Vec<(u32, Arc<Dnode>)>> {
        self.buckets[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Look `name` up under `parent`.
    ///
    /// `""` and `"."` resolve to the parent itself; `".."` resolves to the
    /// grandparent, or to the parent when it has none (the root).
    pub fn lookup(&self, parent: &Arc<Dnode>, name: &HashedName) -> Option<Arc<Dnode>> {
        if name.is_empty() || name.as_str() == "." {
            return Some(Arc::clone(parent));
        }
        if name.as_str() == ".." {
            return Some(parent.parent().unwrap_or_else(|| Arc::clone(parent)));
        }

        let mixed = mixed_hash(parent.token(), name.hash());
        let idx = (mixed & HASH_MASK) as usize;
        self.bucket(idx)
            .iter()
            .find(|(h, _)| *h == mixed)
            .map(|(_, d)| Arc::clone(d))
    }

    /// Bind `dnode` under `parent`: one cache reference, a strong parent
    /// back-link, a child-list entry, and a bucket entry.
    pub fn add(&self, parent: &Arc<Dnode>, dnode: &Arc<Dnode>) {
        dnode.grab();
        dnode.set_parent(Some(Arc::clone(parent)));
        parent.attach_child(dnode);

        let mixed = mixed_hash(parent.token(), dnode.name().hash());
        let idx = (mixed & HASH_MASK) as usize;
        self.bucket(idx).push((mixed, Arc::clone(dnode)));
        dnode.set_bucket_slot(Some(idx));
        trace!(
            name = dnode.name().as_str(),
            parent = parent.token(),
            "dcache add"
        );
    }

    /// Unbind `dnode` from its parent and bucket, dropping the cache's
    /// reference. No-op when the dnode is not hashed.
    pub fn remove(&self, dnode: &Arc<Dnode>) {
        let Some(parent) = dnode.parent() else {
            return;
        };
        debug_assert!(dnode.ref_count() >= 1, "cached dnode must hold a cache ref");

        if let Some(idx) = dnode.bucket_slot() {
            self.bucket(idx).retain(|(_, d)| !Arc::ptr_eq(d, dnode));
            dnode.set_bucket_slot(None);
        }
        parent.detach_child(dnode);
        dnode.set_parent(None);
        dnode.release();
        trace!(name = dnode.name().as_str(), "dcache remove");
    }

    /// Re-bind `dnode` under `new_parent` on a freshly computed hash.
    pub fn rehash(&self, new_parent: &Arc<Dnode>, dnode: &Arc<Dnode>) {
        self.remove(dnode);
        let mut name = dnode.name();
        name.rehash();
        dnode.set_name(name);
        self.add(new_parent, dnode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(token: u32, name: &str) -> Arc<Dnode> {
        Dnode::new(token, HashedName::new(name))
    }

    #[test]
    fn lookup_on_empty_cache_misses() {
        let cache = NameCache::new();
        let parent = dn(1, "");
        assert!(cache.lookup(&parent, &HashedName::new("x")).is_none());
    }

    #[test]
    fn empty_and_dot_resolve_to_the_parent() {
        let cache = NameCache::new();
        let parent = dn(1, "");
        let hit = cache.lookup(&parent, &HashedName::new(".")).unwrap();
        assert!(Arc::ptr_eq(&hit, &parent));
        let hit = cache.lookup(&parent, &HashedName::empty()).unwrap();
        assert!(Arc::ptr_eq(&hit, &parent));
    }

    #[test]
    fn dotdot_resolves_to_grandparent_or_self() {
        let cache = NameCache::new();
        let root = dn(1, "");
        let child = dn(2, "c");
        cache.add(&root, &child);

        let hit = cache.lookup(&child, &HashedName::new("..")).unwrap();
        assert!(Arc::ptr_eq(&hit, &root));
        // The root has no parent and answers for itself.
        let hit = cache.lookup(&root, &HashedName::new("..")).unwrap();
        assert!(Arc::ptr_eq(&hit, &root));
    }

    #[test]
    fn add_then_lookup_hits() {
        let cache = NameCache::new();
        let parent = dn(1, "");
        let child = dn(2, "name");
        cache.add(&parent, &child);

        let hit = cache.lookup(&parent, &HashedName::new("name")).unwrap();
        assert!(Arc::ptr_eq(&hit, &child));
    }

    #[test]
    fn add_takes_one_cache_reference() {
        let cache = NameCache::new();
        let parent = dn(1, "");
        let child = dn(2, "name");
        assert_eq!(child.ref_count(), 0);
        cache.add(&parent, &child);
        assert_eq!(child.ref_count(), 1);
        cache.remove(&child);
        assert_eq!(child.ref_count(), 0);
        assert!(child.parent().is_none());
    }

    #[test]
    fn remove_unhashes_the_binding() {
        let cache = NameCache::new();
        let parent = dn(1, "");
        let child = dn(2, "name");
        cache.add(&parent, &child);
        cache.remove(&child);
        assert!(cache.lookup(&parent, &HashedName::new("name")).is_none());
    }

    #[test]
    fn same_name_under_different_parents_does_not_collide() {
        let cache = NameCache::new();
        let root = dn(1, "");
        let p1 = dn(2, "p1");
        let p2 = dn(3, "p2");
        cache.add(&root, &p1);
        cache.add(&root, &p2);

        let c1 = dn(4, "x");
        let c2 = dn(5, "x");
        cache.add(&p1, &c1);
        cache.add(&p2, &c2);

        let hit1 = cache.lookup(&p1, &HashedName::new("x")).unwrap();
        let hit2 = cache.lookup(&p2, &HashedName::new("x")).unwrap();
        assert!(Arc::ptr_eq(&hit1, &c1));
        assert!(Arc::ptr_eq(&hit2, &c2));
    }

    #[test]
    fn rehash_moves_the_binding_to_the_new_parent() {
        let cache = NameCache::new();
        let root = dn(1, "");
        let p1 = dn(2, "p1");
        let p2 = dn(3, "p2");
        cache.add(&root, &p1);
        cache.add(&root, &p2);

        let child = dn(4, "x");
        cache.add(&p1, &child);
        cache.rehash(&p2, &child);

        assert!(cache.lookup(&p1, &HashedName::new("x")).is_none());
        let hit = cache.lookup(&p2, &HashedName::new("x")).unwrap();
        assert!(Arc::ptr_eq(&hit, &child));
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &p2));
    }
}

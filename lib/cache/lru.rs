//! Bounded object pools with least-recently-used eviction.

use std::sync::{Arc, Mutex, PoisonError};

use hashlink::LinkedHashMap;
use rustc_hash::FxBuildHasher;
use tracing::{debug, trace};

/// A recency zone: the ordered set of live objects of one kind, most
/// recently used at the back.
///
/// The zone is a structural owner — objects stay alive while listed here —
/// but eviction decisions belong to the caller-supplied try-evict predicate,
/// which inspects the object's reference accounting and performs the actual
/// teardown (including removing the object from this zone).
pub struct LruZone<T> {
    name: &'static str,
    capacity: usize,
    entries: Mutex<LinkedHashMap<u64, Arc<T>, FxBuildHasher>>,
}

impl<T> LruZone<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            entries: Mutex::new(LinkedHashMap::with_hasher(FxBuildHasher)),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, LinkedHashMap<u64, Arc<T>, FxBuildHasher>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a use: insert the object or move it to the most-recent end.
    pub fn touch(&self, key: u64, obj: &Arc<T>) {
        let mut entries = self.entries();
        let entry = entries.remove(&key).unwrap_or_else(|| Arc::clone(obj));
        entries.insert(key, entry);
    }

    /// Drop an object from the zone (it is being destroyed).
    pub fn remove(&self, key: u64) -> Option<Arc<T>> {
        self.entries().remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().len() == 0
    }

    /// Whether an allocation may proceed without eviction.
    pub fn has_room(&self) -> bool {
        self.entries().len() < self.capacity
    }

    /// Walk candidates from the least-recent end, applying `try_evict` until
    /// at least half of the current population has been freed or every
    /// candidate has been visited. Returns how many were freed.
    ///
    /// The predicate must return `true` only when it actually tore the
    /// object down (which removes it from this zone). Candidates are
    /// snapshotted first so the predicate can take object locks without
    /// holding the zone lock.
    pub fn evict_half(&self, mut try_evict: impl FnMut(&Arc<T>) -> bool) -> usize {
        let candidates: Vec<(u64, Arc<T>)> = {
            let entries = self.entries();
            entries.iter().map(|(k, v)| (*k, Arc::clone(v))).collect()
        };
        let target = candidates.len().div_ceil(2);
        let mut freed = 0usize;

        for (key, obj) in &candidates {
            if freed >= target {
                break;
            }
            if try_evict(obj) {
                trace!(zone = self.name, key, "evicted");
                freed += 1;
            }
        }

        debug!(
            zone = self.name,
            freed,
            remaining = self.len(),
            "eviction pass finished"
        );
        freed
    }
}

//! Caching primitives: the hashed name cache and the bounded recency zones.

mod dcache;
mod lru;

pub use dcache::{HashedName, NameCache};
pub use lru::LruZone;

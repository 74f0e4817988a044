//! Bounded LRU cache of verified image signatures

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::signature::Signature;

pub use podwarden_config::sigstore::DEFAULT_CACHE_CAPACITY;

/// Signatures recorded for one image reference
pub type CachedSignatures = Vec<Arc<dyn Signature>>;

/// Verification outcomes keyed by image reference.
///
/// Lookups promote the entry, so reads take the lock exclusively. Concurrent
/// misses for the same key each verify independently.
pub struct VerificationCache {
    entries: Mutex<LruCache<String, CachedSignatures>>,
}

impl VerificationCache {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedSignatures> {
        self.entries.lock().get(key).cloned()
    }

    /// Insert or replace `key`, evicting the least recently used entry when full.
    pub fn put(&self, key: impl Into<String>, signatures: CachedSignatures) {
        self.entries.lock().put(key.into(), signatures);
    }

    pub fn evict_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl Default for VerificationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for VerificationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

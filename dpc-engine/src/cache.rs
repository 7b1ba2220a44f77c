//! Bounded LRU caches used by the server
//!
//! Two caches with the same shape and different jobs: one remembers every
//! new-session timestamp so a replayed handshake creates nothing, the
//! other remembers the reply to each reverse poll so a retransmitted poll
//! gets the same answer without touching the upstream.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

/// Capacity of both caches
pub const CACHE_CAPACITY: usize = 1024 * 1024;

/// Replay-suppression cache of new-session timestamp strings
pub struct TimestampCache {
    inner: Mutex<LruCache<String, ()>>,
}

impl TimestampCache {
    /// Create a cache holding up to `capacity` timestamps
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(CACHE_CAPACITY).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record a timestamp, reporting whether it was already present
    pub fn seen(&self, timestamp: &str) -> bool {
        let mut cache = self.inner.lock().unwrap();
        if cache.contains(timestamp) {
            return true;
        }
        cache.put(timestamp.to_string(), ());
        false
    }
}

impl Default for TimestampCache {
    fn default() -> Self {
        Self::new(CACHE_CAPACITY)
    }
}

/// Cache of encoded replies to reverse polls, keyed by the stripped and
/// lowercased query name
pub struct ReplyCache {
    inner: Mutex<LruCache<String, String>>,
}

impl ReplyCache {
    /// Create a cache holding up to `capacity` replies
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(CACHE_CAPACITY).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up the cached reply for a stripped query name
    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.lock().unwrap().get(name).cloned()
    }

    /// Remember the reply for a stripped query name
    pub fn put(&self, name: &str, reply: String) {
        self.inner.lock().unwrap().put(name.to_string(), reply);
    }
}

impl Default for ReplyCache {
    fn default() -> Self {
        Self::new(CACHE_CAPACITY)
    }
}

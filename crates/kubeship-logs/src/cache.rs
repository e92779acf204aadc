//! Keyed cache with expiry that coalesces concurrent lookups
//!
//! Values are stored as shared futures: a caller arriving while the first
//! lookup for a key is still running awaits that same lookup instead of
//! starting another one. Resolved values (including errors) stay cached until
//! their TTL runs out. A zero TTL keeps the entry for the life of the cache.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A pending or resolved cache value
pub type CachedFuture<V> = Shared<BoxFuture<'static, V>>;

struct CacheEntry<V: Clone> {
    value: CachedFuture<V>,
    expires_at: Option<Instant>,
}

impl<V: Clone> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Thread-safe TTL cache of shared futures
pub struct TtlCache<V: Clone> {
    entries: Arc<Mutex<HashMap<String, CacheEntry<V>>>>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the cached value for `key`, or start computing it with `factory`
    ///
    /// `factory` is called at most once per miss, while the cache is locked:
    /// it must only build the future and must not use the cache itself. Nested
    /// lookups belong inside the returned future.
    pub fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> CachedFuture<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now) {
                return entry.value.clone();
            }
        }

        // Expired entries are dropped lazily, on the next miss
        entries.retain(|_, entry| !entry.is_expired(now));

        let value = factory().boxed().shared();
        let expires_at = if ttl.is_zero() { None } else { Some(now + ttl) };
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at,
            },
        );

        value
    }

    /// Forget `key`, so the next lookup computes it again
    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Forget `key` only while it still holds `value`
    ///
    /// A newer entry stored by another caller in the meantime is kept.
    pub fn remove_if_same(&self, key: &str, value: &CachedFuture<V>) {
        let mut entries = self.entries.lock();
        if entries
            .get(key)
            .is_some_and(|entry| entry.value.ptr_eq(value))
        {
            entries.remove(key);
        }
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, entry| !entry.is_expired(now));
    }

    /// Number of stored entries (expired ones included until purged)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<V> Default for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

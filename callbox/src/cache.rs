//! Time-bounded response cache.
//!
//! [`TtlCache`] maps a [`RequestKey`] to a successful response and the instant
//! it stops being fresh. Expiry is lazy: a read past the deadline removes the
//! entry and misses. [`TtlCache::sweep`] evicts expired entries in bulk and is
//! what the client's background sweeper calls.
//!
//! Deadlines use [`tokio::time::Instant`], so a paused test clock drives
//! expiry deterministically.

use std::sync::Arc;
use std::time::Duration;

use callbox_core::RequestKey;
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;

use crate::scheduler::deadline_after;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Shared TTL cache. Cloning shares the storage.
#[derive(Clone, Debug, Default)]
pub struct TtlCache {
    entries: Arc<DashMap<RequestKey, CacheEntry>>,
}

impl TtlCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    pub fn set(&self, key: RequestKey, value: Value, ttl: Duration) {
        let expires_at = deadline_after(ttl);
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Returns the fresh value for `key`, evicting it if it has expired.
    pub fn get(&self, key: &RequestKey) -> Option<Value> {
        let now = Instant::now();
        let value = {
            let entry = self.entries.get(key)?;
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        };
        if value.is_none() {
            trace!(%key, "evicting expired entry on read");
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        value
    }

    /// Removes the entry for `key`. Returns whether one existed.
    pub fn delete(&self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry whose endpoint starts with `prefix`.
    pub fn delete_by_endpoint(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !key.endpoint().starts_with(prefix));
        before.saturating_sub(self.entries.len())
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Removes every expired entry. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Keys currently stored, expired or not.
    pub fn keys(&self) -> Vec<RequestKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbox_core::{HttpMethod, Params};
    use serde_json::json;

    fn key(endpoint: &str) -> RequestKey {
        RequestKey::new(HttpMethod::Get, endpoint, &Params::new(), None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_then_expired() {
        let cache = TtlCache::new();
        cache.set(key("/a"), json!(1), Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(99)).await;
        assert_eq!(cache.get(&key("/a")), Some(json!(1)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&key("/a")), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_fresh_entries() {
        let cache = TtlCache::new();
        cache.set(key("/short"), json!("s"), Duration::from_millis(10));
        cache.set(key("/long"), json!("l"), Duration::from_secs(10));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.keys(), vec![key("/long")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_stays_fresh() {
        let cache = TtlCache::new();
        cache.set(key("/forever"), json!("kept"), Duration::MAX);

        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert_eq!(cache.get(&key("/forever")), Some(json!("kept")));
        assert_eq!(cache.sweep(), 0);
    }

    #[test]
    fn test_delete_by_endpoint_prefix() {
        let cache = TtlCache::new();
        let ttl = Duration::from_secs(60);
        cache.set(key("/users/1"), json!(1), ttl);
        cache.set(key("/users/2"), json!(2), ttl);
        cache.set(key("/posts"), json!(3), ttl);

        assert_eq!(cache.delete_by_endpoint("/users"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.delete(&key("/posts")));
        assert!(!cache.delete(&key("/posts")));
    }
}

//! TTL cache for processor results.
//!
//! Expired entries are dropped lazily on lookup and in bulk by
//! [`ResultCache::sweep_expired`]. Times come from the tokio clock so paused
//! test runtimes can drive expiry.

use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
pub struct ResultCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    // A panic while holding the lock leaves the map itself consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.data.clone()),
            None => None,
        }
    }

    pub fn insert(&self, key: String, data: V) {
        let now = Instant::now();
        self.entries().insert(
            key,
            CacheEntry {
                data,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        removed
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_on_access() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.insert("order-1".to_string(), 42);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("order-1"), Some(42));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("order-1"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = ResultCache::new(Duration::from_secs(5));
        cache.insert("old".to_string(), "a".to_string());
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.insert("new".to_string(), "b".to_string());
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.get("new"), Some("b".to_string()));

        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}

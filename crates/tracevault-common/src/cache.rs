//! Time-bounded write deduplication cache
//!
//! Writers that persist idempotent index rows (service names, operation
//! names) consult the cache before hitting the backend. A key present in the
//! cache was successfully written no more than `ttl` ago, so writing it again
//! is redundant.
//!
//! The cache stores no values, only the instant of the last successful
//! write. Expiry is passive: an entry older than `ttl` is treated as absent
//! on the next lookup and replaced by the next `mark_written`. Memory is
//! bounded by the cardinality of the key space, not by an eviction policy.
//!
//! Two writers racing on the same absent key may both observe a miss and
//! both reach the backend. The backend write overwrites the same row, so the
//! only cost is one extra write per race.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Presence/TTL cache suppressing redundant backend writes
#[derive(Debug)]
pub struct WriteCache<K: Eq + Hash> {
    ttl: Duration,
    entries: DashMap<K, Instant>,
}

impl<K: Eq + Hash> WriteCache<K> {
    /// Create a cache; a zero `ttl` disables caching entirely
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Configured time-to-live
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// False when the cache was created with a zero TTL
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// True if `key` is absent or expired. Records nothing.
    pub fn should_write(&self, key: &K) -> bool {
        self.should_write_at(key, Instant::now())
    }

    /// Same as [`should_write`](Self::should_write) evaluated at `now`
    pub fn should_write_at(&self, key: &K, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }
        self.entries
            .get(key)
            .is_none_or(|written_at| now.saturating_duration_since(*written_at) >= self.ttl)
    }

    /// Record a successful backend write of `key` at `now`.
    ///
    /// Call only after the backend write succeeded.
    pub fn mark_written(&self, key: K, now: Instant) {
        if !self.is_enabled() {
            return;
        }
        self.entries.insert(key, now);
    }

    /// Forget every recorded write
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of tracked keys, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no key was ever recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_absent_key_should_write() {
        let cache: WriteCache<String> = WriteCache::new(Duration::from_secs(60));
        assert!(cache.should_write(&"service-a".to_string()));
        // should_write is a pure read
        assert!(cache.is_empty());
    }

    #[test]
    fn test_written_key_suppressed_within_ttl() {
        let cache = WriteCache::new(Duration::from_secs(60));
        let now = Instant::now();
        cache.mark_written(("service-a", "Operation-b"), now);

        assert!(!cache.should_write_at(&("service-a", "Operation-b"), now));
        assert!(!cache.should_write_at(
            &("service-a", "Operation-b"),
            now + Duration::from_secs(59)
        ));
        assert!(cache.should_write_at(&("service-c", "Operation-b"), now));
    }

    #[test]
    fn test_expired_key_treated_as_absent() {
        let cache = WriteCache::new(Duration::from_secs(60));
        let now = Instant::now();
        cache.mark_written("k", now);

        let later = now + Duration::from_secs(60);
        assert!(cache.should_write_at(&"k", later));

        // Re-write after expiry creates a fresh window
        cache.mark_written("k", later);
        assert!(!cache.should_write_at(&"k", later + Duration::from_secs(30)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = WriteCache::new(Duration::ZERO);
        assert!(!cache.is_enabled());

        let now = Instant::now();
        cache.mark_written("k", now);
        assert!(cache.should_write_at(&"k", now));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_writers_distinct_keys() {
        let cache = Arc::new(WriteCache::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for j in 0..100u32 {
                        let key = (i, j);
                        assert!(cache.should_write(&key));
                        cache.mark_written(key, Instant::now());
                        assert!(!cache.should_write(&key));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 800);
    }
}

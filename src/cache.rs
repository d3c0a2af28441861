//! The best-effort counter cache.
//!
//! The cache holds one entry per counter name: the last aggregated sum,
//! with a version token for compare-and-swap and a bounded expiry. It is
//! never the system of record; every value here is reconstructible by
//! summing shard records, which is why the engine swallows every cache
//! failure it sees.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::Result;

/// A cached sum together with the version token needed for a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedCount {
    pub value: i64,
    pub version: u64,
}

pub trait CounterCache: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<i64>>;

    /// Like [`CounterCache::get`], but also returns the version token that a
    /// subsequent [`CounterCache::compare_and_swap`] must present.
    fn get_versioned(&self, name: &str) -> Result<Option<CachedCount>>;

    fn put(&self, name: &str, value: i64, ttl: Duration) -> Result<()>;

    /// Replaces the entry only if it still carries `expected_version`.
    /// Returns `Ok(false)` when the entry changed or disappeared since the
    /// version was observed.
    fn compare_and_swap(
        &self,
        name: &str,
        expected_version: u64,
        value: i64,
        ttl: Duration,
    ) -> Result<bool>;

    fn delete(&self, name: &str) -> Result<()>;
}

struct CacheEntry {
    value: i64,
    version: u64,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    next_version: u64,
}

/// In-process cache with LRU capacity bounds and per-entry expiry.
pub struct MemoryCache {
    inner: Mutex<CacheState>,
}

impl MemoryCache {
    /// Returns `None` when `capacity` is zero.
    pub fn new(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(|size| Self {
            inner: Mutex::new(CacheState {
                entries: LruCache::new(size),
                next_version: 1,
            }),
        })
    }
}

impl CounterCache for MemoryCache {
    fn get(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.get_versioned(name)?.map(|cached| cached.value))
    }

    fn get_versioned(&self, name: &str) -> Result<Option<CachedCount>> {
        let mut guard = self.inner.lock();
        match guard.entries.get(name) {
            Some(entry) if entry.is_expired() => {
                guard.entries.pop(name);
                Ok(None)
            }
            Some(entry) => Ok(Some(CachedCount {
                value: entry.value,
                version: entry.version,
            })),
            None => Ok(None),
        }
    }

    fn put(&self, name: &str, value: i64, ttl: Duration) -> Result<()> {
        let mut guard = self.inner.lock();
        let version = guard.next_version;
        guard.next_version += 1;
        guard.entries.put(
            name.to_string(),
            CacheEntry {
                value,
                version,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn compare_and_swap(
        &self,
        name: &str,
        expected_version: u64,
        value: i64,
        ttl: Duration,
    ) -> Result<bool> {
        let mut guard = self.inner.lock();
        match guard.entries.get(name) {
            Some(entry) if !entry.is_expired() && entry.version == expected_version => {
                let version = guard.next_version;
                guard.next_version += 1;
                guard.entries.put(
                    name.to_string(),
                    CacheEntry {
                        value,
                        version,
                        expires_at: Instant::now() + ttl,
                    },
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.inner.lock().entries.pop(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(MemoryCache::new(0).is_none());
        assert!(MemoryCache::new(1).is_some());
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = MemoryCache::new(16).unwrap();
        cache.put("c", 42, TTL).unwrap();
        assert_eq!(cache.get("c").unwrap(), Some(42));
        assert_eq!(cache.get("other").unwrap(), None);
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let cache = MemoryCache::new(16).unwrap();
        cache.put("c", 42, Duration::ZERO).unwrap();
        assert_eq!(cache.get("c").unwrap(), None);
    }

    #[test]
    fn swap_succeeds_only_with_current_version() {
        let cache = MemoryCache::new(16).unwrap();
        cache.put("c", 10, TTL).unwrap();
        let cached = cache.get_versioned("c").unwrap().unwrap();

        assert!(cache
            .compare_and_swap("c", cached.version, 11, TTL)
            .unwrap());
        assert_eq!(cache.get("c").unwrap(), Some(11));

        // The swap advanced the version, so the old token no longer works.
        assert!(!cache
            .compare_and_swap("c", cached.version, 12, TTL)
            .unwrap());
        assert_eq!(cache.get("c").unwrap(), Some(11));
    }

    #[test]
    fn swap_on_absent_entry_fails_without_seeding() {
        let cache = MemoryCache::new(16).unwrap();
        assert!(!cache.compare_and_swap("c", 1, 5, TTL).unwrap());
        assert_eq!(cache.get("c").unwrap(), None);
    }

    #[test]
    fn delete_evicts_entry() {
        let cache = MemoryCache::new(16).unwrap();
        cache.put("c", 42, TTL).unwrap();
        cache.delete("c").unwrap();
        assert_eq!(cache.get("c").unwrap(), None);
    }
}

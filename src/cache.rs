//! Bounded, idle-expiring lookup cache for archive ids.
//!
//! Backed by `moka`: entries not read for the idle period expire and the
//! cache never holds more than its capacity. Losing an entry only costs a
//! store round-trip.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;

/// Sizing of the two archive id caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub reports_capacity: usize,
    pub remarks_capacity: usize,
    pub idle: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            reports_capacity: 1000,
            remarks_capacity: 10_000,
            idle: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ArchiveCache<K, V> {
    inner: Cache<K, V>,
    lookups: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> ArchiveCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, idle: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity as u64)
                .time_to_idle(idle)
                .build(),
            lookups: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key`, or run `create` and cache its
    /// result. Concurrent callers for the same key wait for a single
    /// `create` and share its outcome. A failing `create` leaves the key
    /// absent.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        create: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, Arc<E>>
    where
        E: Send + Sync + 'static,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.inner.try_get_with(key, || {
            self.misses.fetch_add(1, Ordering::Relaxed);
            create()
        })
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    /// Number of live entries, after pending evictions have been applied.
    pub fn len(&self) -> usize {
        self.inner.run_pending_tasks();
        self.inner.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.lookups.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            size: self.len(),
            hits: lookups.saturating_sub(misses),
            misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    const LONG: Duration = Duration::from_secs(600);

    #[test]
    fn test_creates_once_then_hits() {
        let cache: ArchiveCache<String, i64> = ArchiveCache::new(10, LONG);
        let calls = AtomicUsize::new(0);
        let create = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(7)
        };

        assert_eq!(cache.get_or_try_insert_with("a".into(), create).unwrap(), 7);
        assert_eq!(cache.get_or_try_insert_with("a".into(), create).unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                size: 1,
                hits: 1,
                misses: 1
            }
        );
    }

    #[test]
    fn test_failed_create_is_not_cached() {
        let cache: ArchiveCache<u32, u32> = ArchiveCache::new(10, LONG);
        let err = cache.get_or_try_insert_with(1, || Err("boom")).unwrap_err();
        assert_eq!(*err, "boom");
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_try_insert_with(1, || Ok::<_, &str>(5)).unwrap(), 5);
    }

    #[test]
    fn test_idle_entries_expire() {
        let cache: ArchiveCache<u32, u32> = ArchiveCache::new(10, Duration::from_millis(50));
        cache.get_or_try_insert_with(1, || Ok::<_, ()>(1)).unwrap();
        assert_eq!(cache.get(&1), Some(1));

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(cache.get(&1), None);

        let value = cache.get_or_try_insert_with(1, || Ok::<_, ()>(10)).unwrap();
        assert_eq!(value, 10);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_reads_keep_entries_alive() {
        let cache: ArchiveCache<u32, u32> = ArchiveCache::new(10, Duration::from_secs(1));
        cache.get_or_try_insert_with(1, || Ok::<_, ()>(1)).unwrap();
        for _ in 0..6 {
            std::thread::sleep(Duration::from_millis(250));
            assert_eq!(cache.get(&1), Some(1));
        }
    }

    #[test]
    fn test_size_stays_within_capacity() {
        let cache: ArchiveCache<u32, u32> = ArchiveCache::new(100, LONG);
        for key in 0..1_000 {
            cache.get_or_try_insert_with(key, || Ok::<_, ()>(key)).unwrap();
        }
        assert!(cache.len() <= 100, "len {}", cache.len());
        assert_eq!(cache.stats().misses, 1_000);
    }

    #[test]
    fn test_concurrent_creation_is_at_most_once() {
        let cache: Arc<ArchiveCache<u32, u32>> = Arc::new(ArchiveCache::new(10, LONG));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .get_or_try_insert_with(9, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(5));
                            Ok::<_, ()>(99)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 99);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

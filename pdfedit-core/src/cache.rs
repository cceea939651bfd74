//! Recency-ordered caches for rendered pages and thumbnails.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

pub const DEFAULT_PAGE_CACHE_CAPACITY: usize = 20;
pub const DEFAULT_THUMBNAIL_CACHE_CAPACITY: usize = 100;

const PAGE_PREFIX: &str = "page";
const THUMBNAIL_PREFIX: &str = "thumb";

/// Key for a full-page render. The scale is fixed at two decimals so that
/// float noise below 0.005 maps onto the same entry.
pub fn page_key(page_index: usize, scale: f32, rotation: u16) -> String {
    format!("{PAGE_PREFIX}:{page_index}:{scale:.2}:{rotation}")
}

pub fn thumbnail_key(page_index: usize, rotation: u16) -> String {
    format!("{THUMBNAIL_PREFIX}:{page_index}:{rotation}")
}

fn key_page_index(key: &str) -> Option<usize> {
    key.split(':').nth(1)?.parse().ok()
}

/// Fixed-capacity LRU map guarded by a single mutex so render workers and the
/// coordinating thread can share it.
pub struct PageCache<V> {
    inner: Mutex<LruCache<String, V>>,
}

impl<V: Clone> PageCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a hit and promotes it to most recently used.
    pub fn try_get(&self, key: &str) -> Option<V> {
        let mut cache = self.inner.lock();
        let hit = cache.get(key).cloned();
        trace!(key, hit = hit.is_some(), "cache lookup");
        hit
    }

    /// Inserts or replaces, evicting the least recently used entry when full.
    pub fn set(&self, key: String, value: V) {
        let mut cache = self.inner.lock();
        if let Some((evicted, _)) = cache.push(key, value) {
            trace!(key = %evicted, "displaced cache entry");
        }
    }

    /// Drops every variant (scale, rotation) cached for one page.
    pub fn invalidate_page(&self, page_index: usize) {
        let mut cache = self.inner.lock();
        let stale: Vec<String> = cache
            .iter()
            .filter(|(key, _)| key_page_index(key) == Some(page_index))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn evicts_least_recently_used_not_least_recently_inserted() {
        let cache = PageCache::new(3);
        cache.set("a".into(), 1);
        cache.set("b".into(), 2);
        cache.set("c".into(), 3);

        assert_eq!(cache.try_get("a"), Some(1));
        cache.set("d".into(), 4);

        assert_eq!(cache.try_get("b"), None);
        assert_eq!(cache.try_get("a"), Some(1));
        assert_eq!(cache.try_get("c"), Some(3));
        assert_eq!(cache.try_get("d"), Some(4));
        assert_eq!(cache.count(), 3);
    }

    #[test]
    fn replacing_existing_key_promotes_it() {
        let cache = PageCache::new(2);
        cache.set("a".into(), 1);
        cache.set("b".into(), 2);
        cache.set("a".into(), 10);
        cache.set("c".into(), 3);

        assert_eq!(cache.try_get("a"), Some(10));
        assert_eq!(cache.try_get("b"), None);
    }

    #[test]
    fn count_never_exceeds_capacity() {
        let cache = PageCache::new(5);
        for i in 0..200usize {
            cache.set(format!("k{}", i % 17), i);
            if i % 3 == 0 {
                cache.try_get(&format!("k{}", i % 5));
            }
            assert!(cache.count() <= cache.capacity());
        }
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let cache = PageCache::new(0);
        cache.set("a".into(), 1);
        cache.set("b".into(), 2);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn page_keys_are_fixed_precision() {
        assert_eq!(page_key(3, 1.0, 90), page_key(3, 1.00, 90));
        assert_ne!(page_key(3, 1.0, 90), page_key(3, 1.01, 90));
        assert_ne!(page_key(3, 1.0, 90), page_key(3, 1.0, 180));
        assert_ne!(page_key(3, 1.0, 90), page_key(4, 1.0, 90));
        // Below the two-decimal precision the scales share an entry.
        assert_eq!(page_key(3, 1.0, 0), page_key(3, 1.004, 0));
        assert_ne!(page_key(1, 1.0, 0), thumbnail_key(1, 0));
    }

    #[test]
    fn invalidate_page_removes_all_variants_of_that_page_only() {
        let cache = PageCache::new(10);
        cache.set(page_key(1, 1.0, 0), 1);
        cache.set(page_key(1, 2.0, 90), 2);
        cache.set(page_key(11, 1.0, 0), 3);
        cache.set(page_key(2, 1.0, 0), 4);

        cache.invalidate_page(1);

        assert_eq!(cache.count(), 2);
        assert_eq!(cache.try_get(&page_key(11, 1.0, 0)), Some(3));
        assert_eq!(cache.try_get(&page_key(2, 1.0, 0)), Some(4));
    }

    #[test]
    fn concurrent_access_keeps_bound() {
        let cache = Arc::new(PageCache::new(8));
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100usize {
                        cache.set(page_key(i, 1.0, 0), worker * 1000 + i);
                        cache.try_get(&page_key(i / 2, 1.0, 0));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(cache.count() <= 8);
    }
}

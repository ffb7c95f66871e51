pub mod lru;
pub mod table;

pub use lru::LruCache;
pub use table::TableCache;

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

const NUM_SHARDS: usize = 16;

/// A sharded LRU cache safe for arbitrary concurrent access.
///
/// Keys hash to one of 16 independently locked shards, so lookups of
/// unrelated keys don't serialize. [`get_or_load`](ShardedCache::get_or_load)
/// additionally deduplicates concurrent misses on the same key: exactly one
/// caller runs the loader while the others park on the shard's condvar and
/// pick up the winner's entry — racing reads of one uncached block hit the
/// disk once, not once per reader.
pub struct ShardedCache<K, V> {
    shards: Vec<Shard<K, V>>,
}

struct Shard<K, V> {
    lru: Mutex<LruCache<K, V>>,
    inflight: Mutex<HashSet<K>>,
    loaded: Condvar,
}

impl<K: Eq + Hash + Clone, V: Clone> ShardedCache<K, V> {
    /// `capacity` is total charge, divided evenly across shards.
    pub fn new(capacity: usize) -> Self {
        let per_shard = (capacity / NUM_SHARDS).max(1);
        let shards = (0..NUM_SHARDS)
            .map(|_| Shard {
                lru: Mutex::new(LruCache::new(per_shard)),
                inflight: Mutex::new(HashSet::new()),
                loaded: Condvar::new(),
            })
            .collect();
        ShardedCache { shards }
    }

    fn shard(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.shard(key).lru.lock().get(key)
    }

    pub fn insert(&self, key: K, value: V, charge: usize) {
        self.shard(&key).lru.lock().insert(key, value, charge);
    }

    pub fn erase(&self, key: &K) {
        self.shard(key).lru.lock().erase(key);
    }

    /// Cached value for `key`, or the result of `load`, cached under the
    /// given charge. Concurrent callers for the same key do the work once.
    pub fn get_or_load<F>(&self, key: K, charge: usize, load: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let shard = self.shard(&key);
        loop {
            if let Some(v) = shard.lru.lock().get(&key) {
                return Ok(v);
            }
            let mut inflight = shard.inflight.lock();
            if inflight.contains(&key) {
                // Someone else is loading this key; wait for the verdict,
                // then re-check the cache (or take over on their failure).
                shard.loaded.wait(&mut inflight);
                continue;
            }
            inflight.insert(key.clone());
            break;
        }

        let result = load();

        if let Ok(v) = &result {
            shard.lru.lock().insert(key.clone(), v.clone(), charge);
        }
        let mut inflight = shard.inflight.lock();
        inflight.remove(&key);
        shard.loaded.notify_all();
        drop(inflight);

        result
    }

    /// Entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lru.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total charge across all shards.
    pub fn usage(&self) -> usize {
        self.shards.iter().map(|s| s.lru.lock().usage()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn get_or_load_caches() {
        let cache: ShardedCache<u64, u64> = ShardedCache::new(1024);
        let loads = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_load(7, 1, || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(49)
                })
                .unwrap();
            assert_eq!(v, 49);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn load_failure_not_cached() {
        let cache: ShardedCache<u64, u64> = ShardedCache::new(1024);
        let err = cache
            .get_or_load(1, 1, || Err::<u64, _>(Error::Corruption("boom".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
        // Next caller retries and can succeed
        let v = cache.get_or_load(1, 1, || Ok(5)).unwrap();
        assert_eq!(v, 5);
    }

    #[test]
    fn concurrent_same_key_loads_once() {
        let cache: Arc<ShardedCache<u64, u64>> = Arc::new(ShardedCache::new(1024));
        let loads = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                std::thread::spawn(move || {
                    cache
                        .get_or_load(42, 1, || {
                            loads.fetch_add(1, Ordering::SeqCst);
                            // Hold the load long enough for others to pile up
                            std::thread::sleep(std::time::Duration::from_millis(50));
                            Ok(4242)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4242);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrelated_keys_coexist() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(16 * 1024);
        for i in 0..100u64 {
            cache.insert(i, format!("v{i}"), 1);
        }
        for i in 0..100u64 {
            assert_eq!(cache.get(&i), Some(format!("v{i}")));
        }
    }
}

//! LRU caches of in-flight fetches.
//!
//! A [`MemoCache`] stores the shared future of a fetch rather than its resolved value, so a
//! second caller asking for a key while the first fetch is still running awaits the same
//! operation. Dropping one waiter never cancels the fetch for the others; the cached future
//! keeps it resumable. Entries older than the max age are misses, failed fetches are evicted so
//! the next caller retries.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use tracing::{debug, trace, warn};

use crate::error::CogResult;
use crate::xyz_tile::TileIndex;

type SharedFetch<V> = Shared<BoxFuture<'static, CogResult<V>>>;

struct CacheEntry<V> {
    fetch: SharedFetch<V>,
    created: Instant,
}

/// Capacity- and age-bounded cache of shared fetches.
pub struct MemoCache<K, V> {
    name: &'static str,
    max_age: Duration,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
}

impl<K, V> MemoCache<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Send + Sync + 'static,
{
    /// A capacity of zero is treated as one.
    pub fn new(name: &'static str, capacity: usize, max_age: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            max_age,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the cached value for `key`, or run `fetch` once and share it with every
    /// concurrent caller of the same key.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> CogResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CogResult<V>> + Send + 'static,
    {
        let shared = {
            let mut entries = self.lock();
            let cached = entries
                .get(&key)
                .map(|entry| (entry.fetch.clone(), entry.created.elapsed() <= self.max_age));
            match cached {
                Some((fetch, true)) => {
                    trace!(cache = self.name, ?key, "cache hit");
                    fetch
                }
                stale => {
                    if stale.is_some() {
                        debug!(cache = self.name, ?key, "cache entry expired");
                    } else {
                        debug!(cache = self.name, ?key, "cache miss");
                    }
                    let shared = fetch().boxed().shared();
                    entries.put(
                        key.clone(),
                        CacheEntry {
                            fetch: shared.clone(),
                            created: Instant::now(),
                        },
                    );
                    shared
                }
            }
        };

        let result = shared.clone().await;
        if let Err(err) = &result {
            warn!(cache = self.name, ?key, error = %err, "fetch failed, evicting");
            self.evict_if_same(&key, &shared);
        }
        result
    }

    /// Drop the entry for `key`, if any.
    pub fn invalidate(&self, key: &K) {
        self.lock().pop(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.lock()
            .peek(key)
            .is_some_and(|entry| entry.created.elapsed() <= self.max_age)
    }

    // A newer fetch may already have replaced the failed one.
    fn evict_if_same(&self, key: &K, failed: &SharedFetch<V>) {
        let mut entries = self.lock();
        if entries
            .peek(key)
            .is_some_and(|entry| entry.fetch.ptr_eq(failed))
        {
            entries.pop(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Key of one decoded tile: `(url, tile size, z, x, y)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub url: Arc<str>,
    pub tile_size: usize,
    pub tile: TileIndex,
}

impl TileKey {
    #[must_use]
    pub fn new(url: &str, tile_size: usize, tile: TileIndex) -> Self {
        Self {
            url: Arc::from(url),
            tile_size,
            tile,
        }
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.url, self.tile_size, self.tile)
    }
}

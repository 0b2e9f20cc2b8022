use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use log::trace;
use moka::notification::RemovalCause;

use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::range::ByteRange;

/// Default byte bound for a cache.
pub const DEFAULT_CACHE_MAX_WEIGHT: u64 = 256 * 1024 * 1024;

/// Fixed per-entry weight charged on top of the value, covering the key
/// and cache bookkeeping.
const KEY_OVERHEAD: usize = 64;

/// Byte-weight bound and expiration settings shared by the range and
/// directory caches.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Upper bound on the total weight (key overhead + value bytes).
    pub max_weight_bytes: u64,
    /// Drop entries untouched for this long.
    pub expire_after_access: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_weight_bytes: DEFAULT_CACHE_MAX_WEIGHT,
            expire_after_access: None,
        }
    }
}

/// Counters for one cache. Hit/miss/load counts are exact; entry count and
/// weight are read from the cache and may lag briefly behind recent
/// operations (see [`RangeCache::run_pending_tasks`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that required a load.
    pub misses: u64,
    /// Loader executions (coalesced waiters share one load).
    pub loads: u64,
    /// Entries removed by the size bound or expiration.
    pub evictions: u64,
    /// Entries currently cached.
    pub entries: u64,
    /// Total weight of cached entries in bytes.
    pub weight_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    archive: Arc<str>,
    range: ByteRange,
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

/// Shared get-or-load plumbing for both cache flavors.
#[derive(Debug, Clone)]
struct LoadingCache<V: Clone + Send + Sync + 'static> {
    cache: moka::future::Cache<CacheKey, V>,
    stats: Arc<StatCounters>,
}

impl<V: Clone + Send + Sync + 'static> LoadingCache<V> {
    fn new(policy: &CachePolicy, weigh: fn(&V) -> usize) -> Result<Self> {
        if policy.max_weight_bytes == 0 {
            return Err(Error::InvalidConfig("cache max_weight_bytes must be positive"));
        }
        let stats = Arc::new(StatCounters::default());
        let evictions = Arc::clone(&stats);
        let mut builder = moka::future::Cache::builder()
            .max_capacity(policy.max_weight_bytes)
            .weigher(move |key: &CacheKey, value: &V| {
                u32::try_from(KEY_OVERHEAD + key.archive.len() + weigh(value))
                    .unwrap_or(u32::MAX)
            })
            .support_invalidation_closures()
            .eviction_listener(move |_key, _value, cause| {
                if cause != RemovalCause::Explicit {
                    evictions.evictions.fetch_add(1, Ordering::Relaxed);
                }
            });
        if let Some(tti) = policy.expire_after_access {
            builder = builder.time_to_idle(tti);
        }
        Ok(Self {
            cache: builder.build(),
            stats,
        })
    }

    /// Atomic per-key get-or-load: at most one `load` runs per key at a
    /// time; concurrent requesters await the in-flight load and share its
    /// outcome. Failed loads are propagated to every waiter and are not
    /// cached.
    async fn get_or_load<F>(&self, archive: &Arc<str>, range: ByteRange, load: F) -> Result<V>
    where
        F: Future<Output = Result<V>>,
    {
        let key = CacheKey {
            archive: Arc::clone(archive),
            range,
        };
        if let Some(value) = self.cache.get(&key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let stats = Arc::clone(&self.stats);
        self.cache
            .try_get_with(key, async move {
                stats.loads.fetch_add(1, Ordering::Relaxed);
                trace!("loading {archive} range {range}");
                load.await
            })
            .await
            .map_err(Error::from)
    }

    fn invalidate_archive(&self, archive: &str) {
        let archive = archive.to_owned();
        // Cannot fail: invalidation closures are enabled at build time.
        let _ = self
            .cache
            .invalidate_entries_if(move |key, _| key.archive.as_ref() == archive);
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            loads: self.stats.loads.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
            weight_bytes: self.cache.weighted_size(),
        }
    }

    async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Process-scoped cache of raw byte blocks keyed by `(archive, range)`.
///
/// Shared by every [`CachingReader`](crate::CachingReader) that is handed a
/// clone, so distinct readers of the same archive reuse each other's
/// blocks. Values are immutable slices; eviction is approximately LRU
/// under the configured weight bound.
#[derive(Clone)]
pub struct RangeCache {
    inner: LoadingCache<Bytes>,
}

impl RangeCache {
    /// Build a cache with the given policy.
    pub fn new(policy: &CachePolicy) -> Result<Self> {
        Ok(Self {
            inner: LoadingCache::new(policy, Bytes::len)?,
        })
    }

    pub(crate) async fn get_or_load<F>(
        &self,
        archive: &Arc<str>,
        range: ByteRange,
        load: F,
    ) -> Result<Bytes>
    where
        F: Future<Output = Result<Bytes>>,
    {
        self.inner.get_or_load(archive, range, load).await
    }

    /// Drop every entry belonging to `archive`.
    pub fn invalidate_archive(&self, archive: &str) {
        self.inner.invalidate_archive(archive);
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    /// Flush pending maintenance so `stats()` reflects recent operations.
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl Default for RangeCache {
    fn default() -> Self {
        // The default policy is always valid.
        #[expect(clippy::unwrap_used)]
        let cache = Self::new(&CachePolicy::default()).unwrap();
        cache
    }
}

/// Process-scoped cache of decoded directories keyed by the on-disk extent
/// of the compressed directory.
///
/// Shared across [`PmTilesReader`](crate::PmTilesReader) instances that
/// present the same archive id, so a traversal burst decompresses and
/// decodes each directory once.
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    inner: LoadingCache<Directory>,
}

impl DirectoryCache {
    /// Build a cache with the given policy.
    pub fn new(policy: &CachePolicy) -> Result<Self> {
        Ok(Self {
            inner: LoadingCache::new(policy, Directory::weight)?,
        })
    }

    pub(crate) async fn get_or_load<F>(
        &self,
        archive: &Arc<str>,
        range: ByteRange,
        load: F,
    ) -> Result<Directory>
    where
        F: Future<Output = Result<Directory>>,
    {
        self.inner.get_or_load(archive, range, load).await
    }

    /// Drop every directory belonging to `archive`.
    pub fn invalidate_archive(&self, archive: &str) {
        self.inner.invalidate_archive(archive);
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    /// Flush pending maintenance so `stats()` reflects recent operations.
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl Default for DirectoryCache {
    fn default() -> Self {
        // The default policy is always valid.
        #[expect(clippy::unwrap_used)]
        let cache = Self::new(&CachePolicy::default()).unwrap();
        cache
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    fn archive() -> Arc<str> {
        Arc::from("mem://archive")
    }

    #[tokio::test]
    async fn loads_once_per_key() {
        let cache = RangeCache::default();
        let archive = archive();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load(&archive, ByteRange::new(0, 4), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Bytes::from_static(b"data"))
                })
                .await
                .unwrap();
            assert_eq!(value, Bytes::from_static(b"data"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn failed_loads_are_not_cached() {
        let cache = RangeCache::default();
        let archive = archive();
        let range = ByteRange::new(0, 4);

        let err = cache
            .get_or_load(&archive, range, async {
                Err(Error::InvalidDirectory("boom"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDirectory("boom")));

        // The next load runs again and can succeed.
        let value = cache
            .get_or_load(&archive, range, async { Ok(Bytes::from_static(b"ok")) })
            .await
            .unwrap();
        assert_eq!(value, Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn concurrent_requesters_share_one_load() {
        let cache = Arc::new(RangeCache::default());
        let archive = archive();
        let calls = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let archive = Arc::clone(&archive);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_load(&archive, ByteRange::new(64, 64), async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok(Bytes::from_static(b"block"))
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Bytes::from_static(b"block"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_archive_is_scoped() {
        let cache = RangeCache::default();
        let first: Arc<str> = Arc::from("mem://first");
        let second: Arc<str> = Arc::from("mem://second");
        let range = ByteRange::new(0, 1);

        for archive in [&first, &second] {
            cache
                .get_or_load(archive, range, async { Ok(Bytes::from_static(b"x")) })
                .await
                .unwrap();
        }

        cache.invalidate_archive(&first);
        cache.run_pending_tasks().await;

        // Only the first archive reloads.
        cache
            .get_or_load(&second, range, async {
                Err(Error::InvalidDirectory("should not reload"))
            })
            .await
            .unwrap();
        let reloaded = cache
            .get_or_load(&first, range, async { Ok(Bytes::from_static(b"y")) })
            .await
            .unwrap();
        assert_eq!(reloaded, Bytes::from_static(b"y"));
    }

    #[tokio::test]
    async fn weight_bound_evicts() {
        let cache = RangeCache::new(&CachePolicy {
            max_weight_bytes: 4096,
            expire_after_access: None,
        })
        .unwrap();
        let archive = archive();

        for i in 0..8u64 {
            cache
                .get_or_load(&archive, ByteRange::new(i * 1024, 1024), async {
                    Ok(Bytes::from(vec![0u8; 1024]))
                })
                .await
                .unwrap();
        }
        cache.run_pending_tasks().await;

        let stats = cache.stats();
        assert!(stats.weight_bytes <= 4096);
        assert!(stats.evictions > 0);
    }

    #[test]
    fn rejects_zero_weight_bound() {
        assert!(matches!(
            RangeCache::new(&CachePolicy {
                max_weight_bytes: 0,
                expire_after_access: None,
            }),
            Err(Error::InvalidConfig(_))
        ));
    }
}

//! The two-tier read path: memory, then durable, then a single-flight fetch

use crate::cache::{
    config::CacheConfig,
    durable::{DurableStore, StorageBackend, StoreHealth},
    entry::CacheEntry,
    fetcher::Fetcher,
    memory::MemoryTier,
    prefetch::{AdjacencyPrefetcher, PrefetchTarget, Sequence},
    single_flight::{FetchOutcome, LoadRole, SingleFlightLoader},
    types::{CacheLayer, CacheMetrics, CacheStats, CacheValue, Category, LoadPriority, MetricsRecorder, ScopedKey},
};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Content cache facade
///
/// Reads consult the memory tier, then the durable store, then the fetcher
/// through a single-flight loader. A successful fetch is written to the
/// durable store and then to memory before any waiter sees it; a failed fetch
/// writes nothing.
///
/// ```no_run
/// use chapter_cache::cache::{CacheConfig, Category, ContentCache, FnFetcher};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn example() -> chapter_cache::Result<()> {
/// let fetcher = FnFetcher::new(|_category: Category, key: String| async move {
///     Ok(json!({ "key": key }))
/// });
/// let cache = ContentCache::new(CacheConfig::default(), Arc::new(fetcher))?;
///
/// let chapter = cache.get(&Category::CONTENT, "gen:1").await?;
/// println!("{}", chapter);
/// # Ok(())
/// # }
/// ```
pub struct ContentCache {
    inner: Arc<CacheInner>,
    prefetcher: AdjacencyPrefetcher,
}

/// State shared with the in-flight fetch futures and prefetch tasks
struct CacheInner {
    config: CacheConfig,
    memory: MemoryTier,
    durable: DurableStore,
    loader: SingleFlightLoader,
    fetcher: Arc<dyn Fetcher>,
    metrics: MetricsRecorder,
}

impl ContentCache {
    /// Build a cache on the configured storage location
    pub fn new(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        config.validate()?;
        let durable = DurableStore::open(&config);
        Ok(Self::from_parts(config, durable, fetcher))
    }

    /// Build a cache on an explicit storage backend
    pub fn with_backend(
        config: CacheConfig,
        backend: Arc<dyn StorageBackend>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let durable = DurableStore::with_backend(backend, &config);
        Ok(Self::from_parts(config, durable, fetcher))
    }

    fn from_parts(config: CacheConfig, durable: DurableStore, fetcher: Arc<dyn Fetcher>) -> Self {
        info!(
            "Content cache ready (memory capacity: {}, durable: {})",
            config.memory.capacity,
            durable.health()
        );

        let prefetcher = AdjacencyPrefetcher::new(&config.prefetch);
        Self {
            inner: Arc::new(CacheInner {
                memory: MemoryTier::new(config.memory.clone()),
                durable,
                loader: SingleFlightLoader::new(),
                fetcher,
                metrics: MetricsRecorder::default(),
                config,
            }),
            prefetcher,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Which backing the durable store ended up on
    pub fn store_health(&self) -> StoreHealth {
        self.inner.durable.health()
    }

    /// Read through both tiers, fetching from the configured fetcher on a miss
    ///
    /// Fresh entries get the category's default TTL.
    pub async fn get(&self, category: &Category, key: &str) -> Result<CacheValue> {
        self.inner
            .read_through(category, key, None, LoadPriority::Foreground)
            .await
    }

    /// Read through both tiers, calling `fetch_fn` on a miss
    ///
    /// `fetch_fn` runs only if this caller leads the fetch for the key.
    /// `ttl` overrides the category default for the written entry.
    pub async fn get_or_load<F, Fut>(
        &self,
        category: &Category,
        key: &str,
        fetch_fn: F,
        ttl: Option<Duration>,
    ) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        if let Some(value) = self.inner.lookup(category, key).await {
            return Ok(value);
        }
        self.inner
            .load(category, key, fetch_fn, ttl, LoadPriority::Foreground)
            .await
    }

    /// Read both tiers without fetching
    pub async fn get_cached(&self, category: &Category, key: &str) -> Result<CacheValue> {
        self.inner
            .lookup(category, key)
            .await
            .ok_or_else(|| CacheError::NotFound {
                category: category.to_string(),
                key: key.to_string(),
            })
    }

    /// Store a value in both tiers
    pub async fn set(&self, category: &Category, key: &str, value: CacheValue, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.inner.config.ttl_for(category));
        self.inner
            .store(category, CacheEntry::new(key.to_string(), value, ttl))
            .await;
    }

    /// Drop a key from both tiers
    ///
    /// A fetch already in flight for the key is detached and its result is
    /// never stored, so the next read always goes back to the fetcher.
    pub async fn invalidate(&self, category: &Category, key: &str) {
        let scoped = ScopedKey::new(category.clone(), key);
        self.inner.loader.forget(&scoped).await;
        self.inner.memory.invalidate(&scoped).await;
        self.inner.durable.delete(category, key).await;
        debug!("Invalidated {}", scoped);
    }

    /// Drop every key of a category from both tiers
    ///
    /// Returns the count of whichever tier held more.
    pub async fn clear_category(&self, category: &Category) -> usize {
        let memory = self.inner.memory.clear_category(category).await;
        let durable = self.inner.durable.clear(category).await;
        memory.max(durable)
    }

    /// Per-tier counts for a category
    pub async fn stats(&self, category: &Category) -> CacheStats {
        let inner = &self.inner;
        CacheStats {
            category: category.clone(),
            memory_entries: inner.memory.len_in(category).await,
            durable_entries: inner.durable.len(category).await,
            durable_capacity: inner.durable.max_entries(category),
            memory_total: inner.memory.len().await,
            memory_capacity: inner.memory.capacity(),
            in_flight: inner.loader.in_flight_count(),
        }
    }

    /// Read-path counters since construction
    pub fn metrics(&self) -> CacheMetrics {
        self.inner.metrics.snapshot()
    }

    /// Warm the neighbours of `position` in the background
    pub fn notify_focused(&self, sequence: &Sequence, position: u32) -> Vec<JoinHandle<()>> {
        let target: Arc<dyn PrefetchTarget> = Arc::new(Warmer(Arc::clone(&self.inner)));
        self.prefetcher.notify_focused(target, sequence, position)
    }

    /// Read the document at `position` and prefetch its neighbours on success
    ///
    /// A position outside `1..=total` is `NotFound` without a fetch.
    pub async fn get_in_sequence(&self, sequence: &Sequence, position: u32) -> Result<CacheValue> {
        let key = sequence.key_for(position);
        if !sequence.contains(position) {
            return Err(CacheError::NotFound {
                category: sequence.category.to_string(),
                key,
            });
        }

        let value = self.get(&sequence.category, &key).await?;
        self.notify_focused(sequence, position);
        Ok(value)
    }

    /// Remove expired entries from both tiers
    pub async fn sweep_expired(&self) -> usize {
        let durable = self.inner.durable.sweep_expired().await;
        let memory = self.inner.memory.remove_expired().await;
        durable + memory
    }
}

impl CacheInner {
    /// Memory, then durable; a durable hit is copied into memory
    async fn lookup(&self, category: &Category, key: &str) -> Option<CacheValue> {
        let scoped = ScopedKey::new(category.clone(), key);

        if let Some(value) = self.memory.get(&scoped).await {
            self.metrics.record_hit(CacheLayer::Memory);
            return Some(value);
        }

        let entry = self.durable.get(category, key).await?;
        debug!("Durable hit: {}", scoped);
        self.metrics.record_hit(CacheLayer::Durable);
        self.memory
            .set(scoped, entry.value.clone(), entry.expires_at)
            .await;
        Some(entry.value)
    }

    async fn read_through(
        self: &Arc<Self>,
        category: &Category,
        key: &str,
        ttl: Option<Duration>,
        priority: LoadPriority,
    ) -> Result<CacheValue> {
        if let Some(value) = self.lookup(category, key).await {
            return Ok(value);
        }

        let fetcher = Arc::clone(&self.fetcher);
        let fetch_category = category.clone();
        let fetch_key = key.to_string();
        let fetch_fn = move || async move { fetcher.fetch(&fetch_category, &fetch_key).await };

        self.load(category, key, fetch_fn, ttl, priority).await
    }

    /// Single-flight fetch; the leader writes both tiers before settling,
    /// unless an invalidate detached it first
    async fn load<F, Fut>(
        self: &Arc<Self>,
        category: &Category,
        key: &str,
        fetch_fn: F,
        ttl: Option<Duration>,
        priority: LoadPriority,
    ) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        let scoped = ScopedKey::new(category.clone(), key);
        let fetch_inner = Arc::clone(self);
        let commit_inner = Arc::clone(self);
        let category = category.clone();
        let key = key.to_string();

        let (outcome, role) = self
            .loader
            .load_and_commit(
                scoped.clone(),
                move || {
                    let fetch = fetch_fn();
                    async move {
                        let outcome = fetch.await;
                        match &outcome {
                            Ok(_) => fetch_inner.metrics.record_hit(CacheLayer::Fetcher),
                            Err(_) => fetch_inner.metrics.record_fetch_failure(),
                        }
                        outcome
                    }
                },
                move |value| async move {
                    let ttl = ttl.unwrap_or_else(|| commit_inner.config.ttl_for(&category));
                    commit_inner
                        .store(&category, CacheEntry::new(key, value, ttl))
                        .await;
                },
            )
            .await;

        if role == LoadRole::Joined {
            self.metrics.record_join();
        }

        match outcome {
            Ok(value) => {
                debug!("Loaded {} ({})", scoped, priority);
                Ok(value)
            }
            Err(e) => {
                warn!("Fetch failed for {} ({}): {}", scoped, priority, e);
                Err(CacheError::FetchFailed(e))
            }
        }
    }

    /// Durable first, then memory
    async fn store(&self, category: &Category, entry: CacheEntry) {
        let scoped = ScopedKey::new(category.clone(), entry.key.clone());
        let value = entry.value.clone();
        let expires_at = entry.expires_at;

        self.durable.put_entry(category, entry).await;
        let evicted = self.memory.set(scoped, value, expires_at).await;
        if !evicted.is_empty() {
            debug!("Memory tier evicted {} entries", evicted.len());
        }
    }
}

/// Prefetch entry point into the shared state
struct Warmer(Arc<CacheInner>);

#[async_trait]
impl PrefetchTarget for Warmer {
    async fn is_warm(&self, key: &ScopedKey) -> bool {
        self.0.loader.is_in_flight(key) || self.0.memory.contains_key(key).await
    }

    async fn warm(&self, key: ScopedKey) {
        self.0.metrics.record_prefetch();
        if let Err(e) = self
            .0
            .read_through(&key.category, &key.key, None, LoadPriority::Background)
            .await
        {
            debug!("Prefetch of {} failed: {}", key, e);
        }
    }
}

/// Periodically sweep expired entries from both tiers
///
/// Returns at once when `storage.enable_auto_sweep` is off.
pub async fn start_auto_sweep(cache: Arc<ContentCache>) {
    if !cache.config().storage.enable_auto_sweep {
        info!("Automatic cache sweep disabled by configuration");
        return;
    }

    let interval = cache.config().storage.sweep_interval;

    info!("Starting automatic cache sweep task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let removed = cache.sweep_expired().await;
        if removed > 0 {
            debug!("Auto sweep removed {} entries", removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::{CategoryConfig, StorageLocation};
    use crate::cache::fetcher::FnFetcher;
    use crate::error::FetchError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetcher(calls: Arc<AtomicUsize>) -> Arc<dyn Fetcher> {
        Arc::new(FnFetcher::new(move |category: Category, key: String| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "category": category.as_str(), "key": key, "fetch": n }))
            }
        }))
    }

    fn test_config() -> CacheConfig {
        CacheConfig::builder()
            .storage_location(StorageLocation::InMemory)
            .memory_capacity(10)
            .build()
    }

    #[tokio::test]
    async fn test_miss_fetches_and_populates_both_tiers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ContentCache::new(test_config(), counting_fetcher(calls.clone())).unwrap();

        let value = cache.get(&Category::CONTENT, "gen:1").await.unwrap();
        assert_eq!(value["key"], "gen:1");

        let stats = cache.stats(&Category::CONTENT).await;
        assert_eq!(stats.memory_entries, 1);
        assert_eq!(stats.durable_entries, 1);
        assert_eq!(stats.in_flight, 0);

        cache.get(&Category::CONTENT, "gen:1").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = cache.metrics();
        assert_eq!(metrics.fetches, 1);
        assert_eq!(metrics.memory_hits, 1);
    }

    #[tokio::test]
    async fn test_durable_hit_repopulates_memory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ContentCache::new(test_config(), counting_fetcher(calls.clone())).unwrap();

        cache.get(&Category::CONTENT, "gen:1").await.unwrap();
        let scoped = ScopedKey::new(Category::CONTENT, "gen:1");
        cache.inner.memory.invalidate(&scoped).await;

        cache.get(&Category::CONTENT, "gen:1").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.inner.memory.contains_key(&scoped).await);
        assert_eq!(cache.metrics().durable_hits, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_writes_nothing() {
        let cache = ContentCache::new(test_config(), counting_fetcher(Arc::new(AtomicUsize::new(0)))).unwrap();

        let err = cache
            .get_or_load(
                &Category::CONTENT,
                "gen:1",
                || async { Err(FetchError::Remote { status: 503, message: "unavailable".to_string() }) },
                None,
            )
            .await
            .unwrap_err();

        assert!(err.is_fetch_failure());
        let stats = cache.stats(&Category::CONTENT).await;
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.durable_entries, 0);
        assert_eq!(cache.metrics().fetch_failures, 1);
    }

    #[tokio::test]
    async fn test_get_cached_reports_not_found() {
        let cache = ContentCache::new(test_config(), counting_fetcher(Arc::new(AtomicUsize::new(0)))).unwrap();

        let err = cache.get_cached(&Category::CONTENT, "gen:1").await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));

        cache.set(&Category::CONTENT, "gen:1", json!("body"), None).await;
        assert_eq!(cache.get_cached(&Category::CONTENT, "gen:1").await.unwrap(), json!("body"));
    }

    #[tokio::test]
    async fn test_ttl_override_expires_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ContentCache::new(test_config(), counting_fetcher(calls.clone())).unwrap();

        cache
            .set(&Category::LOCATION, "here", json!(1), Some(Duration::from_millis(50)))
            .await;
        assert_eq!(cache.get(&Category::LOCATION, "here").await.unwrap(), json!(1));

        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.get(&Category::LOCATION, "here").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ContentCache::new(test_config(), counting_fetcher(calls.clone())).unwrap();

        cache.get(&Category::CONTENT, "gen:1").await.unwrap();
        cache.invalidate(&Category::CONTENT, "gen:1").await;
        cache.invalidate(&Category::CONTENT, "gen:1").await;

        let value = cache.get(&Category::CONTENT, "gen:1").await.unwrap();
        assert_eq!(value["fetch"], 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_category_leaves_others() {
        let cache = ContentCache::new(test_config(), counting_fetcher(Arc::new(AtomicUsize::new(0)))).unwrap();
        cache.set(&Category::CONTENT, "a", json!(1), None).await;
        cache.set(&Category::CONTENT, "b", json!(2), None).await;
        cache.set(&Category::AUXILIARY, "a", json!(3), None).await;

        assert_eq!(cache.clear_category(&Category::CONTENT).await, 2);
        assert!(cache.get_cached(&Category::CONTENT, "a").await.is_err());
        assert!(cache.get_cached(&Category::AUXILIARY, "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_expired_both_tiers() {
        let cache = ContentCache::new(test_config(), counting_fetcher(Arc::new(AtomicUsize::new(0)))).unwrap();
        cache
            .set(&Category::CONTENT, "short", json!(1), Some(Duration::from_millis(20)))
            .await;
        cache.set(&Category::CONTENT, "long", json!(2), None).await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.sweep_expired().await, 2);
        let stats = cache.stats(&Category::CONTENT).await;
        assert_eq!(stats.memory_entries, 1);
        assert_eq!(stats.durable_entries, 1);
    }

    #[tokio::test]
    async fn test_custom_category_uses_fallback_limits() {
        let config = CacheConfig::builder()
            .storage_location(StorageLocation::InMemory)
            .fallback_category(CategoryConfig::new(Duration::from_secs(60), 1))
            .build();
        let cache = ContentCache::new(config, counting_fetcher(Arc::new(AtomicUsize::new(0)))).unwrap();
        let notes = Category::new("notes");

        cache.set(&notes, "a", json!(1), None).await;
        cache.set(&notes, "b", json!(2), None).await;

        let stats = cache.stats(&notes).await;
        assert_eq!(stats.durable_capacity, 1);
        assert_eq!(stats.durable_entries, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = CacheConfig::builder().memory_capacity(0).build();
        let result = ContentCache::new(config, counting_fetcher(Arc::new(AtomicUsize::new(0))));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}

//! Persistent, category-partitioned store with per-entry expiry
//!
//! The store sits on a [`StorageBackend`] chosen once at construction by
//! [`open_backend`]: SQLite when it opens, flat JSON files when it does not,
//! and a no-op backing when neither is usable. Every backend error is logged
//! and absorbed here; reads degrade to misses and writes to no-ops, because
//! everything in this tier can be fetched again.

mod flat_file;
mod sqlite;

pub use flat_file::FlatFileBackend;
pub use sqlite::SqliteBackend;

use crate::cache::{
    config::{CacheConfig, StorageLocation},
    entry::CacheEntry,
    types::{CacheKey, CacheValue, Category},
};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// File name of the SQLite database inside the storage directory
pub const SQLITE_FILE_NAME: &str = "content-cache.db";

/// Directory of the flat-file fallback inside the storage directory
pub const FLAT_FILE_DIR: &str = "kv";

/// Backing mechanism for the durable store
///
/// Implementations serialize their own writes. Calls are blocking; the store
/// runs them on the blocking thread pool.
pub trait StorageBackend: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Health reported when the store is built on this backing directly
    fn health(&self) -> StoreHealth {
        StoreHealth::Primary
    }

    /// Fetch a row regardless of expiry
    fn get(&self, category: &Category, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or overwrite a row
    fn put(&self, category: &Category, entry: &CacheEntry) -> Result<()>;

    /// Remove a row
    fn delete(&self, category: &Category, key: &str) -> Result<()>;

    /// Remove every row of a category, returning how many went
    fn clear(&self, category: &Category) -> Result<usize>;

    /// Rows in a category, expired or not
    fn count(&self, category: &Category) -> Result<usize>;

    /// Rows in a category with `expires_at > now`
    fn count_live(&self, category: &Category, now: DateTime<Utc>) -> Result<usize>;

    /// Keys of a category ordered oldest-created first
    fn keys(&self, category: &Category) -> Result<Vec<CacheKey>>;

    /// Delete oldest-created rows until at most `keep` remain
    fn evict_oldest(&self, category: &Category, keep: usize) -> Result<usize>;

    /// Delete rows of every category with `expires_at <= now`
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Backing that stores nothing; used when no persistent mechanism opened
#[derive(Debug, Default)]
pub struct NullBackend;

impl StorageBackend for NullBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn health(&self) -> StoreHealth {
        StoreHealth::Unavailable
    }

    fn get(&self, _category: &Category, _key: &str) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn put(&self, _category: &Category, _entry: &CacheEntry) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _category: &Category, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self, _category: &Category) -> Result<usize> {
        Ok(0)
    }

    fn count(&self, _category: &Category) -> Result<usize> {
        Ok(0)
    }

    fn count_live(&self, _category: &Category, _now: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }

    fn keys(&self, _category: &Category) -> Result<Vec<CacheKey>> {
        Ok(Vec::new())
    }

    fn evict_oldest(&self, _category: &Category, _keep: usize) -> Result<usize> {
        Ok(0)
    }

    fn sweep_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}

/// Which backing the store ended up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreHealth {
    /// Primary engine (SQLite)
    Primary,

    /// Fallback flat-file mechanism
    Degraded,

    /// Nothing opened; operations are no-ops
    Unavailable,

    /// Persistence switched off by configuration
    Disabled,
}

impl fmt::Display for StoreHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreHealth::Primary => write!(f, "primary"),
            StoreHealth::Degraded => write!(f, "degraded"),
            StoreHealth::Unavailable => write!(f, "unavailable"),
            StoreHealth::Disabled => write!(f, "disabled"),
        }
    }
}

/// Pick a backing for `location`, falling back as far as needed
pub fn open_backend(location: &StorageLocation) -> (Arc<dyn StorageBackend>, StoreHealth) {
    match location {
        StorageLocation::Disabled => {
            info!("Durable store disabled by configuration; cache is memory-only");
            (Arc::new(NullBackend), StoreHealth::Disabled)
        }
        StorageLocation::InMemory => match SqliteBackend::open_in_memory() {
            Ok(backend) => (Arc::new(backend), StoreHealth::Primary),
            Err(e) => {
                error!("{}", CacheError::StoreUnavailable(e.to_string()));
                (Arc::new(NullBackend), StoreHealth::Unavailable)
            }
        },
        StorageLocation::Directory(dir) => open_directory(dir),
    }
}

fn open_directory(dir: &Path) -> (Arc<dyn StorageBackend>, StoreHealth) {
    let primary_error = match std::fs::create_dir_all(dir)
        .map_err(CacheError::from)
        .and_then(|_| SqliteBackend::open(&dir.join(SQLITE_FILE_NAME)))
    {
        Ok(backend) => return (Arc::new(backend), StoreHealth::Primary),
        Err(e) => e,
    };

    match FlatFileBackend::open(dir.join(FLAT_FILE_DIR)) {
        Ok(backend) => {
            warn!(
                "{}",
                CacheError::StoreDegraded {
                    fallback: backend.name().to_string(),
                    reason: primary_error.to_string(),
                }
            );
            (Arc::new(backend), StoreHealth::Degraded)
        }
        Err(fallback_error) => {
            error!(
                "{}",
                CacheError::StoreUnavailable(format!(
                    "sqlite: {}; flat-file: {}",
                    primary_error, fallback_error
                ))
            );
            (Arc::new(NullBackend), StoreHealth::Unavailable)
        }
    }
}

/// Durable tier of the cache
pub struct DurableStore {
    backend: Arc<dyn StorageBackend>,
    health: StoreHealth,
    limits: BTreeMap<Category, usize>,
    fallback_limit: usize,
}

impl DurableStore {
    /// Open the configured backing
    pub fn open(config: &CacheConfig) -> Self {
        let (backend, health) = open_backend(&config.storage.location);
        info!(
            "Durable store ready (backing: {}, health: {})",
            backend.name(),
            health
        );
        Self::from_parts(backend, health, config)
    }

    /// Use an explicit backing; health comes from the backing itself
    pub fn with_backend(backend: Arc<dyn StorageBackend>, config: &CacheConfig) -> Self {
        let health = backend.health();
        Self::from_parts(backend, health, config)
    }

    fn from_parts(backend: Arc<dyn StorageBackend>, health: StoreHealth, config: &CacheConfig) -> Self {
        Self {
            backend,
            health,
            limits: config
                .categories
                .iter()
                .map(|(category, limits)| (category.clone(), limits.max_entries))
                .collect(),
            fallback_limit: config.fallback_category.max_entries,
        }
    }

    /// Backing in use
    pub fn health(&self) -> StoreHealth {
        self.health
    }

    /// Entry limit for a category
    pub fn max_entries(&self, category: &Category) -> usize {
        self.limits
            .get(category)
            .copied()
            .unwrap_or(self.fallback_limit)
    }

    /// Get an unexpired entry; expired rows are deleted on the way
    pub async fn get(&self, category: &Category, key: &str) -> Option<CacheEntry> {
        let category_owned = category.clone();
        let key_owned = key.to_string();

        let result = self
            .run("get", move |backend| {
                let entry = match backend.get(&category_owned, &key_owned)? {
                    Some(entry) => entry,
                    None => return Ok(None),
                };
                if entry.is_expired() {
                    backend.delete(&category_owned, &key_owned)?;
                    debug!("Durable entry expired: {}/{}", category_owned, key_owned);
                    return Ok(None);
                }
                Ok(Some(entry))
            })
            .await;

        match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Durable get {}/{} failed, treating as miss: {}", category, key, e);
                None
            }
        }
    }

    /// Write an entry expiring `ttl` from now, then enforce the category limit
    pub async fn set(&self, category: &Category, key: &str, value: CacheValue, ttl: Duration) {
        self.put_entry(category, CacheEntry::new(key.to_string(), value, ttl))
            .await
    }

    /// Write a prepared entry, then enforce the category limit
    pub async fn put_entry(&self, category: &Category, entry: CacheEntry) {
        let category_owned = category.clone();
        let key = entry.key.clone();
        let keep = self.max_entries(category);

        let result = self
            .run("set", move |backend| {
                backend.put(&category_owned, &entry)?;
                if backend.count(&category_owned)? > keep {
                    backend.evict_oldest(&category_owned, keep)
                } else {
                    Ok(0)
                }
            })
            .await;

        match result {
            Ok(0) => {}
            Ok(evicted) => debug!(
                "Evicted {} oldest durable entries from {} (limit {})",
                evicted, category, keep
            ),
            Err(e) => warn!("Durable set {}/{} dropped: {}", category, key, e),
        }
    }

    /// Remove an entry
    pub async fn delete(&self, category: &Category, key: &str) {
        let category_owned = category.clone();
        let key_owned = key.to_string();
        if let Err(e) = self
            .run("delete", move |backend| backend.delete(&category_owned, &key_owned))
            .await
        {
            warn!("Durable delete {}/{} failed: {}", category, key, e);
        }
    }

    /// Remove every entry of a category
    pub async fn clear(&self, category: &Category) -> usize {
        let category_owned = category.clone();
        match self
            .run("clear", move |backend| backend.clear(&category_owned))
            .await
        {
            Ok(count) => {
                info!("Cleared {} durable entries from {}", count, category);
                count
            }
            Err(e) => {
                warn!("Durable clear {} failed: {}", category, e);
                0
            }
        }
    }

    /// Delete expired entries of all categories
    pub async fn sweep_expired(&self) -> usize {
        match self
            .run("sweep", |backend| backend.sweep_expired(Utc::now()))
            .await
        {
            Ok(count) => {
                if count > 0 {
                    info!("Swept {} expired durable entries", count);
                }
                count
            }
            Err(e) => {
                warn!("Durable sweep failed: {}", e);
                0
            }
        }
    }

    /// Unexpired rows held for a category
    pub async fn len(&self, category: &Category) -> usize {
        let category_owned = category.clone();
        self.run("count", move |backend| backend.count_live(&category_owned, Utc::now()))
            .await
            .unwrap_or_else(|e| {
                warn!("Durable count {} failed: {}", category, e);
                0
            })
    }

    /// Keys held for a category, oldest first
    pub async fn keys(&self, category: &Category) -> Vec<CacheKey> {
        let category_owned = category.clone();
        self.run("keys", move |backend| backend.keys(&category_owned))
            .await
            .unwrap_or_else(|e| {
                warn!("Durable keys {} failed: {}", category, e);
                Vec::new()
            })
    }

    /// Internal: run a backend call on the blocking pool
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StorageBackend) -> Result<T> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(|e| CacheError::Storage(format!("{} task failed: {}", op, e)))?
    }
}

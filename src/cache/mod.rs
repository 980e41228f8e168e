//! # Two-Tier Content Cache
//!
//! This module implements the caching and prefetch layer of a reading client
//! whose content lives behind remote, read-mostly APIs.
//!
//! ## Features
//!
//! - **Memory Tier**: bounded LRU map with pinned priority keys
//! - **Durable Store**: SQLite-backed, survives restarts, per-entry TTL and
//!   per-category oldest-first limits; falls back to flat JSON files
//! - **Single-Flight Loading**: concurrent misses for one key share one fetch
//! - **Adjacency Prefetch**: focusing position `k` warms `k-1` and `k+1`
//!
//! ## Read path
//!
//! - Layer 1: memory tier
//! - Layer 2: durable store (hit is copied into memory)
//! - Layer 3: single-flight fetch, written to both tiers on success
//!
//! ## Example
//!
//! ```rust
//! use chapter_cache::cache::{CacheConfig, Category, ContentCache, FnFetcher, StorageLocation};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .storage_location(StorageLocation::InMemory)
//!     .memory_capacity(50)
//!     .priority_keys(["chapter:gen:1"])
//!     .build();
//!
//! let fetcher = FnFetcher::new(|_category: Category, key: String| async move {
//!     Ok(json!({ "key": key }))
//! });
//! let cache = ContentCache::new(config, Arc::new(fetcher))?;
//!
//! // First read fetches, later reads are served from memory
//! let value = cache.get(&Category::CONTENT, "chapter:gen:1").await?;
//! println!("{}", value);
//!
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod durable;
pub mod entry;
pub mod facade;
pub mod fetcher;
pub mod integration;
pub mod memory;
pub mod prefetch;
pub mod single_flight;
pub mod types;

pub use config::{
    CacheConfig, CacheConfigBuilder, CategoryConfig, MemoryTierConfig, PrefetchConfig,
    StorageConfig, StorageLocation,
};
pub use durable::{
    open_backend, DurableStore, FlatFileBackend, NullBackend, SqliteBackend, StorageBackend,
    StoreHealth,
};
pub use entry::{CacheEntry, MemoryRecord};
pub use facade::{start_auto_sweep, ContentCache};
pub use fetcher::{FnFetcher, Fetcher};
pub use integration::{
    chapter_key, parse_chapter_key, CacheKeyBuilder, Chapter, ChapterCache, ChapterSection,
    ContentKind,
};
pub use memory::MemoryTier;
pub use prefetch::{candidates, AdjacencyPrefetcher, PrefetchTarget, Sequence};
pub use single_flight::{FetchOutcome, LoadRole, SingleFlightLoader};
pub use types::{
    CacheKey, CacheLayer, CacheMetrics, CacheStats, CacheValue, Category, LoadPriority, ScopedKey,
};

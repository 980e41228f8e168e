//! # Chapter Cache (chapter-cache)
//!
//! Content caching and prefetch layer for a reading client.
//!
//! ## Features
//!
//! - Two tiers: a bounded in-memory LRU and a durable SQLite store
//! - Per-entry TTL, per-category capacity and default TTL
//! - Transparent fallback to flat files when SQLite cannot be opened
//! - Single-flight deduplication of concurrent cache misses
//! - Background prefetch of neighbouring chapters
//! - Storage failures are logged and absorbed; only fetch failures reach callers
//!
//! ## Reading chapters
//!
//! ```no_run
//! use chapter_cache::{CacheConfig, ChapterCache, Category, FetchError, FnFetcher};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     chapter_cache::telemetry::init_tracing();
//!
//!     let fetcher = FnFetcher::new(|_category: Category, key: String| async move {
//!         // Call the remote API here
//!         Err::<serde_json::Value, _>(FetchError::Missing(key))
//!     });
//!
//!     let chapters = ChapterCache::new(CacheConfig::reader("/tmp/reader-cache"), Arc::new(fetcher))?;
//!
//!     // Loads chapter 5 and warms 4 and 6 in the background
//!     let chapter = chapters.open_chapter("gen", 5, 50).await?;
//!     println!("{} sections", chapter.sections.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration from the environment
//!
//! ```no_run
//! use chapter_cache::CacheConfig;
//!
//! // Reads CHAPTER_CACHE_* variables, loading .env first if present
//! let config = CacheConfig::from_env().expect("valid cache configuration");
//! println!("memory capacity: {}", config.memory.capacity);
//! ```

pub mod cache;
pub mod error;
pub mod telemetry;

// Re-export main types for convenience
pub use cache::{
    start_auto_sweep, CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey, CacheKeyBuilder,
    CacheMetrics, CacheStats, CacheValue, Category, CategoryConfig, Chapter, ChapterCache,
    ChapterSection, ContentCache, ContentKind, Fetcher, FnFetcher, Sequence, StorageLocation,
    StoreHealth,
};
pub use error::{CacheError, FetchError, Result};

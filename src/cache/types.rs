//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache key type - document identifier within a category
pub type CacheKey = String;

/// Cache value type - a structured snapshot of remote content
pub type CacheValue = serde_json::Value;

/// Namespace with its own capacity limit and default TTL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(Cow<'static, str>);

impl Category {
    /// Chapter bodies
    pub const CONTENT: Category = Category(Cow::Borrowed("content"));

    /// Book metadata, tables of contents, translations list
    pub const AUXILIARY: Category = Category(Cow::Borrowed("auxiliary"));

    /// Location lookups
    pub const LOCATION: Category = Category(Cow::Borrowed("location"));

    /// Create a custom category
    pub fn new(name: impl Into<String>) -> Self {
        Category(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        match name {
            "content" => Category::CONTENT,
            "auxiliary" => Category::AUXILIARY,
            "location" => Category::LOCATION,
            other => Category::new(other),
        }
    }
}

/// A key scoped to its category
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopedKey {
    pub category: Category,
    pub key: CacheKey,
}

impl ScopedKey {
    pub fn new(category: Category, key: impl Into<CacheKey>) -> Self {
        Self {
            category,
            key: key.into(),
        }
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.key)
    }
}

/// Scheduling class of a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPriority {
    /// A reader is waiting on the result
    Foreground,

    /// Cache warming; the result is discarded
    Background,
}

impl fmt::Display for LoadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPriority::Foreground => write!(f, "foreground"),
            LoadPriority::Background => write!(f, "background"),
        }
    }
}

/// Which tier answered a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLayer {
    /// In-process bounded map
    Memory,

    /// Persistent store
    Durable,

    /// Remote fetch through the single-flight loader
    Fetcher,
}

impl fmt::Display for CacheLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheLayer::Memory => write!(f, "memory"),
            CacheLayer::Durable => write!(f, "durable"),
            CacheLayer::Fetcher => write!(f, "fetcher"),
        }
    }
}

/// Per-category tier sizes, computed on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Category the counts refer to
    pub category: Category,

    /// Resident MemoryTier records in this category
    pub memory_entries: usize,

    /// Unexpired-or-unswept DurableStore rows in this category
    pub durable_entries: usize,

    /// Configured durable limit for this category
    pub durable_capacity: usize,

    /// Total MemoryTier records across categories
    pub memory_total: usize,

    /// Configured MemoryTier capacity
    pub memory_capacity: usize,

    /// Fetches currently in flight (all categories)
    pub in_flight: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ category: {}, memory: {} ({}/{} total), durable: {}/{}, in_flight: {} }}",
            self.category,
            self.memory_entries,
            self.memory_total,
            self.memory_capacity,
            self.durable_entries,
            self.durable_capacity,
            self.in_flight
        )
    }
}

/// Read-path counters, updated atomically by the facade
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    joined: AtomicU64,
    prefetches: AtomicU64,
}

impl MetricsRecorder {
    pub(crate) fn record_hit(&self, layer: CacheLayer) {
        match layer {
            CacheLayer::Memory => self.memory_hits.fetch_add(1, Ordering::Relaxed),
            CacheLayer::Durable => self.durable_hits.fetch_add(1, Ordering::Relaxed),
            CacheLayer::Fetcher => self.fetches.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_join(&self) {
        self.joined.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_prefetch(&self) {
        self.prefetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheMetrics {
        CacheMetrics {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            joined_waiters: self.joined.load(Ordering::Relaxed),
            prefetches_started: self.prefetches.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of read-path counters for performance monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Reads answered by the MemoryTier
    pub memory_hits: u64,

    /// Reads answered by the DurableStore
    pub durable_hits: u64,

    /// Successful fetcher calls (one per single-flight leader)
    pub fetches: u64,

    /// Failed fetcher calls
    pub fetch_failures: u64,

    /// Callers that joined an existing in-flight fetch
    pub joined_waiters: u64,

    /// Background prefetch loads started
    pub prefetches_started: u64,
}

impl CacheMetrics {
    /// Share of reads served without a fetch, as a percentage
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.durable_hits;
        let total = hits + self.fetches + self.fetch_failures;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Share of hits served from memory, as a percentage
    pub fn memory_hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.durable_hits;
        if hits == 0 {
            0.0
        } else {
            (self.memory_hits as f64 / hits as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheMetrics {{ memory_hits: {}, durable_hits: {}, fetches: {}, failures: {}, hit_rate: {:.2}% }}",
            self.memory_hits,
            self.durable_hits,
            self.fetches,
            self.fetch_failures,
            self.hit_rate()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_str() {
        assert_eq!(Category::from("content"), Category::CONTENT);
        assert_eq!(Category::from("location"), Category::LOCATION);
        assert_eq!(Category::from("notes").as_str(), "notes");
        assert_eq!(Category::new("content"), Category::CONTENT);
    }

    #[test]
    fn test_scoped_key_display() {
        let key = ScopedKey::new(Category::CONTENT, "gen:3");
        assert_eq!(key.to_string(), "content/gen:3");
    }

    #[test]
    fn test_metrics_hit_rate() {
        let metrics = CacheMetrics {
            memory_hits: 60,
            durable_hits: 20,
            fetches: 15,
            fetch_failures: 5,
            ..Default::default()
        };

        assert_eq!(metrics.hit_rate(), 80.0);
        assert_eq!(metrics.memory_hit_rate(), 75.0);
    }

    #[test]
    fn test_metrics_zero_requests() {
        let metrics = CacheMetrics::default();
        assert_eq!(metrics.hit_rate(), 0.0);
        assert_eq!(metrics.memory_hit_rate(), 0.0);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = MetricsRecorder::default();
        recorder.record_hit(CacheLayer::Memory);
        recorder.record_hit(CacheLayer::Memory);
        recorder.record_hit(CacheLayer::Fetcher);
        recorder.record_join();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.memory_hits, 2);
        assert_eq!(snapshot.fetches, 1);
        assert_eq!(snapshot.joined_waiters, 1);
        assert!(snapshot.to_string().contains("memory_hits: 2"));
    }

    #[test]
    fn test_cache_layer_display() {
        assert_eq!(format!("{}", CacheLayer::Memory), "memory");
        assert_eq!(format!("{}", CacheLayer::Durable), "durable");
        assert_eq!(format!("{}", LoadPriority::Background), "background");
    }
}

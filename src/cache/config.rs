//! Configuration for the cache system

use crate::cache::types::{CacheKey, Category};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Per-category limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// TTL used when a caller does not pass one
    pub default_ttl: Duration,

    /// DurableStore entry limit, enforced oldest-first
    pub max_entries: usize,
}

impl CategoryConfig {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            default_ttl,
            max_entries,
        }
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            // Chapters change rarely; a week keeps cold starts warm
            default_ttl: Duration::from_secs(7 * 24 * 3600),
            max_entries: 500,
        }
    }
}

/// MemoryTier sizing and pinning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTierConfig {
    /// Maximum resident records before the LRU sweep runs
    pub capacity: usize,

    /// Keys never removed by the LRU sweep
    pub priority_keys: HashSet<CacheKey>,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            priority_keys: HashSet::new(),
        }
    }
}

/// Where the DurableStore keeps its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    /// SQLite file inside the directory, flat JSON files as fallback
    Directory(PathBuf),

    /// Private in-memory SQLite database (tests, ephemeral sessions)
    InMemory,

    /// No persistence; the cache runs memory-only
    Disabled,
}

/// DurableStore configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backing location
    pub location: StorageLocation,

    /// Let `start_auto_sweep` run; when off it returns at once
    pub enable_auto_sweep: bool,

    /// Interval between sweeps
    pub sweep_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            location: StorageLocation::InMemory,
            enable_auto_sweep: true,
            // Sweep every 10 minutes
            sweep_interval: Duration::from_secs(600),
        }
    }
}

/// AdjacencyPrefetcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// Warm neighbours after sequence reads
    pub enabled: bool,

    /// Maximum outstanding background loads
    pub max_concurrent: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 2,
        }
    }
}

/// Configuration for the content cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Limits per category; unknown categories use `fallback_category`
    pub categories: BTreeMap<Category, CategoryConfig>,

    /// Limits for categories not listed in `categories`
    pub fallback_category: CategoryConfig,

    /// MemoryTier settings
    pub memory: MemoryTierConfig,

    /// DurableStore settings
    pub storage: StorageConfig,

    /// Prefetch settings
    pub prefetch: PrefetchConfig,

    /// TTL jitter factor (0.0 - 1.0) applied to category default TTLs
    /// Spreads expiry of entries written together
    pub ttl_jitter: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(Category::CONTENT, CategoryConfig::default());
        categories.insert(
            Category::AUXILIARY,
            CategoryConfig::new(Duration::from_secs(24 * 3600), 200),
        );
        categories.insert(
            Category::LOCATION,
            CategoryConfig::new(Duration::from_secs(3600), 100),
        );

        Self {
            categories,
            fallback_category: CategoryConfig::new(Duration::from_secs(3600), 100),
            memory: MemoryTierConfig::default(),
            storage: StorageConfig::default(),
            prefetch: PrefetchConfig::default(),
            ttl_jitter: 0.0,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Limits for a category
    pub fn category(&self, category: &Category) -> &CategoryConfig {
        self.categories
            .get(category)
            .unwrap_or(&self.fallback_category)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.memory.capacity == 0 {
            return Err(CacheError::Config(
                "memory capacity must be greater than 0".to_string(),
            ));
        }

        if self.ttl_jitter < 0.0 || self.ttl_jitter > 1.0 {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.prefetch.enabled && self.prefetch.max_concurrent == 0 {
            return Err(CacheError::Config(
                "prefetch max_concurrent must be greater than 0".to_string(),
            ));
        }

        for (category, limits) in self
            .categories
            .iter()
            .map(|(c, l)| (c.as_str(), l))
            .chain(std::iter::once(("<fallback>", &self.fallback_category)))
        {
            if limits.max_entries == 0 {
                return Err(CacheError::Config(format!(
                    "max_entries for category '{}' must be greater than 0",
                    category
                )));
            }
            if limits.default_ttl.is_zero() {
                return Err(CacheError::Config(format!(
                    "default_ttl for category '{}' must be non-zero",
                    category
                )));
            }
        }

        if self.memory.capacity < self.memory.priority_keys.len() {
            warn!(
                capacity = self.memory.capacity,
                priority_keys = self.memory.priority_keys.len(),
                "Memory capacity is below the number of priority keys; the tier may exceed capacity"
            );
        }

        Ok(())
    }

    /// Default TTL for a category with jitter applied
    pub fn ttl_for(&self, category: &Category) -> Duration {
        let base = self.category(category).default_ttl;
        if self.ttl_jitter == 0.0 {
            return base;
        }

        let base_secs = base.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }

    /// Build a configuration from `CHAPTER_CACHE_*` environment variables
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Recognised variables:
    /// - `CHAPTER_CACHE_DIR`: storage directory (`:memory:` or `off` also accepted)
    /// - `CHAPTER_CACHE_MEMORY_CAPACITY`
    /// - `CHAPTER_CACHE_PRIORITY_KEYS`: comma separated
    /// - `CHAPTER_CACHE_CONTENT_TTL_SECS`, `CHAPTER_CACHE_CONTENT_MAX_ENTRIES`
    /// - `CHAPTER_CACHE_PREFETCH`: `true`/`false`
    /// - `CHAPTER_CACHE_TTL_JITTER`
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = CacheConfig::builder();

        if let Some(dir) = lookup("CHAPTER_CACHE_DIR") {
            let location = match dir.as_str() {
                ":memory:" => StorageLocation::InMemory,
                "off" | "disabled" => StorageLocation::Disabled,
                path => StorageLocation::Directory(PathBuf::from(path)),
            };
            builder = builder.storage_location(location);
        }

        if let Some(capacity) = lookup("CHAPTER_CACHE_MEMORY_CAPACITY") {
            builder = builder.memory_capacity(parse_var("CHAPTER_CACHE_MEMORY_CAPACITY", &capacity)?);
        }

        if let Some(keys) = lookup("CHAPTER_CACHE_PRIORITY_KEYS") {
            builder = builder.priority_keys(
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from),
            );
        }

        let defaults = CategoryConfig::default();
        let content_ttl = lookup("CHAPTER_CACHE_CONTENT_TTL_SECS")
            .map(|v| parse_var::<u64>("CHAPTER_CACHE_CONTENT_TTL_SECS", &v))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_ttl);
        let content_max = lookup("CHAPTER_CACHE_CONTENT_MAX_ENTRIES")
            .map(|v| parse_var::<usize>("CHAPTER_CACHE_CONTENT_MAX_ENTRIES", &v))
            .transpose()?
            .unwrap_or(defaults.max_entries);
        builder = builder.category(Category::CONTENT, CategoryConfig::new(content_ttl, content_max));

        if let Some(enabled) = lookup("CHAPTER_CACHE_PREFETCH") {
            builder = builder.enable_prefetch(parse_var("CHAPTER_CACHE_PREFETCH", &enabled)?);
        }

        if let Some(jitter) = lookup("CHAPTER_CACHE_TTL_JITTER") {
            builder = builder.ttl_jitter(parse_var("CHAPTER_CACHE_TTL_JITTER", &jitter)?);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CacheError::Config(format!("invalid value for {}: '{}'", name, value)))
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    categories: BTreeMap<Category, CategoryConfig>,
    fallback_category: Option<CategoryConfig>,
    memory_capacity: Option<usize>,
    priority_keys: HashSet<CacheKey>,
    storage_location: Option<StorageLocation>,
    enable_auto_sweep: Option<bool>,
    sweep_interval: Option<Duration>,
    enable_prefetch: Option<bool>,
    max_concurrent_prefetches: Option<usize>,
    ttl_jitter: Option<f64>,
}

impl CacheConfigBuilder {
    /// Set limits for a category
    pub fn category(mut self, category: Category, limits: CategoryConfig) -> Self {
        self.categories.insert(category, limits);
        self
    }

    /// Set limits for categories without explicit configuration
    pub fn fallback_category(mut self, limits: CategoryConfig) -> Self {
        self.fallback_category = Some(limits);
        self
    }

    /// Set MemoryTier capacity
    pub fn memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = Some(capacity);
        self
    }

    /// Add keys exempt from LRU eviction
    pub fn priority_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<CacheKey>,
    {
        self.priority_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Set the durable storage location
    pub fn storage_location(mut self, location: StorageLocation) -> Self {
        self.storage_location = Some(location);
        self
    }

    /// Enable or disable the periodic sweep
    pub fn enable_auto_sweep(mut self, enable: bool) -> Self {
        self.enable_auto_sweep = Some(enable);
        self
    }

    /// Set sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Enable or disable adjacency prefetch
    pub fn enable_prefetch(mut self, enable: bool) -> Self {
        self.enable_prefetch = Some(enable);
        self
    }

    /// Set the number of outstanding prefetches
    pub fn max_concurrent_prefetches(mut self, max: usize) -> Self {
        self.max_concurrent_prefetches = Some(max);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        let mut categories = defaults.categories;
        categories.extend(self.categories);

        CacheConfig {
            categories,
            fallback_category: self.fallback_category.unwrap_or(defaults.fallback_category),
            memory: MemoryTierConfig {
                capacity: self.memory_capacity.unwrap_or(defaults.memory.capacity),
                priority_keys: self.priority_keys,
            },
            storage: StorageConfig {
                location: self.storage_location.unwrap_or(defaults.storage.location),
                enable_auto_sweep: self
                    .enable_auto_sweep
                    .unwrap_or(defaults.storage.enable_auto_sweep),
                sweep_interval: self.sweep_interval.unwrap_or(defaults.storage.sweep_interval),
            },
            prefetch: PrefetchConfig {
                enabled: self.enable_prefetch.unwrap_or(defaults.prefetch.enabled),
                max_concurrent: self
                    .max_concurrent_prefetches
                    .unwrap_or(defaults.prefetch.max_concurrent),
            },
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Configuration for memory-constrained devices
    pub fn small() -> Self {
        Self {
            memory: MemoryTierConfig {
                capacity: 10,
                priority_keys: HashSet::new(),
            },
            prefetch: PrefetchConfig {
                enabled: true,
                max_concurrent: 1,
            },
            ..Default::default()
        }
    }

    /// Configuration for a reader app persisting under `dir`
    pub fn reader(dir: impl Into<PathBuf>) -> Self {
        let mut config = Self {
            storage: StorageConfig {
                location: StorageLocation::Directory(dir.into()),
                ..Default::default()
            },
            ttl_jitter: 0.10,
            ..Default::default()
        };
        config.memory.capacity = 100;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.memory.capacity, 50);
        assert_eq!(config.prefetch.max_concurrent, 2);
        assert_eq!(config.category(&Category::CONTENT).max_entries, 500);
        assert_eq!(
            config.category(&Category::LOCATION).default_ttl,
            Duration::from_secs(3600)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_category_uses_fallback() {
        let config = CacheConfig::default();
        let limits = config.category(&Category::new("notes"));
        assert_eq!(limits, &config.fallback_category);
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = CacheConfig::default();
        invalid.memory.capacity = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = CacheConfig::default();
        invalid.ttl_jitter = 1.5;
        assert!(invalid.validate().is_err());

        let invalid = CacheConfig::builder()
            .category(Category::CONTENT, CategoryConfig::new(Duration::from_secs(60), 0))
            .build();
        assert!(matches!(invalid.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_priority_keys_above_capacity_only_warns() {
        let config = CacheConfig::builder()
            .memory_capacity(1)
            .priority_keys(["a", "b", "c"])
            .build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .category(Category::CONTENT, CategoryConfig::new(Duration::from_secs(600), 2))
            .memory_capacity(3)
            .priority_keys(vec!["A".to_string()])
            .storage_location(StorageLocation::Disabled)
            .max_concurrent_prefetches(4)
            .build();

        assert_eq!(config.category(&Category::CONTENT).max_entries, 2);
        assert_eq!(config.memory.capacity, 3);
        assert!(config.memory.priority_keys.contains("A"));
        assert_eq!(config.storage.location, StorageLocation::Disabled);
        assert_eq!(config.prefetch.max_concurrent, 4);
        // Untouched categories keep their defaults
        assert_eq!(config.category(&Category::AUXILIARY).max_entries, 200);
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = CacheConfig {
            ttl_jitter: 0.1,
            ..Default::default()
        };

        let ttl = config.ttl_for(&Category::LOCATION);
        let base_secs = 3600.0;
        let jitter_range = base_secs * 0.1;

        assert!(ttl.as_secs_f64() >= base_secs - jitter_range);
        assert!(ttl.as_secs_f64() <= base_secs + jitter_range);
    }

    #[test]
    fn test_ttl_without_jitter_is_exact() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_for(&Category::LOCATION), Duration::from_secs(3600));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CHAPTER_CACHE_DIR", "off"),
            ("CHAPTER_CACHE_MEMORY_CAPACITY", "12"),
            ("CHAPTER_CACHE_PRIORITY_KEYS", "gen:1, jhn:1 ,"),
            ("CHAPTER_CACHE_CONTENT_MAX_ENTRIES", "40"),
            ("CHAPTER_CACHE_PREFETCH", "false"),
        ]
        .into_iter()
        .collect();

        let config = CacheConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.storage.location, StorageLocation::Disabled);
        assert_eq!(config.memory.capacity, 12);
        assert_eq!(config.memory.priority_keys.len(), 2);
        assert!(config.memory.priority_keys.contains("jhn:1"));
        assert_eq!(config.category(&Category::CONTENT).max_entries, 40);
        assert!(!config.prefetch.enabled);
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let result = CacheConfig::from_lookup(|name| {
            (name == "CHAPTER_CACHE_MEMORY_CAPACITY").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_preset_configs() {
        let small = CacheConfig::small();
        assert_eq!(small.memory.capacity, 10);
        assert_eq!(small.prefetch.max_concurrent, 1);

        let reader = CacheConfig::reader("/tmp/reader");
        assert!(matches!(reader.storage.location, StorageLocation::Directory(_)));
        assert_eq!(reader.memory.capacity, 100);
        assert!(reader.validate().is_ok());
    }
}

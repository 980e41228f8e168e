//! Bounded in-process tier with LRU eviction and pinned priority keys

use crate::cache::{
    config::MemoryTierConfig,
    entry::MemoryRecord,
    types::{CacheKey, CacheValue, Category, ScopedKey},
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// In-memory cache tier
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - Recency and access-count tracking on every read
/// - LRU eviction that never removes priority keys
/// - Expired snapshots treated as misses
pub struct MemoryTier {
    capacity: usize,
    priority_keys: HashSet<CacheKey>,
    store: Arc<RwLock<MemoryStore>>,
}

/// Internal tier storage
struct MemoryStore {
    /// Main storage: scoped key -> record
    records: HashMap<ScopedKey, MemoryRecord>,

    /// Touch counter, bumped on every insert and read
    seq: u64,
}

impl MemoryStore {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

impl MemoryTier {
    /// Create a new tier with the given configuration
    pub fn new(config: MemoryTierConfig) -> Self {
        if config.capacity < config.priority_keys.len() {
            warn!(
                "Memory tier capacity {} is below the {} priority keys; the tier may exceed capacity",
                config.capacity,
                config.priority_keys.len()
            );
        }

        info!(
            "Initializing memory tier (capacity: {}, priority keys: {})",
            config.capacity,
            config.priority_keys.len()
        );

        Self {
            capacity: config.capacity,
            priority_keys: config.priority_keys,
            store: Arc::new(RwLock::new(MemoryStore {
                records: HashMap::new(),
                seq: 0,
            })),
        }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a key is pinned against LRU eviction
    pub fn is_priority(&self, key: &str) -> bool {
        self.priority_keys.contains(key)
    }

    /// Get a value, updating recency and access count on a hit
    pub async fn get(&self, key: &ScopedKey) -> Option<CacheValue> {
        let mut store = self.store.write().await;

        let expired = match store.records.get(key) {
            None => {
                debug!("Memory miss: {}", key);
                return None;
            }
            Some(record) => record.is_expired(),
        };

        if expired {
            debug!("Memory entry expired: {}", key);
            store.records.remove(key);
            return None;
        }

        let seq = store.next_seq();
        let record = store.records.get_mut(key)?;
        record.mark_accessed(seq);

        debug!("Memory hit: {} (count {})", key, record.access_count);
        Some(record.value.clone())
    }

    /// Check residency without touching recency
    pub async fn contains_key(&self, key: &ScopedKey) -> bool {
        let store = self.store.read().await;
        store
            .records
            .get(key)
            .map(|record| !record.is_expired())
            .unwrap_or(false)
    }

    /// Inspect a record without touching recency
    pub async fn record(&self, key: &ScopedKey) -> Option<MemoryRecord> {
        let store = self.store.read().await;
        store.records.get(key).cloned()
    }

    /// Insert or replace a value; returns keys evicted to get back under capacity
    ///
    /// A replace keeps the record's access count.
    pub async fn set(
        &self,
        key: ScopedKey,
        value: CacheValue,
        expires_at: DateTime<Utc>,
    ) -> Vec<ScopedKey> {
        let mut store = self.store.write().await;
        let seq = store.next_seq();

        if let Some(existing) = store.records.get_mut(&key) {
            debug!("Updating memory entry: {}", key);
            existing.replace(value, expires_at, seq);
        } else {
            debug!("Inserting memory entry: {}", key);
            store
                .records
                .insert(key, MemoryRecord::new(value, expires_at, seq));
        }

        if store.records.len() > self.capacity {
            self.evict_locked(&mut store)
        } else {
            Vec::new()
        }
    }

    /// Run the LRU sweep now
    pub async fn evict(&self) -> Vec<ScopedKey> {
        let mut store = self.store.write().await;
        self.evict_locked(&mut store)
    }

    /// Remove a specific entry
    pub async fn invalidate(&self, key: &ScopedKey) -> bool {
        let mut store = self.store.write().await;
        let removed = store.records.remove(key).is_some();
        if removed {
            debug!("Invalidated memory entry: {}", key);
        }
        removed
    }

    /// Remove every entry of a category
    pub async fn clear_category(&self, category: &Category) -> usize {
        let mut store = self.store.write().await;
        let before = store.records.len();
        store.records.retain(|key, _| &key.category != category);
        before - store.records.len()
    }

    /// Clear all entries
    pub async fn clear(&self) {
        let mut store = self.store.write().await;
        let count = store.records.len();
        store.records.clear();
        info!("Cleared {} entries from memory tier", count);
    }

    /// Drop records whose snapshot has expired
    pub async fn remove_expired(&self) -> usize {
        let mut store = self.store.write().await;
        let now = Utc::now();
        let before = store.records.len();
        store.records.retain(|_, record| record.expires_at > now);
        let removed = before - store.records.len();
        if removed > 0 {
            debug!("Dropped {} expired memory entries", removed);
        }
        removed
    }

    /// Number of resident records
    pub async fn len(&self) -> usize {
        self.store.read().await.records.len()
    }

    /// Check if the tier is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.records.is_empty()
    }

    /// Number of resident records in a category
    pub async fn len_in(&self, category: &Category) -> usize {
        let store = self.store.read().await;
        store
            .records
            .keys()
            .filter(|key| &key.category == category)
            .count()
    }

    /// Snapshot of resident keys
    pub async fn keys(&self) -> Vec<ScopedKey> {
        let store = self.store.read().await;
        store.records.keys().cloned().collect()
    }

    /// Internal: LRU sweep over non-priority records
    fn evict_locked(&self, store: &mut MemoryStore) -> Vec<ScopedKey> {
        let mut candidates: Vec<(ScopedKey, u64, u64)> = store
            .records
            .iter()
            .filter(|(key, _)| !self.priority_keys.contains(&key.key))
            .map(|(key, record)| (key.clone(), record.touch_seq, record.access_count))
            .collect();

        // Recency is the touch counter, not the wall clock; at equal recency
        // the less-used entry goes first
        candidates.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));

        let mut evicted = Vec::new();
        for (key, _, _) in candidates {
            if store.records.len() <= self.capacity {
                break;
            }
            store.records.remove(&key);
            debug!("Evicting memory entry (LRU): {}", key);
            evicted.push(key);
        }

        if store.records.len() > self.capacity {
            warn!(
                "Memory tier holds {} entries over capacity {}; only priority keys remain",
                store.records.len(),
                self.capacity
            );
        }

        evicted
    }
}

//! Cache entries with TTL support

use crate::cache::types::{CacheKey, CacheValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest TTL an entry can carry; keeps `expires_at > created_at`
const MIN_TTL_MS: i64 = 1;

/// Convert a std duration into a positive chrono duration
pub(crate) fn ttl_to_chrono(ttl: Duration) -> chrono::Duration {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::max_value());
    ttl.max(chrono::Duration::milliseconds(MIN_TTL_MS))
}

/// A durable snapshot of remote content with its expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// When the snapshot was written
    pub created_at: DateTime<Utc>,

    /// When the snapshot stops being served
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now
    pub fn new(key: CacheKey, value: CacheValue, ttl: Duration) -> Self {
        Self::created_at(key, value, Utc::now(), ttl)
    }

    /// Create an entry with an explicit creation time
    pub fn created_at(
        key: CacheKey,
        value: CacheValue,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let expires_at = created_at
            .checked_add_signed(ttl_to_chrono(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key,
            value,
            created_at,
            expires_at,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expired entries are logically absent
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let now = Utc::now();
        if self.is_expired_at(now) {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }
}

/// A resident MemoryTier record
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    /// The cached value
    pub value: CacheValue,

    /// Last read or insert
    pub last_accessed_at: DateTime<Utc>,

    /// Reads plus the initial insert
    pub access_count: u64,

    /// Expiry of the snapshot this record was populated from
    pub expires_at: DateTime<Utc>,

    /// Monotonic tick of the last touch; LRU eviction orders by this
    pub(crate) touch_seq: u64,
}

impl MemoryRecord {
    pub(crate) fn new(value: CacheValue, expires_at: DateTime<Utc>, touch_seq: u64) -> Self {
        Self {
            value,
            last_accessed_at: Utc::now(),
            access_count: 1,
            expires_at,
            touch_seq,
        }
    }

    /// Check if the snapshot has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Update recency and count on a read
    pub(crate) fn mark_accessed(&mut self, touch_seq: u64) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
        self.touch_seq = touch_seq;
    }

    /// Replace the payload, keeping the access count
    pub(crate) fn replace(&mut self, value: CacheValue, expires_at: DateTime<Utc>, touch_seq: u64) {
        self.value = value;
        self.expires_at = expires_at;
        self.last_accessed_at = Utc::now();
        self.touch_seq = touch_seq;
    }

    /// Time since last access
    pub fn time_since_access(&self) -> Duration {
        (Utc::now() - self.last_accessed_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;

    #[test]
    fn test_cache_entry_creation() {
        let entry = CacheEntry::new(
            "gen:1".to_string(),
            json!({"title": "In the beginning"}),
            Duration::from_secs(3600),
        );

        assert_eq!(entry.key, "gen:1");
        assert!(entry.expires_at > entry.created_at);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new("k".to_string(), json!(1), Duration::from_millis(100));

        assert!(!entry.is_expired());
        sleep(Duration::from_millis(150));
        assert!(entry.is_expired());
        assert!(entry.time_until_expiration().is_none());
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let created = Utc::now();
        let entry = CacheEntry::created_at("k".to_string(), json!(1), created, Duration::from_secs(10));

        let boundary = created + chrono::Duration::seconds(10);
        assert!(!entry.is_expired_at(boundary - chrono::Duration::milliseconds(1)));
        assert!(entry.is_expired_at(boundary));
    }

    #[test]
    fn test_zero_ttl_still_orders_timestamps() {
        let entry = CacheEntry::new("k".to_string(), json!(1), Duration::ZERO);
        assert!(entry.expires_at > entry.created_at);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::new("k".to_string(), json!(1), Duration::MAX);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_mark_accessed() {
        let mut record = MemoryRecord::new(json!("v"), Utc::now() + chrono::Duration::hours(1), 1);
        let initial_time = record.last_accessed_at;

        sleep(Duration::from_millis(10));
        record.mark_accessed(2);

        assert_eq!(record.access_count, 2);
        assert!(record.last_accessed_at > initial_time);
        assert_eq!(record.touch_seq, 2);
    }

    #[test]
    fn test_replace_preserves_access_count() {
        let mut record = MemoryRecord::new(json!("v1"), Utc::now() + chrono::Duration::hours(1), 1);
        record.mark_accessed(2);
        record.mark_accessed(3);

        record.replace(json!("v2"), Utc::now() + chrono::Duration::hours(2), 4);

        assert_eq!(record.value, json!("v2"));
        assert_eq!(record.access_count, 3);
    }

    #[test]
    fn test_age() {
        let entry = CacheEntry::new("k".to_string(), json!(1), Duration::from_secs(3600));
        sleep(Duration::from_millis(10));
        assert!(entry.age() >= Duration::from_millis(10));
    }
}

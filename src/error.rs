//! Error types for cache operations
//!
//! Only [`CacheError::FetchFailed`] (and [`CacheError::NotFound`] on the
//! no-fetch path) ever reach a reader. Storage errors are produced by the
//! backends and absorbed by the durable store, which logs them and carries on.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by the remote content fetcher.
///
/// Cloneable so a single fetch outcome can be handed to every waiter that
/// joined the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network-level failure (DNS, connection reset, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// The remote API answered with an error status
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The remote has no such document
    #[error("Document not found upstream: {0}")]
    Missing(String),

    /// The fetch exceeded the fetcher's own deadline
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Payload could not be decoded
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Main error type for the cache layer
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key is absent from every tier and the caller opted out of fetching
    #[error("Not cached: {category}/{key}")]
    NotFound { category: String, key: String },

    /// The fetcher reported an error; shared verbatim by all waiters
    #[error("Fetch failed: {0}")]
    FetchFailed(#[from] FetchError),

    /// Primary storage engine could not be opened; running on the fallback
    #[error("Durable store degraded to {fallback}: {reason}")]
    StoreDegraded { fallback: String, reason: String },

    /// No durable backing could be opened; cache is memory-only
    #[error("Durable store unavailable: {0}")]
    StoreUnavailable(String),

    /// Backing storage I/O or query failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Whether this error came from the fetcher rather than the cache itself
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, CacheError::FetchFailed(_))
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

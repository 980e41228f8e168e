//! Background warming of neighbouring positions in a sequence

use crate::cache::{
    config::PrefetchConfig,
    types::{CacheKey, Category, ScopedKey},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// A linear run of documents `1..=total`, e.g. the chapters of one book
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sequence {
    pub category: Category,
    pub document_id: String,
    pub total: u32,
}

impl Sequence {
    pub fn new(category: Category, document_id: impl Into<String>, total: u32) -> Self {
        Self {
            category,
            document_id: document_id.into(),
            total,
        }
    }

    /// Cache key of the document at `position`
    pub fn key_for(&self, position: u32) -> CacheKey {
        format!("{}:{}", self.document_id, position)
    }

    pub fn scoped_key(&self, position: u32) -> ScopedKey {
        ScopedKey::new(self.category.clone(), self.key_for(position))
    }

    pub fn contains(&self, position: u32) -> bool {
        (1..=self.total).contains(&position)
    }
}

/// Neighbours of `position` within `[1, total]`, successor first
pub fn candidates(position: u32, total: u32) -> Vec<u32> {
    if !(1..=total).contains(&position) {
        return Vec::new();
    }
    [position.checked_add(1), position.checked_sub(1)]
        .into_iter()
        .flatten()
        .filter(|p| (1..=total).contains(p) && *p != position)
        .collect()
}

/// Where prefetches land
#[async_trait]
pub trait PrefetchTarget: Send + Sync + 'static {
    /// Resident in memory or already being fetched
    async fn is_warm(&self, key: &ScopedKey) -> bool;

    /// Load `key` at background priority, discarding the result
    async fn warm(&self, key: ScopedKey);
}

/// Fires bounded background loads for the neighbours of a focused position
pub struct AdjacencyPrefetcher {
    enabled: bool,
    max_concurrent: usize,
    permits: Arc<Semaphore>,
}

impl AdjacencyPrefetcher {
    pub fn new(config: &PrefetchConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_concurrent: config.max_concurrent,
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Prefetches currently holding a permit
    pub fn outstanding(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.permits.available_permits())
    }

    /// Spawn a background load for each neighbour of `position`
    ///
    /// Never waits. Each task queues for a permit, so at most
    /// `max_concurrent` loads run at once, then skips keys that turned warm
    /// in the meantime. Nothing is spawned for a position outside the
    /// sequence or without a tokio runtime. Handles are returned for callers
    /// that want to await them.
    pub fn notify_focused(
        &self,
        target: Arc<dyn PrefetchTarget>,
        sequence: &Sequence,
        position: u32,
    ) -> Vec<JoinHandle<()>> {
        if !self.enabled {
            return Vec::new();
        }

        if !sequence.contains(position) {
            debug!(
                "Position {} outside {} (1..={}); no prefetch",
                position, sequence.document_id, sequence.total
            );
            return Vec::new();
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No runtime; prefetch around {} skipped", position);
                return Vec::new();
            }
        };

        let mut handles = Vec::new();
        for neighbour in candidates(position, sequence.total) {
            let key = sequence.scoped_key(neighbour);
            let permits = Arc::clone(&self.permits);
            let target = Arc::clone(&target);

            handles.push(runtime.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!("Prefetch permits closed; dropping {}", key);
                        return;
                    }
                };
                if target.is_warm(&key).await {
                    debug!("Prefetch skipped, already warm: {}", key);
                    return;
                }
                debug!("Prefetching {}", key);
                target.warm(key).await;
            }));
        }

        handles
    }
}

//! Shared fixtures for integration tests

use async_trait::async_trait;
use chapter_cache::cache::{CacheValue, Category, Fetcher};
use chapter_cache::FetchError;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Fetcher that records every call and can be switched to fail
#[derive(Default)]
pub struct CountingFetcher {
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
    failing: AtomicBool,
    delay: Duration,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Keys fetched so far, in call order
    pub fn fetched(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, category: &Category, key: &str) -> Result<CacheValue, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(key.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Remote {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }

        Ok(json!({ "category": category.as_str(), "key": key, "fetch": n }))
    }
}

pub fn init_tracing() {
    chapter_cache::telemetry::init_tracing();
}

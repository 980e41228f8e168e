//! Remote content source consulted on a miss in both tiers

use crate::cache::types::{CacheValue, Category};
use crate::error::FetchError;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Loads a document from the remote API
///
/// Retry and timeout policy belong to the implementation; the cache treats
/// any error, including a timeout, as one failed outcome.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, category: &Category, key: &str) -> Result<CacheValue, FetchError>;
}

/// Adapts an async closure into a [`Fetcher`]
///
/// ```
/// use chapter_cache::cache::{Category, FnFetcher};
/// use serde_json::json;
///
/// let fetcher = FnFetcher::new(|category: Category, key: String| async move {
///     Ok(json!({ "category": category.as_str(), "key": key }))
/// });
/// # let _ = fetcher;
/// ```
pub struct FnFetcher<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnFetcher<F, Fut>
where
    F: Fn(Category, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CacheValue, FetchError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Fetcher for FnFetcher<F, Fut>
where
    F: Fn(Category, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CacheValue, FetchError>> + Send + 'static,
{
    async fn fetch(&self, category: &Category, key: &str) -> Result<CacheValue, FetchError> {
        (self.f)(category.clone(), key.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_fetcher_passes_category_and_key() {
        let fetcher = FnFetcher::new(|category: Category, key: String| async move {
            if key == "missing" {
                Err(FetchError::Missing(key))
            } else {
                Ok(json!(format!("{}/{}", category, key)))
            }
        });

        let value = fetcher.fetch(&Category::CONTENT, "gen:1").await.unwrap();
        assert_eq!(value, json!("content/gen:1"));

        let err = fetcher.fetch(&Category::CONTENT, "missing").await.unwrap_err();
        assert_eq!(err, FetchError::Missing("missing".to_string()));
    }

    #[test]
    fn test_fetcher_outside_async_context() {
        let fetcher = FnFetcher::new(|_category: Category, key: String| async move {
            Ok(json!(key))
        });

        let value = tokio_test::block_on(fetcher.fetch(&Category::LOCATION, "here"));
        assert_eq!(value, Ok(json!("here")));
    }
}

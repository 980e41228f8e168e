//! Integration points for chapter reading
//!
//! This module provides the reader-facing layer on top of [`ContentCache`]:
//! - Typed chapter payloads and their cache encoding
//! - Stable cache keys per content kind
//! - Chapter navigation with neighbour prefetch

use crate::cache::{
    config::CacheConfig,
    facade::ContentCache,
    fetcher::Fetcher,
    prefetch::Sequence,
    types::{CacheKey, CacheStats, CacheValue, Category},
};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of remote document a key points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    /// Chapter body
    Chapter,

    /// Book metadata
    BookInfo,

    /// Table of contents
    TableOfContents,

    /// Available translations
    Translations,

    /// Location lookup
    Location,

    /// Custom kind
    Custom(String),
}

impl ContentKind {
    /// Category the kind is stored under
    pub fn category(&self) -> Category {
        match self {
            ContentKind::Chapter => Category::CONTENT,
            ContentKind::BookInfo | ContentKind::TableOfContents | ContentKind::Translations => {
                Category::AUXILIARY
            }
            ContentKind::Location => Category::LOCATION,
            ContentKind::Custom(name) => Category::new(name.clone()),
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Chapter => write!(f, "chapter"),
            ContentKind::BookInfo => write!(f, "book_info"),
            ContentKind::TableOfContents => write!(f, "toc"),
            ContentKind::Translations => write!(f, "translations"),
            ContentKind::Location => write!(f, "location"),
            ContentKind::Custom(s) => write!(f, "custom:{}", s),
        }
    }
}

/// Cache key builder for reader content
pub struct CacheKeyBuilder {
    kind: ContentKind,
    identifier: String,
    position: Option<u32>,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(kind: ContentKind) -> Self {
        Self {
            kind,
            identifier: String::new(),
            position: None,
            params: Vec::new(),
        }
    }

    /// Set the primary identifier
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = id.into();
        self
    }

    /// Set the position within a sequence
    pub fn position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = format!("{}:{}", self.kind, self.identifier);

        if let Some(position) = self.position {
            key.push_str(&format!(":{}", position));
        }

        if !self.params.is_empty() {
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push_str(&format!("?{}", params_str.join("&")));
        }

        key
    }
}

/// Key of a chapter; matches [`ChapterCache::sequence`] positions
pub fn chapter_key(book_id: &str, number: u32) -> CacheKey {
    CacheKeyBuilder::new(ContentKind::Chapter)
        .identifier(book_id)
        .position(number)
        .build()
}

/// Split a chapter key back into book id and chapter number
///
/// Fetchers use this to turn a key into a remote request.
pub fn parse_chapter_key(key: &str) -> Option<(&str, u32)> {
    let rest = key.strip_prefix("chapter:")?;
    let (book_id, number) = rest.rsplit_once(':')?;
    Some((book_id, number.parse().ok()?))
}

/// A numbered unit of chapter text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSection {
    pub number: u32,
    pub text: String,
}

/// One chapter of a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Book identifier
    pub book_id: String,

    /// Chapter number, starting at 1
    pub number: u32,

    /// Heading, if the source has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Sections in order
    pub sections: Vec<ChapterSection>,
}

impl Chapter {
    pub fn new(book_id: impl Into<String>, number: u32, sections: Vec<ChapterSection>) -> Self {
        Self {
            book_id: book_id.into(),
            number,
            title: None,
            sections,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Cache key for this chapter
    pub fn cache_key(&self) -> CacheKey {
        chapter_key(&self.book_id, self.number)
    }

    /// Look up a section by number
    pub fn section(&self, number: u32) -> Option<&ChapterSection> {
        self.sections.iter().find(|s| s.number == number)
    }

    /// Serialize to cache value
    pub fn to_cache_value(&self) -> Result<CacheValue> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize from cache value
    pub fn from_cache_value(value: &CacheValue) -> Result<Self> {
        Ok(Chapter::deserialize(value)?)
    }
}

/// Chapter cache wrapper
///
/// Provides book navigation on top of the content cache
pub struct ChapterCache {
    cache: Arc<ContentCache>,
}

impl ChapterCache {
    /// Create a new chapter cache
    pub fn new(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        Ok(Self {
            cache: Arc::new(ContentCache::new(config, fetcher)?),
        })
    }

    /// Create from existing cache instance
    pub fn from_cache(cache: Arc<ContentCache>) -> Self {
        Self { cache }
    }

    /// Get the underlying cache instance
    pub fn inner(&self) -> Arc<ContentCache> {
        self.cache.clone()
    }

    /// The chapters of a book as a prefetchable sequence
    pub fn sequence(book_id: &str, total_chapters: u32) -> Sequence {
        let document_id = CacheKeyBuilder::new(ContentKind::Chapter)
            .identifier(book_id)
            .build();
        Sequence::new(Category::CONTENT, document_id, total_chapters)
    }

    /// Load a chapter for reading and warm its neighbours
    pub async fn open_chapter(&self, book_id: &str, number: u32, total_chapters: u32) -> Result<Chapter> {
        let sequence = Self::sequence(book_id, total_chapters);
        if !sequence.contains(number) {
            return Err(CacheError::NotFound {
                category: Category::CONTENT.to_string(),
                key: chapter_key(book_id, number),
            });
        }

        let value = self.cache.get_in_sequence(&sequence, number).await?;
        Chapter::from_cache_value(&value)
    }

    /// Load a chapter without prefetching
    pub async fn chapter(&self, book_id: &str, number: u32) -> Result<Chapter> {
        let value = self
            .cache
            .get(&Category::CONTENT, &chapter_key(book_id, number))
            .await?;
        Chapter::from_cache_value(&value)
    }

    /// A chapter if either tier holds it
    pub async fn cached_chapter(&self, book_id: &str, number: u32) -> Result<Option<Chapter>> {
        match self
            .cache
            .get_cached(&Category::CONTENT, &chapter_key(book_id, number))
            .await
        {
            Ok(value) => Ok(Some(Chapter::from_cache_value(&value)?)),
            Err(CacheError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store a chapter obtained elsewhere
    pub async fn put_chapter(&self, chapter: &Chapter) -> Result<()> {
        let value = chapter.to_cache_value()?;
        self.cache
            .set(&Category::CONTENT, &chapter.cache_key(), value, None)
            .await;
        Ok(())
    }

    /// Drop a chapter from both tiers
    pub async fn invalidate_chapter(&self, book_id: &str, number: u32) {
        self.cache
            .invalidate(&Category::CONTENT, &chapter_key(book_id, number))
            .await
    }

    /// Book metadata
    pub async fn book_info(&self, book_id: &str) -> Result<CacheValue> {
        let kind = ContentKind::BookInfo;
        let key = CacheKeyBuilder::new(kind.clone()).identifier(book_id).build();
        self.cache.get(&kind.category(), &key).await
    }

    /// Content-tier statistics
    pub async fn stats(&self) -> CacheStats {
        self.cache.stats(&Category::CONTENT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::StorageLocation;
    use crate::cache::fetcher::FnFetcher;
    use crate::error::FetchError;
    use serde_json::json;
    use std::time::Duration;

    fn sample_chapter(book_id: &str, number: u32) -> Chapter {
        Chapter::new(
            book_id,
            number,
            vec![
                ChapterSection { number: 1, text: "In the beginning".to_string() },
                ChapterSection { number: 2, text: "And the earth".to_string() },
            ],
        )
    }

    fn chapter_fetcher() -> Arc<dyn Fetcher> {
        Arc::new(FnFetcher::new(|category: Category, key: String| async move {
            if category == Category::AUXILIARY {
                return Ok(json!({ "key": key, "chapters": 50 }));
            }
            match parse_chapter_key(&key) {
                Some((book_id, number)) => sample_chapter(book_id, number)
                    .to_cache_value()
                    .map_err(|e| FetchError::InvalidPayload(e.to_string())),
                None => Err(FetchError::Missing(key.clone())),
            }
        }))
    }

    fn test_cache() -> ChapterCache {
        let config = CacheConfig::builder()
            .storage_location(StorageLocation::InMemory)
            .build();
        ChapterCache::new(config, chapter_fetcher()).unwrap()
    }

    #[test]
    fn test_content_kind_display_and_category() {
        assert_eq!(format!("{}", ContentKind::Chapter), "chapter");
        assert_eq!(format!("{}", ContentKind::TableOfContents), "toc");
        assert_eq!(format!("{}", ContentKind::Custom("notes".to_string())), "custom:notes");
        assert_eq!(ContentKind::Translations.category(), Category::AUXILIARY);
        assert_eq!(ContentKind::Location.category(), Category::LOCATION);
    }

    #[test]
    fn test_cache_key_builder() {
        let key = CacheKeyBuilder::new(ContentKind::BookInfo)
            .identifier("gen")
            .build();
        assert_eq!(key, "book_info:gen");

        let key = CacheKeyBuilder::new(ContentKind::Chapter)
            .identifier("gen")
            .position(3)
            .param("lang", "en")
            .build();
        assert_eq!(key, "chapter:gen:3?lang=en");
    }

    #[test]
    fn test_chapter_keys_match_sequence() {
        let sequence = ChapterCache::sequence("gen", 50);
        assert_eq!(sequence.key_for(7), chapter_key("gen", 7));
        assert_eq!(parse_chapter_key("chapter:gen:7"), Some(("gen", 7)));
        assert_eq!(parse_chapter_key("chapter:1:john:3"), Some(("1:john", 3)));
        assert_eq!(parse_chapter_key("book_info:gen"), None);
    }

    #[test]
    fn test_chapter_serialization() {
        let chapter = sample_chapter("gen", 1).with_title("Creation");
        let value = chapter.to_cache_value().unwrap();
        assert_eq!(value["sections"][0]["text"], "In the beginning");

        let decoded = Chapter::from_cache_value(&value).unwrap();
        assert_eq!(decoded, chapter);
        assert_eq!(decoded.section(2).map(|s| s.text.as_str()), Some("And the earth"));

        let bad = Chapter::from_cache_value(&json!({ "book_id": 1 }));
        assert!(matches!(bad, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_open_chapter_prefetches_neighbours() {
        let cache = test_cache();

        let chapter = cache.open_chapter("gen", 5, 50).await.unwrap();
        assert_eq!(chapter.number, 5);

        for _ in 0..50 {
            if cache.stats().await.memory_entries == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(cache.cached_chapter("gen", 4).await.unwrap().is_some());
        assert!(cache.cached_chapter("gen", 6).await.unwrap().is_some());
        assert!(cache.cached_chapter("gen", 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_chapter_out_of_range() {
        let cache = test_cache();
        let err = cache.open_chapter("gen", 51, 50).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_put_and_invalidate_chapter() {
        let cache = test_cache();
        let chapter = sample_chapter("exo", 2).with_title("Local copy");

        cache.put_chapter(&chapter).await.unwrap();
        assert_eq!(cache.chapter("exo", 2).await.unwrap().title.as_deref(), Some("Local copy"));

        cache.invalidate_chapter("exo", 2).await;
        assert!(cache.cached_chapter("exo", 2).await.unwrap().is_none());
        assert_eq!(cache.chapter("exo", 2).await.unwrap().title, None);
    }

    #[tokio::test]
    async fn test_book_info_uses_auxiliary_category() {
        let cache = test_cache();
        let info = cache.book_info("gen").await.unwrap();
        assert_eq!(info["key"], "book_info:gen");

        let stats = cache.inner().stats(&Category::AUXILIARY).await;
        assert_eq!(stats.durable_entries, 1);
    }
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use pipeline_core::{Chapter, Manga, MangaListing};
use pipeline_logging::{pipeline_debug, pipeline_info};
use thiserror::Error;

use crate::cache::{popular_key, search_key, SourceCache};
use crate::types::FetchError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not parse {what}: {message}")]
    Parse { what: String, message: String },
    #[error("not found: {0}")]
    NotFound(String),
}

impl SourceError {
    pub fn is_permanent(&self) -> bool {
        match self {
            SourceError::Fetch(err) => err.is_permanent(),
            SourceError::Parse { .. } => false,
            SourceError::NotFound(_) => true,
        }
    }
}

/// A manga site the pipeline can read from.
#[async_trait]
pub trait Source: Send + Sync {
    fn id(&self) -> i64;
    fn name(&self) -> &str;
    fn base_url(&self) -> &str;

    async fn fetch_popular(&self, page: u32) -> Result<MangaListing, SourceError>;
    async fn fetch_search(&self, query: &str, page: u32) -> Result<MangaListing, SourceError>;
    async fn fetch_details(&self, manga_url: &str) -> Result<Manga, SourceError>;
    async fn fetch_chapter_list(&self, manga_url: &str) -> Result<Vec<Chapter>, SourceError>;

    /// Page image URLs in reading order, optionally suffixed with `|Header=Value&...`.
    async fn fetch_page_list(&self, chapter_url: &str) -> Result<Vec<String>, SourceError>;

    /// Sources that can check their own health return themselves here.
    fn as_verifiable(&self) -> Option<&dyn Verifiable> {
        None
    }
}

#[async_trait]
pub trait Verifiable: Send + Sync {
    async fn verify(&self) -> bool;
}

/// Registered sources by id, with cached listings.
pub struct SourceRegistry {
    sources: RwLock<HashMap<i64, Arc<dyn Source>>>,
    cache: SourceCache<Manga>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new(crate::cache::DEFAULT_CACHE_TTL)
    }
}

impl SourceRegistry {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            cache: SourceCache::with_ttl(cache_ttl),
        }
    }

    /// Add or replace a source. Replacing drops its cached listings.
    pub fn register(&self, source: Arc<dyn Source>) -> Option<Arc<dyn Source>> {
        let id = source.id();
        pipeline_info!("Registered source {} ({})", source.name(), id);
        let previous = self
            .sources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, source);
        if previous.is_some() {
            self.cache.invalidate_for_source(id);
        }
        previous
    }

    pub fn unregister(&self, id: i64) -> Option<Arc<dyn Source>> {
        let removed = self
            .sources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
        self.cache.invalidate_for_source(id);
        removed
    }

    pub fn get(&self, id: i64) -> Option<Arc<dyn Source>> {
        self.sources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn cache(&self) -> &SourceCache<Manga> {
        &self.cache
    }

    pub async fn popular(&self, id: i64, page: u32) -> Result<MangaListing, SourceError> {
        let key = popular_key(id, page);
        if let Some(listing) = self.cached(&key) {
            return Ok(listing);
        }
        let source = self.require(id)?;
        let listing = source.fetch_popular(page).await?;
        self.store(key, &listing);
        Ok(listing)
    }

    pub async fn search(&self, id: i64, query: &str, page: u32) -> Result<MangaListing, SourceError> {
        let key = search_key(id, query, page);
        if let Some(listing) = self.cached(&key) {
            return Ok(listing);
        }
        let source = self.require(id)?;
        let listing = source.fetch_search(query, page).await?;
        self.store(key, &listing);
        Ok(listing)
    }

    /// `None` when the source is unknown or cannot verify itself.
    pub async fn verify(&self, id: i64) -> Option<bool> {
        let source = self.get(id)?;
        let verifiable = source.as_verifiable()?;
        Some(verifiable.verify().await)
    }

    fn require(&self, id: i64) -> Result<Arc<dyn Source>, SourceError> {
        self.get(id)
            .ok_or_else(|| SourceError::NotFound(format!("source {id}")))
    }

    fn cached(&self, key: &str) -> Option<MangaListing> {
        let (items, total_pages) = self.cache.get(key)?;
        pipeline_debug!("Cache hit for {}", key);
        Some(MangaListing { items, total_pages })
    }

    fn store(&self, key: String, listing: &MangaListing) {
        self.cache
            .set(key, listing.items.clone(), listing.total_pages);
    }
}

//! Web search and page fetch, behind a thin provider interface.
//!
//! The pipeline never talks HTTP directly: it goes through
//! [`SearchProvider`], implemented by the rate-limited [`SearxClient`] (and
//! by mocks in tests). Results are `{title, url, snippet}` triples.

mod cache;
pub(crate) mod online;
mod searx;

pub use cache::{search_cache_key, MemorySearchCache, SearchCache, SqliteSearchCache};
pub use online::{FieldSearch, ModelFieldSearch, OnlineSearcher, SnippetFieldSearch};
pub use searx::SearxClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchResult;

/// One search hit as returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchHit {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

/// Thin client interface over a search/crawl provider.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search the web, returning up to `limit` ordered hits.
    async fn search(&self, query: &str, limit: usize) -> SearchResult<Vec<SearchHit>>;

    /// Fetch one page's text. Subject to the same throttling as `search`.
    async fn fetch_page(&self, url: &str) -> SearchResult<String>;

    /// Whether `fetch_page` is worth calling for this provider.
    fn supports_crawl(&self) -> bool {
        false
    }
}

//! Persistent cache for search results and fetched pages.
//!
//! Checked before any network call so repeated queries and page fetches
//! cost nothing. Separate from the field result cache: this one is keyed by
//! normalized query/URL, not by product identifiers.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{StoreError, StoreResult};
use crate::search::SearchHit;

/// Cap on cached page content, matching the crawl text ceiling order.
const MAX_CACHED_PAGE_CHARS: usize = 50_000;

/// Key for a search-result cache entry.
pub fn search_cache_key(query: &str, limit: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{query}|{limit}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// TTL cache for search results and crawled page text.
#[async_trait]
pub trait SearchCache: Send + Sync {
    async fn get_search(&self, key: &str) -> StoreResult<Option<Vec<SearchHit>>>;

    async fn put_search(&self, key: &str, query: &str, hits: &[SearchHit]) -> StoreResult<()>;

    async fn get_page(&self, url: &str) -> StoreResult<Option<String>>;

    async fn put_page(&self, url: &str, content: &str) -> StoreResult<()>;
}

fn is_expired(stored_at: DateTime<Utc>, ttl: Duration) -> bool {
    Utc::now().signed_duration_since(stored_at).num_milliseconds() > ttl.as_millis() as i64
}

fn clip_page(content: &str) -> &str {
    let mut end = content.len().min(MAX_CACHED_PAGE_CHARS);
    while end < content.len() && !content.is_char_boundary(end) {
        end += 1;
    }
    &content[..end]
}

/// Volatile search cache for tests.
pub struct MemorySearchCache {
    ttl: Duration,
    searches: RwLock<HashMap<String, (Vec<SearchHit>, DateTime<Utc>)>>,
    pages: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
}

impl MemorySearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            searches: RwLock::new(HashMap::new()),
            pages: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SearchCache for MemorySearchCache {
    async fn get_search(&self, key: &str) -> StoreResult<Option<Vec<SearchHit>>> {
        let mut searches = self.searches.write().unwrap();
        let expired = searches.get(key).map(|(_, at)| is_expired(*at, self.ttl));
        match expired {
            Some(true) => {
                searches.remove(key);
                Ok(None)
            }
            Some(false) => Ok(searches.get(key).map(|(hits, _)| hits.clone())),
            None => Ok(None),
        }
    }

    async fn put_search(&self, key: &str, _query: &str, hits: &[SearchHit]) -> StoreResult<()> {
        self.searches
            .write()
            .unwrap()
            .insert(key.to_string(), (hits.to_vec(), Utc::now()));
        Ok(())
    }

    async fn get_page(&self, url: &str) -> StoreResult<Option<String>> {
        let mut pages = self.pages.write().unwrap();
        let expired = pages.get(url).map(|(_, at)| is_expired(*at, self.ttl));
        match expired {
            Some(true) => {
                pages.remove(url);
                Ok(None)
            }
            Some(false) => Ok(pages.get(url).map(|(content, _)| content.clone())),
            None => Ok(None),
        }
    }

    async fn put_page(&self, url: &str, content: &str) -> StoreResult<()> {
        self.pages
            .write()
            .unwrap()
            .insert(url.to_string(), (clip_page(content).to_string(), Utc::now()));
        Ok(())
    }
}

/// Persistent search cache backed by SQLite.
pub struct SqliteSearchCache {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteSearchCache {
    pub async fn new(database_url: &str, ttl: Duration) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_cache (
                key TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                results TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crawl_cache (
                url TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool, ttl })
    }

    pub async fn in_memory(ttl: Duration) -> StoreResult<Self> {
        Self::new("sqlite::memory:", ttl).await
    }

    fn cutoff(&self) -> i64 {
        Utc::now().timestamp() - self.ttl.as_secs() as i64
    }
}

#[async_trait]
impl SearchCache for SqliteSearchCache {
    async fn get_search(&self, key: &str) -> StoreResult<Option<Vec<SearchHit>>> {
        let row = sqlx::query("SELECT results, stored_at FROM search_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let stored_at: i64 = row.get("stored_at");
        if stored_at < self.cutoff() {
            sqlx::query("DELETE FROM search_cache WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }
        let results: String = row.get("results");
        let hits = serde_json::from_str(&results)
            .map_err(|e| StoreError::CorruptData(format!("bad cached results: {e}")))?;
        Ok(Some(hits))
    }

    async fn put_search(&self, key: &str, query: &str, hits: &[SearchHit]) -> StoreResult<()> {
        let results =
            serde_json::to_string(hits).map_err(|e| StoreError::CorruptData(e.to_string()))?;
        sqlx::query(
            "INSERT OR REPLACE INTO search_cache (key, query, results, stored_at) VALUES (?, ?, ?, ?)",
        )
        .bind(key)
        .bind(query)
        .bind(results)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_page(&self, url: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT content, stored_at FROM crawl_cache WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let stored_at: i64 = row.get("stored_at");
        if stored_at < self.cutoff() {
            sqlx::query("DELETE FROM crawl_cache WHERE url = ?")
                .bind(url)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }
        Ok(Some(row.get("content")))
    }

    async fn put_page(&self, url: &str, content: &str) -> StoreResult<()> {
        sqlx::query("INSERT OR REPLACE INTO crawl_cache (url, content, stored_at) VALUES (?, ?, ?)")
            .bind(url)
            .bind(clip_page(content))
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_depends_on_query_and_limit() {
        assert_eq!(search_cache_key("a", 3), search_cache_key("a", 3));
        assert_ne!(search_cache_key("a", 3), search_cache_key("a", 5));
        assert_ne!(search_cache_key("a", 3), search_cache_key("b", 3));
    }

    #[tokio::test]
    async fn memory_search_round_trip() {
        let cache = MemorySearchCache::new(Duration::from_secs(60));
        let key = search_cache_key("acetone sds", 3);
        let hits = vec![SearchHit::new("Acetone SDS", "https://example.com", "UN 1090")];
        cache.put_search(&key, "acetone sds", &hits).await.unwrap();
        assert_eq!(cache.get_search(&key).await.unwrap().unwrap(), hits);
    }

    #[tokio::test]
    async fn memory_expired_search_is_absent() {
        let cache = MemorySearchCache::new(Duration::ZERO);
        let key = search_cache_key("acetone sds", 3);
        cache
            .put_search(&key, "acetone sds", &[SearchHit::default()])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get_search(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_page_round_trip_with_clipping() {
        let cache = SqliteSearchCache::in_memory(Duration::from_secs(60)).await.unwrap();
        let long_page = "x".repeat(MAX_CACHED_PAGE_CHARS + 100);
        cache.put_page("https://example.com", &long_page).await.unwrap();
        let cached = cache.get_page("https://example.com").await.unwrap().unwrap();
        assert_eq!(cached.len(), MAX_CACHED_PAGE_CHARS);
        assert!(cache.get_page("https://other.com").await.unwrap().is_none());
    }
}

//! Field-level result cache.
//!
//! Caches retrieved field values keyed by product identifiers (name, CAS,
//! UN) plus field name, so expensive network work is never repeated for
//! data already known. Entries expire after a TTL and are lazily evicted on
//! read. The cache handle is constructed once at startup and injected into
//! every component that needs it; there is no process-wide singleton.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{StoreError, StoreResult};

/// Product identifiers that scope a cached value.
///
/// Absent identifiers are omitted from the key, so a lookup with only a CAS
/// number hits entries stored with only that CAS number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductKey {
    pub product_name: Option<String>,
    pub cas_number: Option<String>,
    pub un_number: Option<String>,
}

impl ProductKey {
    pub fn new(
        product_name: Option<impl Into<String>>,
        cas_number: Option<impl Into<String>>,
        un_number: Option<impl Into<String>>,
    ) -> Self {
        Self {
            product_name: product_name.map(|v| v.into()),
            cas_number: cas_number.map(|v| v.into()),
            un_number: un_number.map(|v| v.into()),
        }
    }

    /// SHA-256 over the normalized identifiers plus the field name.
    pub fn cache_key(&self, field_name: &str) -> String {
        let mut parts = Vec::new();
        if let Some(name) = &self.product_name {
            parts.push(format!("name:{}", name.trim().to_lowercase()));
        }
        if let Some(cas) = &self.cas_number {
            parts.push(format!("cas:{}", cas.trim()));
        }
        if let Some(un) = &self.un_number {
            parts.push(format!("un:{}", un.trim()));
        }
        parts.push(format!("field:{field_name}"));

        let mut hasher = Sha256::new();
        hasher.update(parts.join("|").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn is_empty(&self) -> bool {
        self.product_name.is_none() && self.cas_number.is_none() && self.un_number.is_none()
    }
}

/// A cached field value with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub field_name: String,
    pub value: String,
    pub confidence: f64,
    pub source: String,
    pub source_urls: Vec<String>,
    pub cached_at: DateTime<Utc>,
    pub hit_count: i64,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_hits: i64,
    pub hit_rate: f64,
}

/// TTL key/value cache for retrieved field values.
#[async_trait]
pub trait FieldCache: Send + Sync {
    /// Fresh entry for the key, or `None`. Expired entries are deleted and
    /// reported absent; hits bump the entry's hit count.
    async fn get(&self, field_name: &str, key: &ProductKey) -> StoreResult<Option<CacheEntry>>;

    /// Upsert an entry, resetting its age and hit count.
    async fn put(
        &self,
        field_name: &str,
        key: &ProductKey,
        value: &str,
        confidence: f64,
        source: &str,
        source_urls: &[String],
    ) -> StoreResult<()>;

    /// Drop one entry. Returns whether it existed.
    async fn invalidate(&self, field_name: &str, key: &ProductKey) -> StoreResult<bool>;

    /// Drop every expired entry, returning how many were removed.
    async fn cleanup_expired(&self) -> StoreResult<usize>;

    async fn stats(&self) -> StoreResult<CacheStats>;
}

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

fn is_expired(cached_at: DateTime<Utc>, ttl: Duration) -> bool {
    let age = Utc::now().signed_duration_since(cached_at);
    age.num_milliseconds() > ttl.as_millis() as i64
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Volatile field cache for tests and development.
pub struct MemoryFieldCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryFieldCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Backdate an entry, as if it had been cached `age` ago.
    #[doc(hidden)]
    pub fn backdate(&self, field_name: &str, key: &ProductKey, age: Duration) {
        let cache_key = key.cache_key(field_name);
        if let Some(entry) = self.entries.write().unwrap().get_mut(&cache_key) {
            entry.cached_at = Utc::now() - chrono::Duration::from_std(age).unwrap();
        }
    }
}

impl Default for MemoryFieldCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl FieldCache for MemoryFieldCache {
    async fn get(&self, field_name: &str, key: &ProductKey) -> StoreResult<Option<CacheEntry>> {
        let cache_key = key.cache_key(field_name);
        let mut entries = self.entries.write().unwrap();
        let freshness = entries
            .get(&cache_key)
            .map(|entry| is_expired(entry.cached_at, self.ttl));
        match freshness {
            None => Ok(None),
            Some(true) => {
                tracing::debug!(field = field_name, "cache entry expired");
                entries.remove(&cache_key);
                Ok(None)
            }
            Some(false) => Ok(entries.get_mut(&cache_key).map(|entry| {
                entry.hit_count += 1;
                entry.clone()
            })),
        }
    }

    async fn put(
        &self,
        field_name: &str,
        key: &ProductKey,
        value: &str,
        confidence: f64,
        source: &str,
        source_urls: &[String],
    ) -> StoreResult<()> {
        let cache_key = key.cache_key(field_name);
        self.entries.write().unwrap().insert(
            cache_key,
            CacheEntry {
                field_name: field_name.to_string(),
                value: value.to_string(),
                confidence,
                source: source.to_string(),
                source_urls: source_urls.to_vec(),
                cached_at: Utc::now(),
                hit_count: 0,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, field_name: &str, key: &ProductKey) -> StoreResult<bool> {
        let cache_key = key.cache_key(field_name);
        Ok(self.entries.write().unwrap().remove(&cache_key).is_some())
    }

    async fn cleanup_expired(&self) -> StoreResult<usize> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !is_expired(entry.cached_at, self.ttl));
        Ok(before - entries.len())
    }

    async fn stats(&self) -> StoreResult<CacheStats> {
        let entries = self.entries.read().unwrap();
        let total_entries = entries.len();
        let expired_entries = entries
            .values()
            .filter(|e| is_expired(e.cached_at, self.ttl))
            .count();
        let total_hits: i64 = entries.values().map(|e| e.hit_count).sum();
        Ok(CacheStats {
            total_entries,
            expired_entries,
            total_hits,
            hit_rate: if total_entries > 0 {
                total_hits as f64 / total_entries as f64
            } else {
                0.0
            },
        })
    }
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// Persistent field cache backed by SQLite.
pub struct SqliteFieldCache {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteFieldCache {
    pub async fn new(database_url: &str, ttl: Duration) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS field_cache (
                cache_key TEXT PRIMARY KEY,
                field_name TEXT NOT NULL,
                product_name TEXT,
                cas_number TEXT,
                un_number TEXT,
                value TEXT NOT NULL,
                confidence REAL NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                source_urls TEXT NOT NULL DEFAULT '[]',
                cached_at INTEGER NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_field_cache_age ON field_cache(cached_at);")
            .execute(&pool)
            .await?;
        tracing::info!(ttl_seconds = ttl.as_secs(), "field cache initialized");
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
impl FieldCache for SqliteFieldCache {
    async fn get(&self, field_name: &str, key: &ProductKey) -> StoreResult<Option<CacheEntry>> {
        let cache_key = key.cache_key(field_name);
        let row = sqlx::query(
            r#"
            SELECT field_name, value, confidence, source, source_urls, cached_at, hit_count
            FROM field_cache
            WHERE cache_key = ?
            "#,
        )
        .bind(&cache_key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let cached_at_secs: i64 = row.get("cached_at");
        if cached_at_secs < self.cutoff() {
            tracing::debug!(field = field_name, "cache entry expired");
            sqlx::query("DELETE FROM field_cache WHERE cache_key = ?")
                .bind(&cache_key)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        sqlx::query("UPDATE field_cache SET hit_count = hit_count + 1 WHERE cache_key = ?")
            .bind(&cache_key)
            .execute(&self.pool)
            .await?;

        let source_urls: String = row.get("source_urls");
        let source_urls: Vec<String> = serde_json::from_str(&source_urls).unwrap_or_default();
        let hit_count: i64 = row.get("hit_count");
        Ok(Some(CacheEntry {
            field_name: row.get("field_name"),
            value: row.get("value"),
            confidence: row.get("confidence"),
            source: row.get("source"),
            source_urls,
            cached_at: DateTime::from_timestamp(cached_at_secs, 0)
                .ok_or_else(|| StoreError::CorruptData("bad cached_at".into()))?,
            hit_count: hit_count + 1,
        }))
    }

    async fn put(
        &self,
        field_name: &str,
        key: &ProductKey,
        value: &str,
        confidence: f64,
        source: &str,
        source_urls: &[String],
    ) -> StoreResult<()> {
        let cache_key = key.cache_key(field_name);
        let source_urls =
            serde_json::to_string(source_urls).map_err(|e| StoreError::CorruptData(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO field_cache (
                cache_key, field_name, product_name, cas_number, un_number,
                value, confidence, source, source_urls, cached_at, hit_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&cache_key)
        .bind(field_name)
        .bind(&key.product_name)
        .bind(&key.cas_number)
        .bind(&key.un_number)
        .bind(value)
        .bind(confidence)
        .bind(source)
        .bind(source_urls)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate(&self, field_name: &str, key: &ProductKey) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM field_cache WHERE cache_key = ?")
            .bind(key.cache_key(field_name))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self) -> StoreResult<usize> {
        let result = sqlx::query("DELETE FROM field_cache WHERE cached_at < ?")
            .bind(self.cutoff())
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() as usize;
        if removed > 0 {
            tracing::info!(removed, "cleaned up expired cache entries");
        }
        Ok(removed)
    }

    async fn stats(&self) -> StoreResult<CacheStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN cached_at < ? THEN 1 ELSE 0 END), 0) AS expired,
                COALESCE(SUM(hit_count), 0) AS hits
            FROM field_cache
            "#,
        )
        .bind(self.cutoff())
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.get("total");
        let expired: i64 = row.get("expired");
        let hits: i64 = row.get("hits");
        Ok(CacheStats {
            total_entries: total as usize,
            expired_entries: expired as usize,
            total_hits: hits,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acetone_key() -> ProductKey {
        ProductKey::new(Some("Acetona"), Some("67-64-1"), Some("1090"))
    }

    #[test]
    fn key_normalizes_and_omits_absent_identifiers() {
        let spaced = ProductKey::new(Some("  ACETONA "), Some(" 67-64-1 "), None::<String>);
        let plain = ProductKey::new(Some("acetona"), Some("67-64-1"), None::<String>);
        assert_eq!(spaced.cache_key("numero_onu"), plain.cache_key("numero_onu"));

        let with_un = ProductKey::new(Some("acetona"), Some("67-64-1"), Some("1090"));
        assert_ne!(plain.cache_key("numero_onu"), with_un.cache_key("numero_onu"));
        assert_ne!(plain.cache_key("numero_onu"), plain.cache_key("fabricante"));
    }

    #[tokio::test]
    async fn memory_round_trip_and_hit_count() {
        let cache = MemoryFieldCache::new(Duration::from_secs(60));
        let key = acetone_key();
        cache
            .put("grupo_embalagem", &key, "II", 0.9, "search", &[])
            .await
            .unwrap();

        let hit = cache.get("grupo_embalagem", &key).await.unwrap().unwrap();
        assert_eq!(hit.value, "II");
        assert_eq!(hit.confidence, 0.9);
        assert_eq!(hit.hit_count, 1);

        let again = cache.get("grupo_embalagem", &key).await.unwrap().unwrap();
        assert_eq!(again.hit_count, 2);
    }

    #[tokio::test]
    async fn memory_expired_entries_are_never_returned() {
        let cache = MemoryFieldCache::new(Duration::from_secs(3600));
        let key = acetone_key();
        cache
            .put("grupo_embalagem", &key, "II", 0.9, "search", &[])
            .await
            .unwrap();
        cache.backdate("grupo_embalagem", &key, Duration::from_secs(7200));

        assert!(cache.get("grupo_embalagem", &key).await.unwrap().is_none());
        // Lazy eviction removed the entry entirely.
        assert_eq!(cache.stats().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn sqlite_round_trip() {
        let cache = SqliteFieldCache::in_memory(Duration::from_secs(60)).await.unwrap();
        let key = acetone_key();
        cache
            .put(
                "classificacao_onu",
                &key,
                "3",
                0.85,
                "search",
                &["https://example.com/sds".to_string()],
            )
            .await
            .unwrap();

        let hit = cache.get("classificacao_onu", &key).await.unwrap().unwrap();
        assert_eq!(hit.value, "3");
        assert_eq!(hit.source_urls, vec!["https://example.com/sds".to_string()]);

        assert!(cache.invalidate("classificacao_onu", &key).await.unwrap());
        assert!(cache.get("classificacao_onu", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_reflect_usage() {
        let cache = MemoryFieldCache::new(Duration::from_secs(60));
        let key = acetone_key();
        cache.put("numero_onu", &key, "1090", 0.9, "s", &[]).await.unwrap();
        cache.get("numero_onu", &key).await.unwrap();
        cache.get("numero_onu", &key).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_hits, 2);
        assert_eq!(stats.hit_rate, 2.0);
    }
}

//! SQLite store implementation.
//!
//! A file-based backend suitable for single-server deployments. The pool is
//! capped at one connection so at most one statement is in flight across
//! workers at a time; every statement is short.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{StoreError, StoreResult};
use crate::store::{ExtractionStore, NewDocument, NewExtraction};
use crate::types::document::{
    CrawledPageRecord, DocumentRecord, DocumentStatus, FieldDetail, ValidationStatus,
};

/// SQLite-backed document and extraction store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and migrate) a store at the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - in-memory database (ephemeral)
    /// - `sqlite://extractions.db?mode=rwc` - create file if not exists
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_hash TEXT UNIQUE NOT NULL,
                file_size_bytes INTEGER NOT NULL,
                file_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                processed_at TEXT,
                processing_time_seconds REAL,
                error_message TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extractions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL,
                field_name TEXT NOT NULL,
                value TEXT NOT NULL,
                confidence REAL NOT NULL,
                context TEXT NOT NULL DEFAULT '',
                validation_status TEXT NOT NULL,
                validation_message TEXT,
                source_urls TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );

            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_extractions_document
            ON extractions(document_id, field_name);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crawled_pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                document_id INTEGER NOT NULL,
                field_name TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> StoreResult<DocumentRecord> {
        let status_raw: String = row.get("status");
        let status = DocumentStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::CorruptData(format!("unknown status: {status_raw}")))?;
        let processed_at: Option<String> = row.get("processed_at");
        let processed_at = processed_at
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| StoreError::CorruptData(format!("bad timestamp: {e}")))
            })
            .transpose()?;
        Ok(DocumentRecord {
            id: row.get("id"),
            filename: row.get("filename"),
            file_path: row.get("file_path"),
            content_hash: row.get("file_hash"),
            file_size_bytes: row.get("file_size_bytes"),
            file_type: row.get("file_type"),
            status,
            processed_at,
            processing_time_seconds: row.get("processing_time_seconds"),
            error_message: row.get("error_message"),
        })
    }
}

#[async_trait]
impl ExtractionStore for SqliteStore {
    async fn register_document(&self, new: NewDocument) -> StoreResult<i64> {
        let existing = sqlx::query("SELECT id FROM documents WHERE file_hash = ?")
            .bind(&new.content_hash)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = existing {
            let id: i64 = row.get("id");
            tracing::info!(filename = %new.filename, id, "document already registered");
            return Ok(id);
        }

        tracing::info!(filename = %new.filename, "registering new document");
        let row = sqlx::query(
            r#"
            INSERT INTO documents (filename, file_path, file_hash, file_size_bytes, file_type, status)
            VALUES (?, ?, ?, ?, ?, 'pending')
            RETURNING id
            "#,
        )
        .bind(&new.filename)
        .bind(&new.file_path)
        .bind(&new.content_hash)
        .bind(new.file_size_bytes)
        .bind(&new.file_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn update_status(
        &self,
        document_id: i64,
        status: DocumentStatus,
        processing_time_seconds: Option<f64>,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = ?,
                processed_at = ?,
                processing_time_seconds = COALESCE(?, processing_time_seconds),
                error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(processing_time_seconds)
        .bind(error_message)
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_extractions(&self, document_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM extractions WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn store_extraction(&self, extraction: NewExtraction) -> StoreResult<()> {
        let source_urls = serde_json::to_string(&extraction.source_urls)
            .map_err(|e| StoreError::CorruptData(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO extractions (
                document_id, field_name, value, confidence, context,
                validation_status, validation_message, source_urls, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(extraction.document_id)
        .bind(&extraction.field_name)
        .bind(&extraction.value)
        .bind(extraction.confidence)
        .bind(&extraction.context)
        .bind(extraction.validation_status.as_str())
        .bind(&extraction.validation_message)
        .bind(source_urls)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn field_details(&self, document_id: i64) -> StoreResult<HashMap<String, FieldDetail>> {
        let rows = sqlx::query(
            r#"
            SELECT field_name, value, confidence, validation_status, validation_message
            FROM extractions
            WHERE document_id = ?
            ORDER BY id DESC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut details: HashMap<String, FieldDetail> = HashMap::new();
        for row in rows {
            let field_name: String = row.get("field_name");
            if details.contains_key(&field_name) {
                continue;
            }
            let status_raw: String = row.get("validation_status");
            let validation_status = ValidationStatus::parse(&status_raw)
                .ok_or_else(|| StoreError::CorruptData(format!("unknown status: {status_raw}")))?;
            details.insert(
                field_name,
                FieldDetail {
                    value: row.get("value"),
                    confidence: row.get("confidence"),
                    validation_status,
                    validation_message: row.get("validation_message"),
                },
            );
        }
        Ok(details)
    }

    async fn list_documents(&self, limit: usize) -> StoreResult<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, filename, file_path, file_hash, file_size_bytes, file_type,
                   status, processed_at, processing_time_seconds, error_message
            FROM documents
            ORDER BY processed_at IS NULL, processed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_document).collect()
    }

    async fn get_document(&self, document_id: i64) -> StoreResult<Option<DocumentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, filename, file_path, file_hash, file_size_bytes, file_type,
                   status, processed_at, processing_time_seconds, error_message
            FROM documents
            WHERE id = ?
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn store_crawled_page(&self, page: CrawledPageRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO crawled_pages (url, document_id, field_name, title, content, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&page.url)
        .bind(page.document_id)
        .bind(&page.field_name)
        .bind(&page.title)
        .bind(&page.content)
        .bind(&page.status)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(hash: &str) -> NewDocument {
        NewDocument {
            filename: "fds.txt".into(),
            file_path: "/tmp/fds.txt".into(),
            content_hash: hash.into(),
            file_size_bytes: 42,
            file_type: "Text".into(),
        }
    }

    #[tokio::test]
    async fn register_deduplicates_by_hash() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.register_document(new_doc("hash-a")).await.unwrap();
        let b = store.register_document(new_doc("hash-a")).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn extraction_history_is_append_only() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.register_document(new_doc("hash-a")).await.unwrap();

        for (value, confidence) in [("1090", 0.5), ("1203", 0.9)] {
            store
                .store_extraction(NewExtraction {
                    document_id: id,
                    field_name: "numero_onu".into(),
                    value: value.into(),
                    confidence,
                    context: String::new(),
                    validation_status: ValidationStatus::Valid,
                    validation_message: None,
                    source_urls: vec!["https://example.com/sds".into()],
                })
                .await
                .unwrap();
        }

        let details = store.field_details(id).await.unwrap();
        assert_eq!(details["numero_onu"].value, "1203");

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM extractions WHERE document_id = ?")
            .bind(id)
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn status_round_trips() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.register_document(new_doc("hash-a")).await.unwrap();
        store
            .update_status(id, DocumentStatus::Success, Some(2.25), None)
            .await
            .unwrap();

        let doc = store.get_document(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Success);
        assert_eq!(doc.processing_time_seconds, Some(2.25));

        let listed = store.list_documents(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }
}

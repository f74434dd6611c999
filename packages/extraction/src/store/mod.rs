//! Persistence for documents and extraction history.
//!
//! The store keeps one [`DocumentRecord`] per unique content hash and an
//! append-only log of [`ExtractionRecord`]s: the current value of a field is
//! the most recent row per `(document_id, field_name)`, and earlier rows are
//! never mutated, preserving full provenance.
//!
//! Two implementations ship: [`MemoryStore`] for tests and development, and
//! [`SqliteStore`] for durable single-server deployments.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::StoreResult;
use crate::types::document::{
    CrawledPageRecord, DocumentRecord, DocumentStatus, FieldDetail, ValidationStatus,
};

/// Input for registering a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub file_path: String,
    pub content_hash: String,
    pub file_size_bytes: i64,
    pub file_type: String,
}

/// Input for one appended extraction row.
#[derive(Debug, Clone)]
pub struct NewExtraction {
    pub document_id: i64,
    pub field_name: String,
    pub value: String,
    pub confidence: f64,
    pub context: String,
    pub validation_status: ValidationStatus,
    pub validation_message: Option<String>,
    pub source_urls: Vec<String>,
}

/// Storage operations the pipeline needs.
///
/// Implementations must tolerate concurrent workers; writes are short
/// statements behind a coarse lock (or a single pooled connection).
#[async_trait]
pub trait ExtractionStore: Send + Sync {
    /// Create a document entry, or return the existing id when the same
    /// content hash is already registered.
    async fn register_document(&self, new: NewDocument) -> StoreResult<i64>;

    /// Record the outcome of a processing attempt.
    async fn update_status(
        &self,
        document_id: i64,
        status: DocumentStatus,
        processing_time_seconds: Option<f64>,
        error_message: Option<&str>,
    ) -> StoreResult<()>;

    /// Drop all extraction rows for a document before a fresh run.
    async fn clear_extractions(&self, document_id: i64) -> StoreResult<()>;

    /// Append one extraction row. Never updates in place.
    async fn store_extraction(&self, extraction: NewExtraction) -> StoreResult<()>;

    /// Latest determination per field for a document.
    async fn field_details(&self, document_id: i64) -> StoreResult<HashMap<String, FieldDetail>>;

    /// Latest raw values per field (convenience over `field_details`).
    async fn field_values(&self, document_id: i64) -> StoreResult<HashMap<String, String>> {
        Ok(self
            .field_details(document_id)
            .await?
            .into_iter()
            .map(|(field, detail)| (field, detail.value))
            .collect())
    }

    /// Recent documents, newest first.
    async fn list_documents(&self, limit: usize) -> StoreResult<Vec<DocumentRecord>>;

    /// Fetch a single document.
    async fn get_document(&self, document_id: i64) -> StoreResult<Option<DocumentRecord>>;

    /// Keep a page fetched during retrieval, for provenance.
    async fn store_crawled_page(&self, page: CrawledPageRecord) -> StoreResult<()>;
}

/// SHA-256 hash of a file's content, hex-encoded.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hash_bytes(&bytes))
}

/// SHA-256 hash of raw bytes, hex-encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_stable_and_content_sensitive() {
        let a = hash_bytes(b"ficha de seguranca");
        let b = hash_bytes(b"ficha de seguranca");
        let c = hash_bytes(b"outra ficha");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}

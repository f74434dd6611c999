//! In-memory store implementation for testing and development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreResult;
use crate::store::{ExtractionStore, NewDocument, NewExtraction};
use crate::types::document::{
    CrawledPageRecord, DocumentRecord, DocumentStatus, ExtractionRecord, FieldDetail,
};

#[derive(Default)]
struct Inner {
    documents: Vec<DocumentRecord>,
    extractions: Vec<ExtractionRecord>,
    crawled_pages: Vec<CrawledPageRecord>,
    next_id: i64,
}

/// Volatile store. Data is lost on drop; not for production use.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of extraction rows kept for a document (provenance depth).
    pub fn extraction_count(&self, document_id: i64) -> usize {
        self.inner
            .read()
            .unwrap()
            .extractions
            .iter()
            .filter(|e| e.document_id == document_id)
            .count()
    }

    /// Number of crawled pages recorded.
    pub fn crawled_page_count(&self) -> usize {
        self.inner.read().unwrap().crawled_pages.len()
    }
}

#[async_trait]
impl ExtractionStore for MemoryStore {
    async fn register_document(&self, new: NewDocument) -> StoreResult<i64> {
        let mut inner = self.inner.write().unwrap();
        if let Some(existing) = inner
            .documents
            .iter()
            .find(|d| d.content_hash == new.content_hash)
        {
            tracing::info!(filename = %new.filename, id = existing.id, "document already registered");
            return Ok(existing.id);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.documents.push(DocumentRecord {
            id,
            filename: new.filename,
            file_path: new.file_path,
            content_hash: new.content_hash,
            file_size_bytes: new.file_size_bytes,
            file_type: new.file_type,
            status: DocumentStatus::Pending,
            processed_at: None,
            processing_time_seconds: None,
            error_message: None,
        });
        Ok(id)
    }

    async fn update_status(
        &self,
        document_id: i64,
        status: DocumentStatus,
        processing_time_seconds: Option<f64>,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(doc) = inner.documents.iter_mut().find(|d| d.id == document_id) {
            doc.status = status;
            doc.processed_at = Some(Utc::now());
            if processing_time_seconds.is_some() {
                doc.processing_time_seconds = processing_time_seconds;
            }
            doc.error_message = error_message.map(|m| m.to_string());
        }
        Ok(())
    }

    async fn clear_extractions(&self, document_id: i64) -> StoreResult<()> {
        self.inner
            .write()
            .unwrap()
            .extractions
            .retain(|e| e.document_id != document_id);
        Ok(())
    }

    async fn store_extraction(&self, extraction: NewExtraction) -> StoreResult<()> {
        self.inner.write().unwrap().extractions.push(ExtractionRecord {
            document_id: extraction.document_id,
            field_name: extraction.field_name,
            value: extraction.value,
            confidence: extraction.confidence,
            context: extraction.context,
            validation_status: extraction.validation_status,
            validation_message: extraction.validation_message,
            source_urls: extraction.source_urls,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn field_details(&self, document_id: i64) -> StoreResult<HashMap<String, FieldDetail>> {
        let inner = self.inner.read().unwrap();
        let mut details = HashMap::new();
        // Newest row wins; iterate in reverse insertion order.
        for extraction in inner
            .extractions
            .iter()
            .rev()
            .filter(|e| e.document_id == document_id)
        {
            details
                .entry(extraction.field_name.clone())
                .or_insert_with(|| FieldDetail {
                    value: extraction.value.clone(),
                    confidence: extraction.confidence,
                    validation_status: extraction.validation_status,
                    validation_message: extraction.validation_message.clone(),
                });
        }
        Ok(details)
    }

    async fn list_documents(&self, limit: usize) -> StoreResult<Vec<DocumentRecord>> {
        let inner = self.inner.read().unwrap();
        let mut documents = inner.documents.clone();
        documents.sort_by(|a, b| b.processed_at.cmp(&a.processed_at).then(b.id.cmp(&a.id)));
        documents.truncate(limit);
        Ok(documents)
    }

    async fn get_document(&self, document_id: i64) -> StoreResult<Option<DocumentRecord>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned())
    }

    async fn store_crawled_page(&self, page: CrawledPageRecord) -> StoreResult<()> {
        self.inner.write().unwrap().crawled_pages.push(page);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document::ValidationStatus;

    fn new_doc(hash: &str) -> NewDocument {
        NewDocument {
            filename: "fds.txt".into(),
            file_path: "/tmp/fds.txt".into(),
            content_hash: hash.into(),
            file_size_bytes: 42,
            file_type: "Text".into(),
        }
    }

    fn extraction(document_id: i64, field: &str, value: &str, confidence: f64) -> NewExtraction {
        NewExtraction {
            document_id,
            field_name: field.into(),
            value: value.into(),
            confidence,
            context: String::new(),
            validation_status: ValidationStatus::Valid,
            validation_message: None,
            source_urls: vec![],
        }
    }

    #[tokio::test]
    async fn same_hash_maps_to_same_document_id() {
        let store = MemoryStore::new();
        let a = store.register_document(new_doc("abc")).await.unwrap();
        let b = store.register_document(new_doc("abc")).await.unwrap();
        let c = store.register_document(new_doc("def")).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn latest_row_wins_and_history_is_kept() {
        let store = MemoryStore::new();
        let id = store.register_document(new_doc("abc")).await.unwrap();
        store
            .store_extraction(extraction(id, "numero_onu", "1090", 0.5))
            .await
            .unwrap();
        store
            .store_extraction(extraction(id, "numero_onu", "1203", 0.9))
            .await
            .unwrap();

        let details = store.field_details(id).await.unwrap();
        assert_eq!(details["numero_onu"].value, "1203");
        assert_eq!(details["numero_onu"].confidence, 0.9);
        assert_eq!(store.extraction_count(id), 2);
    }

    #[tokio::test]
    async fn clear_extractions_resets_a_run() {
        let store = MemoryStore::new();
        let id = store.register_document(new_doc("abc")).await.unwrap();
        store
            .store_extraction(extraction(id, "numero_onu", "1090", 0.5))
            .await
            .unwrap();
        store.clear_extractions(id).await.unwrap();
        assert!(store.field_details(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_update_records_outcome() {
        let store = MemoryStore::new();
        let id = store.register_document(new_doc("abc")).await.unwrap();
        store
            .update_status(id, DocumentStatus::Failed, Some(1.5), Some("boom"))
            .await
            .unwrap();
        let doc = store.get_document(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.error_message.as_deref(), Some("boom"));
        assert!(doc.processed_at.is_some());
    }
}

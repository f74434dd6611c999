//! Batch online enrichment over processed documents.
//!
//! For each document: an optional per-field retrieval pre-pass (web
//! snippets, cache-first), then the processor's online completion step,
//! then bounded rounds of targeted refinement for fields sitting between
//! the low and mid confidence thresholds. Fields below the low threshold
//! are left to retrieval; fields at or above the mid threshold are settled.

use std::sync::Arc;

use crate::cache::ProductKey;
use crate::error::StoreResult;
use crate::processor::DocumentProcessor;
use crate::retrieval::FieldRetriever;
use crate::store::ExtractionStore;
use crate::types::config::RetrievalConfig;
use crate::types::document::DocumentStatus;
use crate::types::field::{names, NOT_FOUND};

/// Coordinates enrichment passes across stored documents.
pub struct OnlineEnricher {
    store: Arc<dyn ExtractionStore>,
    processor: Arc<DocumentProcessor>,
    field_retriever: Option<Arc<FieldRetriever>>,
    config: RetrievalConfig,
}

impl OnlineEnricher {
    pub fn new(
        store: Arc<dyn ExtractionStore>,
        processor: Arc<DocumentProcessor>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            processor,
            field_retriever: None,
            config,
        }
    }

    /// Attach the retrieval pre-pass.
    pub fn with_field_retriever(mut self, retriever: Arc<FieldRetriever>) -> Self {
        self.field_retriever = Some(retriever);
        self
    }

    /// Enrich recent documents. Per-document failures are logged and do not
    /// stop the batch.
    pub async fn enrich_all(&self, limit: usize, only_success: bool) -> StoreResult<usize> {
        let documents = self.store.list_documents(limit).await?;
        let documents: Vec<_> = documents
            .into_iter()
            .filter(|d| !only_success || d.status == DocumentStatus::Success)
            .collect();
        tracing::info!(count = documents.len(), "starting enrichment batch");

        let mut enriched = 0;
        for document in documents {
            match self.enrich_document(document.id).await {
                Ok(()) => enriched += 1,
                Err(err) => {
                    tracing::error!(document_id = document.id, error = %err, "enrichment failed");
                }
            }
        }
        Ok(enriched)
    }

    /// Run the multi-pass enrichment for one document.
    pub async fn enrich_document(&self, document_id: i64) -> StoreResult<()> {
        let details = self.store.field_details(document_id).await?;
        if details.is_empty() {
            tracing::info!(document_id, "no extractions yet, skipping enrichment");
            return Ok(());
        }

        if let Some(retriever) = &self.field_retriever {
            let known_value = |name: &str| {
                details
                    .get(name)
                    .map(|d| d.value.clone())
                    .filter(|v| !v.is_empty() && v != NOT_FOUND)
            };
            let known = ProductKey {
                product_name: known_value(names::NOME_PRODUTO),
                cas_number: known_value(names::NUMERO_CAS),
                un_number: known_value(names::NUMERO_ONU),
            };
            let missing: Vec<String> = details
                .iter()
                .filter(|(_, d)| d.value == NOT_FOUND || d.confidence < self.config.confidence_low)
                .map(|(name, _)| name.clone())
                .collect();
            if !missing.is_empty() {
                tracing::info!(document_id, fields = ?missing, "retrieval pre-pass");
                retriever
                    .retrieve_missing_fields(document_id, &missing, &known)
                    .await;
            }
        }

        tracing::info!(document_id, "enrichment pass 1");
        self.processor.reprocess_online(document_id).await?;

        let mut round = 0;
        while round < self.config.refinement_max_rounds {
            let details = self.store.field_details(document_id).await?;
            let to_refine: Vec<String> = details
                .iter()
                .filter(|(_, d)| {
                    d.value != NOT_FOUND
                        && d.confidence >= self.config.confidence_low
                        && d.confidence < self.config.confidence_mid
                })
                .map(|(name, _)| name.clone())
                .collect();
            if to_refine.is_empty() {
                break;
            }
            tracing::info!(document_id, round = round + 1, fields = ?to_refine, "refinement round");
            self.processor.refine_fields(document_id, &to_refine).await?;
            round += 1;
        }

        Ok(())
    }
}

//! Per-document orchestration.
//!
//! The processing state machine: Received -> Validated -> Extracted
//! (heuristics) -> model pass (conditional) -> online completion
//! (conditional) -> Success | Failed.
//!
//! Escalation is confidence-gated: the offline heuristics run first and can
//! skip the model pass entirely; the model pass keeps the best candidate
//! per field; the online completion step only runs for fields that are
//! still missing or weak, so network cost is the last resort.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;

use crate::cache::ProductKey;
use crate::chunk::{Chunk, ChunkStrategy};
use crate::error::{ProcessResult, StoreResult, ValidationError};
use crate::heuristics::HeuristicExtractor;
use crate::index::SemanticIndex;
use crate::ingest::{file_type_tag, PlainTextExtractor, TextExtractor};
use crate::model::FieldModel;
use crate::search::FieldSearch;
use crate::store::{hash_file, ExtractionStore, NewDocument, NewExtraction};
use crate::types::config::PipelineConfig;
use crate::types::document::{DocumentStatus, FieldDetail, ValidationStatus};
use crate::types::field::{default_field_specs, names, Candidate, FieldSpec, NOT_FOUND};
use crate::un_table::lookup_un;
use crate::validator::validate_field;

/// Chunk-loop early exit: a response this confident ends the field.
const NEAR_CERTAIN: f64 = 0.95;

/// At or above this a stored value counts as settled/known.
const ACCEPTABLE_CONFIDENCE: f64 = 0.7;

/// Online results below this floor are discarded.
const ONLINE_STORE_FLOOR: f64 = 0.5;

/// Ceiling on concatenated refinement context.
const REFINE_CONTEXT_CHARS: usize = 4000;

/// Whether a run stops after local stages or continues onto the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessMode {
    #[default]
    Online,
    Local,
}

impl FromStr for ProcessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Orchestrates the full extraction flow for a single document.
pub struct DocumentProcessor {
    store: Arc<dyn ExtractionStore>,
    model: Option<Arc<dyn FieldModel>>,
    online_search: Option<Arc<dyn FieldSearch>>,
    index: Option<Arc<dyn SemanticIndex>>,
    extractors: Vec<Arc<dyn TextExtractor>>,
    chunker: ChunkStrategy,
    heuristics: HeuristicExtractor,
    fields: Vec<FieldSpec>,
    config: PipelineConfig,
}

impl DocumentProcessor {
    pub fn new(store: Arc<dyn ExtractionStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            model: None,
            online_search: None,
            index: None,
            extractors: vec![Arc::new(PlainTextExtractor::new())],
            chunker: ChunkStrategy::new(config.chunk_size),
            heuristics: HeuristicExtractor::new(),
            fields: default_field_specs(),
            config,
        }
    }

    /// Attach a model. Without one, the model pass is skipped everywhere.
    pub fn with_model(mut self, model: Arc<dyn FieldModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Attach an online completion provider, used in online mode.
    pub fn with_online_search(mut self, search: Arc<dyn FieldSearch>) -> Self {
        self.online_search = Some(search);
        self
    }

    /// Attach a semantic index for prompt narrowing and refinement.
    pub fn with_semantic_index(mut self, index: Arc<dyn SemanticIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Replace the extractor chain.
    pub fn with_extractors(mut self, extractors: Vec<Arc<dyn TextExtractor>>) -> Self {
        self.extractors = extractors;
        self
    }

    /// Replace the field set.
    pub fn with_fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.fields = fields;
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Fully process a document file. Returns its id.
    ///
    /// Validation failures happen before any registration, so an oversized
    /// or unsupported file leaves no record behind. Once registered, every
    /// outcome is attributable: extraction failure marks the document
    /// failed (with the error and elapsed time) and propagates.
    pub async fn process(&self, path: &Path, mode: ProcessMode) -> ProcessResult<i64> {
        tracing::info!(path = %path.display(), ?mode, "processing document");

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            ValidationError::Unreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        if metadata.len() > self.config.max_file_size_bytes {
            return Err(ValidationError::FileTooLarge {
                path: path.to_path_buf(),
                size_bytes: metadata.len(),
                limit_bytes: self.config.max_file_size_bytes,
            }
            .into());
        }
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.can_handle(path))
            .ok_or_else(|| ValidationError::UnsupportedType {
                path: path.to_path_buf(),
            })?
            .clone();

        let start = Instant::now();
        let content_hash = hash_file(path).await.map_err(|e| ValidationError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let document_id = self
            .store
            .register_document(NewDocument {
                filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                file_path: path.to_string_lossy().into_owned(),
                content_hash,
                file_size_bytes: metadata.len() as i64,
                file_type: file_type_tag(path).unwrap_or("Unknown").to_string(),
            })
            .await?;

        // A re-run of the same content starts from a clean slate.
        self.store.clear_extractions(document_id).await?;

        let outcome = self.extract_document(document_id, &extractor, path).await;
        let elapsed = start.elapsed().as_secs_f64();
        match &outcome {
            Ok(()) => {
                self.store
                    .update_status(document_id, DocumentStatus::Success, Some(elapsed), None)
                    .await?;
                tracing::info!(document_id, elapsed_s = elapsed, "document processed");
            }
            Err(err) => {
                self.store
                    .update_status(
                        document_id,
                        DocumentStatus::Failed,
                        Some(elapsed),
                        Some(&err.to_string()),
                    )
                    .await?;
                tracing::error!(document_id, error = %err, "document processing failed");
            }
        }

        if mode == ProcessMode::Online {
            if let Err(err) = self.complete_online(document_id).await {
                tracing::error!(document_id, error = %err, "online completion step failed");
            }
        }

        outcome.map(|_| document_id)
    }

    /// Re-run only the network-side completion for an already processed
    /// document: offline UN-table enrichment first, then online search.
    pub async fn reprocess_online(&self, document_id: i64) -> StoreResult<()> {
        self.enrich_with_un_table(document_id).await?;
        self.complete_online(document_id).await
    }

    async fn extract_document(
        &self,
        document_id: i64,
        extractor: &Arc<dyn TextExtractor>,
        path: &Path,
    ) -> ProcessResult<()> {
        let document = extractor.extract(path).await?;
        let chunks = self
            .chunker
            .make_chunks(&document.text, document.sections.as_ref());

        if let Some(index) = &self.index {
            if !chunks.is_empty() {
                if let Err(err) = index.index_chunks(document_id, &chunks).await {
                    tracing::error!(document_id, error = %err, "failed to index chunks");
                }
            }
        }

        let hints = self
            .heuristics
            .extract(&document.text, document.sections.as_ref());

        self.run_field_extractions(document_id, &chunks, &hints)
            .await?;
        self.enrich_with_un_table(document_id).await?;
        Ok(())
    }

    async fn run_field_extractions(
        &self,
        document_id: i64,
        chunks: &[Chunk],
        hints: &IndexMap<String, Candidate>,
    ) -> ProcessResult<()> {
        if chunks.is_empty() {
            tracing::warn!(document_id, "no content found for document");
            return Ok(());
        }

        // One confident heuristic anywhere skips the model for the whole
        // document, trading possible under-extraction for latency.
        let skip_all = self.model.is_none()
            || hints
                .values()
                .any(|h| h.confidence >= self.config.heuristic_confidence_skip);

        for field in &self.fields {
            let mut best = hints.get(&field.name).cloned().unwrap_or_default();
            let skip_model =
                skip_all || best.confidence >= self.config.heuristic_confidence_skip;

            if let Some(model) = &self.model {
                if !skip_model {
                    let prompt_chunks = self.prompt_chunks(field, &best, chunks).await;
                    for chunk in &prompt_chunks {
                        let prompt = field.prompt(&chunk.label, &chunk.text);
                        let response = match model.extract_field(&field.label, &prompt).await {
                            Ok(response) => response,
                            Err(err) => {
                                tracing::warn!(
                                    field = %field.name,
                                    error = %err,
                                    "model call failed, degrading"
                                );
                                Candidate::error(err.to_string())
                            }
                        };
                        if response.confidence >= best.confidence {
                            best = response;
                        }
                        if best.confidence >= NEAR_CERTAIN {
                            break;
                        }
                    }
                }
            }

            self.persist_candidate(document_id, &field.name, &best, best.context.clone())
                .await?;
        }

        Ok(())
    }

    /// Chunks to prompt with: top-K similar chunks when an index exists,
    /// else every chunk.
    async fn prompt_chunks(
        &self,
        field: &FieldSpec,
        hint: &Candidate,
        chunks: &[Chunk],
    ) -> Vec<Chunk> {
        let Some(index) = &self.index else {
            return chunks.to_vec();
        };
        let hint_val = if hint.is_found() { hint.value.as_str() } else { "" };
        let query = format!("{} {}", field.label, hint_val);
        match index.search(query.trim(), self.config.retrieval.retrieval_top_k).await {
            Ok(scored) if !scored.is_empty() => scored
                .into_iter()
                .map(|s| Chunk::new(s.label, s.text))
                .collect(),
            Ok(_) => chunks.to_vec(),
            Err(err) => {
                tracing::warn!(field = %field.name, error = %err, "semantic search failed");
                chunks.to_vec()
            }
        }
    }

    /// Fill hazard class and packing group from the offline UN table when
    /// the current values are missing or weak.
    async fn enrich_with_un_table(&self, document_id: i64) -> StoreResult<()> {
        let details = self.store.field_details(document_id).await?;
        let Some(un_value) = details.get(names::NUMERO_ONU).map(|d| d.value.clone()) else {
            return Ok(());
        };
        let Some(entry) = lookup_un(&un_value) else {
            return Ok(());
        };

        let fills = [
            (names::CLASSIFICACAO_ONU, entry.hazard_class.as_deref()),
            (names::GRUPO_EMBALAGEM, entry.packing_group.as_deref()),
        ];
        for (field_name, table_value) in fills {
            let current = details.get(field_name);
            let settled = current.is_some_and(|d| {
                d.value != NOT_FOUND && !d.value.is_empty() && d.confidence >= ACCEPTABLE_CONFIDENCE
            });
            if settled {
                continue;
            }
            let Some(value) = table_value.filter(|v| !v.is_empty()) else {
                continue;
            };

            let candidate = Candidate::new(value, 0.95).with_context("Tabela ONU (offline)");
            self.persist_candidate(document_id, field_name, &candidate, candidate.context.clone())
                .await?;
            tracing::info!(field = field_name, value, "field filled from UN table");
        }
        Ok(())
    }

    /// Online completion: fill fields still missing or weak from the web.
    async fn complete_online(&self, document_id: i64) -> StoreResult<()> {
        let Some(client) = &self.online_search else {
            return Ok(());
        };

        let details = self.store.field_details(document_id).await?;
        let (known, mut missing) = self.classify_fields(&details);

        // Incompatibilities only ever come from the online step.
        if !missing.iter().any(|f| f == names::INCOMPATIBILIDADES) {
            missing.push(names::INCOMPATIBILIDADES.to_string());
        }

        tracing::info!(document_id, fields = ?missing, "searching online for missing fields");
        let results = match client.search_for_fields(&known, &missing).await {
            Ok(results) => results,
            Err(err) => {
                tracing::error!(document_id, error = %err, "online search failed");
                return Ok(());
            }
        };

        for (field_name, candidate) in results {
            if candidate.confidence <= ONLINE_STORE_FLOOR {
                continue;
            }
            // Never regress a field to a lower-confidence determination.
            let current_confidence = details
                .get(&field_name)
                .map(|d| d.confidence)
                .unwrap_or(0.0);
            if candidate.confidence <= current_confidence {
                continue;
            }
            let context = format!("Online search: {}", candidate.context);
            self.persist_candidate(document_id, &field_name, &candidate, context)
                .await?;
            tracing::info!(
                field = %field_name,
                confidence = candidate.confidence,
                "field updated from online search"
            );
        }
        Ok(())
    }

    /// Targeted refinement: re-ask the model over top-K index context,
    /// keeping a result only when its confidence strictly improves.
    pub async fn refine_fields(&self, document_id: i64, field_names: &[String]) -> StoreResult<()> {
        let (Some(model), Some(index)) = (&self.model, &self.index) else {
            return Ok(());
        };

        let details = self.store.field_details(document_id).await?;
        for field_name in field_names {
            let Some(spec) = self.fields.iter().find(|f| &f.name == field_name) else {
                continue;
            };
            let current = details.get(field_name);
            let current_confidence = current.map(|d| d.confidence).unwrap_or(0.0);
            let hint = current.map(|d| d.value.clone()).unwrap_or_default();

            let query = format!("{} {}", spec.label, hint);
            let scored = match index
                .search(query.trim(), self.config.retrieval.retrieval_top_k)
                .await
            {
                Ok(scored) => scored,
                Err(_) => Vec::new(),
            };
            let mut combined = String::new();
            for chunk in scored {
                if combined.chars().count() >= REFINE_CONTEXT_CHARS {
                    break;
                }
                if !combined.is_empty() {
                    combined.push_str("\n\n");
                }
                combined.push_str(&chunk.text);
            }
            if combined.is_empty() {
                continue;
            }
            let combined: String = combined.chars().take(REFINE_CONTEXT_CHARS).collect();

            let prompt = spec.prompt("REFINE", &combined);
            let response = match model.extract_field(&spec.label, &prompt).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(field = %field_name, error = %err, "refine model call failed");
                    continue;
                }
            };

            if response.confidence > current_confidence {
                self.persist_candidate(
                    document_id,
                    field_name,
                    &response,
                    "refine:semantic".to_string(),
                )
                .await?;
                tracing::info!(
                    field = %field_name,
                    from = current_confidence,
                    to = response.confidence,
                    "refinement improved field"
                );
            }
        }
        Ok(())
    }

    /// Split stored fields into known identifiers and missing names.
    fn classify_fields(
        &self,
        details: &HashMap<String, FieldDetail>,
    ) -> (ProductKey, Vec<String>) {
        let mut missing = Vec::new();
        for field in &self.fields {
            let detail = details.get(&field.name);
            let confidence = detail.map(|d| d.confidence).unwrap_or(0.0);
            let value = detail.map(|d| d.value.as_str()).unwrap_or(NOT_FOUND);
            let invalid = detail
                .map(|d| d.validation_status == ValidationStatus::Invalid)
                .unwrap_or(true);
            if confidence < ACCEPTABLE_CONFIDENCE || invalid || value == NOT_FOUND {
                missing.push(field.name.clone());
            }
        }

        let known_value = |name: &str| {
            details
                .get(name)
                .filter(|d| d.confidence >= ACCEPTABLE_CONFIDENCE && d.value != NOT_FOUND)
                .map(|d| d.value.clone())
        };
        let known = ProductKey {
            product_name: known_value(names::NOME_PRODUTO),
            cas_number: known_value(names::NUMERO_CAS),
            un_number: known_value(names::NUMERO_ONU),
        };
        (known, missing)
    }

    async fn persist_candidate(
        &self,
        document_id: i64,
        field_name: &str,
        candidate: &Candidate,
        context: String,
    ) -> StoreResult<()> {
        let (status, message) = validate_field(field_name, candidate);
        self.store
            .store_extraction(NewExtraction {
                document_id,
                field_name: field_name.to_string(),
                value: candidate.value.clone(),
                confidence: candidate.confidence,
                context,
                validation_status: status,
                validation_message: message,
                source_urls: candidate.source_urls.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::store::MemoryStore;
    use crate::testing::{FailingExtractor, MockFieldSearch, MockModel, StaticExtractor};
    use std::path::PathBuf;

    const SAMPLE_FDS: &str = "SEÇÃO 1 - Identificação\n\
        Nome do produto: Acetona PA\n\
        Fabricante: Quimica Exemplo Ltda\n\
        SEÇÃO 14 - Informações sobre transporte\n\
        Numero ONU: UN1090\n\
        Grupo de embalagem: II\n";

    fn temp_doc(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fds.txt");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    fn processor(store: Arc<MemoryStore>) -> DocumentProcessor {
        DocumentProcessor::new(store, PipelineConfig::default())
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_registration() {
        let store = Arc::new(MemoryStore::new());
        let mut config = PipelineConfig::default();
        config.max_file_size_bytes = 8;
        let processor = DocumentProcessor::new(store.clone(), config);

        let (_dir, path) = temp_doc("this file is definitely larger than eight bytes");
        let err = processor.process(&path, ProcessMode::Local).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Validation(ValidationError::FileTooLarge { .. })
        ));
        assert!(store.list_documents(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_file_type_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        std::fs::write(&path, "png bytes").unwrap();

        let err = processor.process(&path, ProcessMode::Local).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Validation(ValidationError::UnsupportedType { .. })
        ));
        assert!(store.list_documents(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confident_heuristic_skips_model_for_whole_document() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(MockModel::new());
        let processor = processor(store.clone()).with_model(model.clone());

        let (_dir, path) = temp_doc(SAMPLE_FDS);
        let id = processor.process(&path, ProcessMode::Local).await.unwrap();

        // UN1090 scored 0.95 >= 0.82, so not a single model call was made.
        assert_eq!(model.calls(), 0);

        let details = store.field_details(id).await.unwrap();
        assert_eq!(details[names::NUMERO_ONU].value, "1090");
        assert_eq!(details[names::GRUPO_EMBALAGEM].value, "II");
        assert_eq!(
            details[names::NUMERO_ONU].validation_status,
            ValidationStatus::Valid
        );
        // Every configured field got a determination, found or not.
        assert_eq!(details.len(), 6);
    }

    #[tokio::test]
    async fn weak_heuristics_trigger_model_pass() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(
            MockModel::new()
                .with_response("Numero CAS", Candidate::new("67-64-1", 0.9)),
        );
        let processor = DocumentProcessor::new(store.clone(), PipelineConfig::default())
            .with_model(model.clone())
            .with_extractors(vec![Arc::new(StaticExtractor::new(
                "Produto: Solvente industrial para limpeza",
            ))]);

        let (_dir, path) = temp_doc("placeholder");
        let id = processor.process(&path, ProcessMode::Local).await.unwrap();

        assert!(model.calls() > 0);
        let details = store.field_details(id).await.unwrap();
        assert_eq!(details[names::NUMERO_CAS].value, "67-64-1");
        assert_eq!(details[names::NUMERO_CAS].confidence, 0.9);
        // The weak heuristic name survived because the model had nothing
        // better (NAO ENCONTRADO at 0.0 does not beat 0.75).
        assert_eq!(details[names::NOME_PRODUTO].value, "Solvente industrial para limpeza");
    }

    #[tokio::test]
    async fn model_failure_degrades_field_without_aborting() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(MockModel::new().with_failure("Numero CAS"));
        let processor = DocumentProcessor::new(store.clone(), PipelineConfig::default())
            .with_model(model)
            .with_extractors(vec![Arc::new(StaticExtractor::new("texto sem padroes"))]);

        let (_dir, path) = temp_doc("placeholder");
        let id = processor.process(&path, ProcessMode::Local).await.unwrap();

        let doc = store.get_document(id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Success);
        let details = store.field_details(id).await.unwrap();
        assert_eq!(details[names::NUMERO_CAS].value, crate::types::field::ERROR_VALUE);
    }

    #[tokio::test]
    async fn extraction_failure_marks_document_failed_and_propagates() {
        let store = Arc::new(MemoryStore::new());
        let processor = DocumentProcessor::new(store.clone(), PipelineConfig::default())
            .with_extractors(vec![Arc::new(FailingExtractor)]);

        let (_dir, path) = temp_doc(SAMPLE_FDS);
        let err = processor.process(&path, ProcessMode::Local).await.unwrap_err();
        assert!(matches!(err, ProcessError::Extraction { .. }));

        let docs = store.list_documents(10).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status, DocumentStatus::Failed);
        assert!(docs[0].error_message.as_deref().unwrap().contains("mock extraction"));
        assert!(docs[0].processing_time_seconds.is_some());
    }

    #[tokio::test]
    async fn identical_content_reuses_the_document_id() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());

        let (_dir, path) = temp_doc(SAMPLE_FDS);
        let first = processor.process(&path, ProcessMode::Local).await.unwrap();
        let second = processor.process(&path, ProcessMode::Local).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_documents(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn un_table_fills_transport_fields_offline() {
        let store = Arc::new(MemoryStore::new());
        let processor = DocumentProcessor::new(store.clone(), PipelineConfig::default())
            .with_extractors(vec![Arc::new(StaticExtractor::new(
                "Numero ONU: UN1830 acido para baterias",
            ))]);

        let (_dir, path) = temp_doc("placeholder");
        let id = processor.process(&path, ProcessMode::Local).await.unwrap();

        let details = store.field_details(id).await.unwrap();
        assert_eq!(details[names::CLASSIFICACAO_ONU].value, "8");
        assert_eq!(details[names::CLASSIFICACAO_ONU].confidence, 0.95);
        assert_eq!(details[names::GRUPO_EMBALAGEM].value, "II");
        assert_eq!(details[names::GRUPO_EMBALAGEM].confidence, 0.95);
    }

    #[tokio::test]
    async fn online_mode_fills_missing_fields_and_incompatibilities() {
        let store = Arc::new(MemoryStore::new());
        let online = Arc::new(
            MockFieldSearch::new()
                .with_result(
                    names::INCOMPATIBILIDADES,
                    Candidate::new("Oxidantes fortes, acidos", 0.8)
                        .with_context("PubChem")
                        .with_source_urls(["https://pubchem.ncbi.nlm.nih.gov/compound/180"]),
                )
                .with_result(names::FABRICANTE, Candidate::new("low", 0.3)),
        );
        let processor = DocumentProcessor::new(store.clone(), PipelineConfig::default())
            .with_online_search(online.clone())
            .with_extractors(vec![Arc::new(StaticExtractor::new(SAMPLE_FDS))]);

        let (_dir, path) = temp_doc("placeholder");
        let id = processor.process(&path, ProcessMode::Online).await.unwrap();

        assert_eq!(online.calls(), 1);
        let details = store.field_details(id).await.unwrap();
        assert!(details[names::INCOMPATIBILIDADES].value.contains("Oxidantes"));
        // Below the online floor, discarded.
        assert_ne!(details[names::FABRICANTE].value, "low");
    }

    #[tokio::test]
    async fn online_results_never_regress_confidence() {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .register_document(NewDocument {
                filename: "fds.txt".into(),
                file_path: "/tmp/fds.txt".into(),
                content_hash: "h".into(),
                file_size_bytes: 1,
                file_type: "Text".into(),
            })
            .await
            .unwrap();
        // A warning-level value: missing by the 0.7 bar, but already decent.
        let candidate = Candidate::new("Quimica Exemplo", 0.65);
        let processor = DocumentProcessor::new(store.clone(), PipelineConfig::default())
            .with_online_search(Arc::new(
                MockFieldSearch::new()
                    .with_result(names::FABRICANTE, Candidate::new("Outra Empresa", 0.55)),
            ));
        processor
            .persist_candidate(id, names::FABRICANTE, &candidate, String::new())
            .await
            .unwrap();

        processor.reprocess_online(id).await.unwrap();

        let details = store.field_details(id).await.unwrap();
        assert_eq!(details[names::FABRICANTE].value, "Quimica Exemplo");
        assert_eq!(details[names::FABRICANTE].confidence, 0.65);
    }

    #[tokio::test]
    async fn refinement_keeps_only_strict_improvements() {
        use crate::index::InMemoryIndex;
        use crate::testing::HashEmbedder;

        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(InMemoryIndex::new(Arc::new(HashEmbedder::new(32))));
        index
            .index_chunks(1, &[Chunk::new("Secao 14", "Grupo de embalagem: II")])
            .await
            .unwrap();

        let id = store
            .register_document(NewDocument {
                filename: "fds.txt".into(),
                file_path: "/tmp/fds.txt".into(),
                content_hash: "h".into(),
                file_size_bytes: 1,
                file_type: "Text".into(),
            })
            .await
            .unwrap();
        assert_eq!(id, 1);

        let model = Arc::new(
            MockModel::new().with_response("Grupo de Embalagem", Candidate::new("II", 0.85)),
        );
        let processor = DocumentProcessor::new(store.clone(), PipelineConfig::default())
            .with_model(model)
            .with_semantic_index(index.clone());

        let weak = Candidate::new("III", 0.65);
        processor
            .persist_candidate(id, names::GRUPO_EMBALAGEM, &weak, String::new())
            .await
            .unwrap();

        processor
            .refine_fields(id, &[names::GRUPO_EMBALAGEM.to_string()])
            .await
            .unwrap();
        let details = store.field_details(id).await.unwrap();
        assert_eq!(details[names::GRUPO_EMBALAGEM].value, "II");
        assert_eq!(details[names::GRUPO_EMBALAGEM].confidence, 0.85);

        // A second round with the same 0.85 response is not an improvement.
        processor
            .refine_fields(id, &[names::GRUPO_EMBALAGEM.to_string()])
            .await
            .unwrap();
        assert_eq!(store.extraction_count(id), 2);
    }
}

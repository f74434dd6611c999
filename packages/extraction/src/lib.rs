//! Confidence-Driven SDS Field Extraction
//!
//! Extracts structured chemical-safety fields (UN number, CAS number,
//! hazard class, packing group, product name, manufacturer,
//! incompatibilities) from unstructured safety-data-sheet text, producing
//! confidence-scored, provenance-tracked values for compliance workflows.
//!
//! # Design Philosophy
//!
//! **Escalate only when cheaper stages fall short**
//!
//! - Offline pattern rules first, at zero network cost
//! - A language-model pass only for documents the rules left uncertain
//! - Internet retrieval last, behind caches, rate limits and backoff
//! - Confidence gates every transition; values never silently regress
//! - Every determination is appended, never overwritten: full provenance
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sds_extraction::{
//!     DocumentProcessor, MemoryStore, PipelineConfig, ProcessMode, ProcessingQueue,
//! };
//!
//! let store = Arc::new(MemoryStore::new());
//! let processor = Arc::new(DocumentProcessor::new(store, PipelineConfig::default()));
//!
//! let (mut queue, mut events) = ProcessingQueue::new(processor, 2);
//! queue.start();
//! queue.enqueue("fds/acetona.txt", ProcessMode::Online);
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```
//!
//! # Modules
//!
//! - [`processor`] - Per-document orchestration state machine
//! - [`heuristics`] - Regex/rule extraction, the zero-cost first stage
//! - [`chunk`] - Model input chunking
//! - [`validator`] - Tri-state syntax/range validation
//! - [`search`] - Rate-limited search/crawl clients and online completion
//! - [`retrieval`] - Per-field query building and bounded retry rounds
//! - [`cache`] - TTL field result cache
//! - [`store`] - Documents and append-only extraction history
//! - [`enricher`] - Batch online enrichment and targeted refinement
//! - [`queue`] - Bounded worker pool
//! - [`index`] - Optional semantic retrieval index
//! - [`model`] - Language-model seam (OpenAI-compatible client included)
//! - [`un_table`] - Offline UN number lookup
//! - [`testing`] - Mocks for applications and tests

pub mod cache;
pub mod chunk;
pub mod enricher;
pub mod error;
pub mod heuristics;
pub mod index;
pub mod ingest;
pub mod model;
pub mod processor;
pub mod queue;
pub mod retrieval;
pub mod search;
pub mod store;
pub mod testing;
pub mod types;
pub mod un_table;
pub mod validator;

// Re-export core types at crate root
pub use cache::{CacheEntry, CacheStats, FieldCache, MemoryFieldCache, ProductKey, SqliteFieldCache};
pub use chunk::{Chunk, ChunkStrategy};
pub use enricher::OnlineEnricher;
pub use error::{
    ModelError, ProcessError, ProcessResult, SearchError, StoreError, ValidationError,
};
pub use heuristics::HeuristicExtractor;
pub use index::{cosine_similarity, Embedder, InMemoryIndex, ScoredChunk, SemanticIndex};
pub use ingest::{
    file_type_tag, list_supported_files, split_sections, DocumentText, PlainTextExtractor,
    TextExtractor, SUPPORTED_FORMATS,
};
pub use model::{FieldModel, OpenAiCompatModel};
pub use processor::{DocumentProcessor, ProcessMode};
pub use queue::{ProcessingJob, ProcessingQueue, QueueEvent};
pub use retrieval::{FieldQueryBuilder, FieldRetriever, RetrievalResult};
pub use search::{
    FieldSearch, MemorySearchCache, ModelFieldSearch, OnlineSearcher, SearchCache, SearchHit,
    SearchProvider, SearxClient, SnippetFieldSearch, SqliteSearchCache,
};
pub use store::{ExtractionStore, MemoryStore, NewDocument, NewExtraction, SqliteStore};
pub use types::config::{ModelConfig, PipelineConfig, RetrievalConfig, SearchConfig};
pub use types::document::{
    DocumentRecord, DocumentStatus, ExtractionRecord, FieldDetail, ValidationStatus,
};
pub use types::field::{default_field_specs, Candidate, FieldSpec, ERROR_VALUE, NOT_FOUND};
pub use un_table::{lookup_un, UnEntry};
pub use validator::validate_field;

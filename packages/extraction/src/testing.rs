//! Testing utilities including mock implementations.
//!
//! These make it possible to exercise the pipeline without a model server,
//! a search instance, or the network. All mocks track their calls so tests
//! can assert on interaction counts (e.g. "zero model calls").

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::cache::ProductKey;
use crate::error::{ModelError, ModelResult, ProcessResult, SearchResult};
use crate::index::Embedder;
use crate::ingest::{DocumentText, TextExtractor};
use crate::model::FieldModel;
use crate::search::{FieldSearch, SearchHit, SearchProvider};
use crate::types::field::Candidate;

/// A mock model returning canned candidates keyed by field label.
#[derive(Default)]
pub struct MockModel {
    responses: RwLock<HashMap<String, Candidate>>,
    fail_fields: RwLock<Vec<String>>,
    calls: AtomicUsize,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with this candidate whenever the field label is asked.
    pub fn with_response(self, field_label: impl Into<String>, candidate: Candidate) -> Self {
        self.responses
            .write()
            .unwrap()
            .insert(field_label.into(), candidate);
        self
    }

    /// Fail every call for this field label with a transport error.
    pub fn with_failure(self, field_label: impl Into<String>) -> Self {
        self.fail_fields.write().unwrap().push(field_label.into());
        self
    }

    /// Number of `extract_field` calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FieldModel for MockModel {
    async fn extract_field(&self, field_label: &str, _prompt: &str) -> ModelResult<Candidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_fields
            .read()
            .unwrap()
            .iter()
            .any(|f| f == field_label)
        {
            return Err(ModelError::Http(Box::new(std::io::Error::other(
                "mock connection refused",
            ))));
        }
        Ok(self
            .responses
            .read()
            .unwrap()
            .get(field_label)
            .cloned()
            .unwrap_or_else(Candidate::not_found))
    }

    async fn complete(&self, _system_prompt: &str, _prompt: &str) -> ModelResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("{}".to_string())
    }
}

/// A mock search provider with canned hits, no network.
#[derive(Default)]
pub struct MockSearchProvider {
    hits_by_query: RwLock<HashMap<String, Vec<SearchHit>>>,
    fallback_hits: RwLock<Option<Vec<SearchHit>>>,
    pages: RwLock<HashMap<String, String>>,
    crawl_enabled: bool,
    search_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return these hits for an exact query.
    pub fn with_hits(self, query: impl Into<String>, hits: Vec<SearchHit>) -> Self {
        self.hits_by_query.write().unwrap().insert(query.into(), hits);
        self
    }

    /// Return these hits for any query without an exact entry.
    pub fn with_hits_for_any_query(self, hits: Vec<SearchHit>) -> Self {
        *self.fallback_hits.write().unwrap() = Some(hits);
        self
    }

    /// Serve this page body for a URL and enable crawling.
    pub fn with_page(mut self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.pages.write().unwrap().insert(url.into(), content.into());
        self.crawl_enabled = true;
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str, limit: usize) -> SearchResult<Vec<SearchHit>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let mut hits = self
            .hits_by_query
            .read()
            .unwrap()
            .get(query)
            .cloned()
            .or_else(|| self.fallback_hits.read().unwrap().clone())
            .unwrap_or_default();
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch_page(&self, url: &str) -> SearchResult<String> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pages
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default())
    }

    fn supports_crawl(&self) -> bool {
        self.crawl_enabled
    }
}

/// A mock online field search with canned per-field candidates.
#[derive(Default)]
pub struct MockFieldSearch {
    results: RwLock<HashMap<String, Candidate>>,
    calls: AtomicUsize,
}

impl MockFieldSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, field_name: impl Into<String>, candidate: Candidate) -> Self {
        self.results
            .write()
            .unwrap()
            .insert(field_name.into(), candidate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FieldSearch for MockFieldSearch {
    async fn search_for_fields(
        &self,
        _key: &ProductKey,
        missing_fields: &[String],
    ) -> SearchResult<HashMap<String, Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let results = self.results.read().unwrap();
        Ok(missing_fields
            .iter()
            .filter_map(|f| results.get(f).map(|c| (f.clone(), c.clone())))
            .collect())
    }
}

/// Deterministic embedder: a text always maps to the same vector.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> ModelResult<Vec<f32>> {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = hasher.finalize();

        Ok((0..self.dimensions)
            .map(|i| {
                let byte = hash[i % 32] as f32;
                (byte / 127.5) - 1.0
            })
            .collect())
    }
}

/// A text extractor that always fails, for failure-path tests.
#[derive(Default)]
pub struct FailingExtractor;

#[async_trait]
impl TextExtractor for FailingExtractor {
    fn can_handle(&self, _path: &Path) -> bool {
        true
    }

    async fn extract(&self, path: &Path) -> ProcessResult<DocumentText> {
        Err(crate::error::ProcessError::Extraction {
            path: path.to_path_buf(),
            message: "mock extraction failure".to_string(),
        })
    }
}

/// A text extractor serving fixed content regardless of the file.
pub struct StaticExtractor {
    text: String,
}

impl StaticExtractor {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl TextExtractor for StaticExtractor {
    fn can_handle(&self, _path: &Path) -> bool {
        true
    }

    async fn extract(&self, _path: &Path) -> ProcessResult<DocumentText> {
        Ok(DocumentText::new(self.text.clone()))
    }
}

//! Online completion of missing fields.
//!
//! [`FieldSearch`] is the capability the orchestrator calls when local
//! stages leave a field missing or weak: given the identifiers already
//! known, fill a set of named fields from the internet. Providers implement
//! it explicitly and are selected through the [`OnlineSearcher`] variants
//! rather than any structural typing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::ProductKey;
use crate::error::SearchResult;
use crate::model::{strip_code_fence, FieldModel};
use crate::search::{SearchProvider, SearchHit};
use crate::types::field::{names, Candidate, NOT_FOUND};

/// English display phrase for a field, used in web queries and prompts.
pub(crate) fn field_display(field_name: &str) -> &str {
    match field_name {
        names::NUMERO_CAS => "CAS number",
        names::NUMERO_ONU => "UN number",
        names::NOME_PRODUTO => "product name",
        names::FABRICANTE => "manufacturer",
        names::CLASSIFICACAO_ONU => "UN hazard classification",
        names::GRUPO_EMBALAGEM => "packing group",
        names::INCOMPATIBILIDADES => "chemical incompatibilities",
        other => other,
    }
}

/// Identifier phrase for queries: `"Acetona CAS 67-64-1 UN 1090"`.
pub(crate) fn identifier_text(key: &ProductKey) -> String {
    let mut parts = Vec::new();
    if let Some(name) = key.product_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(name.to_string());
    }
    if let Some(cas) = key.cas_number.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(format!("CAS {cas}"));
    }
    if let Some(un) = key.un_number.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(format!("UN {un}"));
    }
    parts.join(" ")
}

/// Fill named fields for a product from online sources.
#[async_trait]
pub trait FieldSearch: Send + Sync {
    async fn search_for_fields(
        &self,
        key: &ProductKey,
        missing_fields: &[String],
    ) -> SearchResult<HashMap<String, Candidate>>;
}

/// Snippet-based completion over a [`SearchProvider`].
///
/// One query per field; the first non-empty snippet becomes the value,
/// optionally upgraded by crawling the top hit when the provider allows it.
pub struct SnippetFieldSearch {
    provider: Arc<dyn SearchProvider>,
}

impl SnippetFieldSearch {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }

    async fn fill_field(&self, identifiers: &str, field_name: &str) -> Candidate {
        let query = format!("{identifiers} {} safety data sheet", field_display(field_name));
        let hits = match self.provider.search(&query, 3).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::error!(field = field_name, error = %err, "online search failed");
                return Candidate::error(format!("Search error: {err}"));
            }
        };

        let Some(first) = hits.first() else {
            return Candidate::not_found().with_context("No search results");
        };
        let mut snippet = first.snippet.trim().to_string();

        // Crawl the top hit only when the snippet alone is thin.
        if self.provider.supports_crawl() && !first.url.is_empty() {
            if let Ok(page) = self.provider.fetch_page(&first.url).await {
                if page.len() > snippet.len() {
                    snippet = clip(&page, 1000).to_string();
                }
            }
        }

        if snippet.is_empty() {
            return Candidate::not_found().with_context("No search results");
        }
        let candidate = Candidate::new(snippet, 0.7)
            .with_context(format!("search: {}", hit_label(first)));
        if first.url.is_empty() {
            candidate
        } else {
            candidate.with_source_urls([first.url.clone()])
        }
    }
}

fn hit_label(hit: &SearchHit) -> &str {
    if hit.title.is_empty() {
        "search"
    } else {
        &hit.title
    }
}

fn clip(text: &str, max: usize) -> &str {
    let mut end = text.len().min(max);
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    &text[..end]
}

#[async_trait]
impl FieldSearch for SnippetFieldSearch {
    async fn search_for_fields(
        &self,
        key: &ProductKey,
        missing_fields: &[String],
    ) -> SearchResult<HashMap<String, Candidate>> {
        let identifiers = identifier_text(key);
        if identifiers.is_empty() {
            tracing::warn!("no identifiers for online search");
            return Ok(HashMap::new());
        }

        let mut results = HashMap::new();
        for field_name in missing_fields {
            let candidate = self.fill_field(&identifiers, field_name).await;
            results.insert(field_name.clone(), candidate);
        }
        tracing::info!(fields = results.len(), "online search finished");
        Ok(results)
    }
}

/// Model-backed completion for web-capable models.
///
/// Asks the model to consult chemical databases and reply with one JSON
/// object per requested field.
pub struct ModelFieldSearch {
    model: Arc<dyn FieldModel>,
}

const SEARCH_SYSTEM_PROMPT: &str = "Voce e um assistente especializado em buscar informacoes \
    sobre produtos quimicos. Use suas capacidades de busca online para encontrar dados precisos \
    em bases como PubChem, ChemSpider, fichas de seguranca oficiais, e sites de fabricantes. \
    Sempre cite a fonte das informacoes e indique o nivel de confianca.";

impl ModelFieldSearch {
    pub fn new(model: Arc<dyn FieldModel>) -> Self {
        Self { model }
    }

    fn build_prompt(identifiers: &str, missing_fields: &[String]) -> String {
        format!(
            "Preciso encontrar informacoes sobre um produto quimico.\n\
             Identificadores conhecidos: {identifiers}\n\n\
             Pesquise online e retorne os seguintes campos faltantes: {}\n\n\
             Responda estritamente em JSON com este formato, sem texto fora do JSON:\n\
             {{\n  \"campo\": {{\"value\": \"valor\", \"confidence\": 0.0, \"source\": \"url ou fonte\"}}\n}}\n\
             Se nao encontrar algum campo, use \"{NOT_FOUND}\" como value e confidence 0.0.",
            missing_fields.join(", ")
        )
    }

    fn parse_reply(raw: &str, missing_fields: &[String]) -> HashMap<String, Candidate> {
        let content = strip_code_fence(raw);
        let parsed: serde_json::Value = match serde_json::from_str(content) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "online search reply was not valid JSON");
                serde_json::Value::Null
            }
        };

        let mut results = HashMap::new();
        for field_name in missing_fields {
            let entry = parsed.get(field_name);
            let candidate = match entry {
                Some(serde_json::Value::Object(map)) => {
                    let value = map
                        .get("value")
                        .and_then(|v| v.as_str())
                        .unwrap_or(NOT_FOUND);
                    let confidence = map.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    let source = map
                        .get("source")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Online search");
                    let mut candidate = Candidate::new(value, confidence).with_context(source);
                    if source.starts_with("http") {
                        candidate = candidate.with_source_urls([source]);
                    }
                    candidate
                }
                _ => Candidate::not_found().with_context("Not found in online search"),
            };
            results.insert(field_name.clone(), candidate);
        }
        results
    }
}

#[async_trait]
impl FieldSearch for ModelFieldSearch {
    async fn search_for_fields(
        &self,
        key: &ProductKey,
        missing_fields: &[String],
    ) -> SearchResult<HashMap<String, Candidate>> {
        let identifiers = identifier_text(key);
        if identifiers.is_empty() {
            tracing::warn!("no identifiers for online search");
            return Ok(HashMap::new());
        }

        let prompt = Self::build_prompt(&identifiers, missing_fields);
        match self.model.complete(SEARCH_SYSTEM_PROMPT, &prompt).await {
            Ok(raw) => Ok(Self::parse_reply(&raw, missing_fields)),
            Err(err) => {
                tracing::error!(error = %err, "model-backed online search failed");
                Ok(missing_fields
                    .iter()
                    .map(|f| (f.clone(), Candidate::error(err.to_string())))
                    .collect())
            }
        }
    }
}

/// Provider selection for online completion.
pub enum OnlineSearcher {
    /// Web search snippets (optionally crawled).
    Snippet(SnippetFieldSearch),

    /// A web-capable model queried directly.
    Model(ModelFieldSearch),
}

impl OnlineSearcher {
    pub fn snippet(provider: Arc<dyn SearchProvider>) -> Self {
        Self::Snippet(SnippetFieldSearch::new(provider))
    }

    pub fn model(model: Arc<dyn FieldModel>) -> Self {
        Self::Model(ModelFieldSearch::new(model))
    }
}

#[async_trait]
impl FieldSearch for OnlineSearcher {
    async fn search_for_fields(
        &self,
        key: &ProductKey,
        missing_fields: &[String],
    ) -> SearchResult<HashMap<String, Candidate>> {
        match self {
            Self::Snippet(inner) => inner.search_for_fields(key, missing_fields).await,
            Self::Model(inner) => inner.search_for_fields(key, missing_fields).await,
        }
    }
}

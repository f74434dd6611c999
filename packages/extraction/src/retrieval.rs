//! Per-field web retrieval.
//!
//! Builds specialized query variants per field, drives the search client
//! through bounded retry rounds, and writes anything usable through to the
//! field cache so the network work is never repeated.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::cache::{FieldCache, ProductKey};
use crate::error::StoreResult;
use crate::search::online::field_display;
use crate::search::SearchProvider;
use crate::store::{ExtractionStore, NewExtraction};
use crate::types::config::RetrievalConfig;
use crate::types::document::CrawledPageRecord;
use crate::types::field::{names, Candidate, NOT_FOUND};
use crate::validator::validate_field;

/// Outcome of retrieving one field.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub field_name: String,
    pub value: String,
    pub confidence: f64,
    pub source: String,
}

/// Generates deduplicated query variants for a field.
pub struct FieldQueryBuilder;

impl FieldQueryBuilder {
    /// Identifier phrase plus per-field synonym expansions, capped at six.
    pub fn build(field_name: &str, key: &ProductKey) -> Vec<String> {
        let identifiers = crate::search::online::identifier_text(key);

        let extras: &[&str] = match field_name {
            names::NUMERO_CAS => &["CAS number", "chemical abstract service", "CAS registry"],
            names::NUMERO_ONU => &["UN number", "UN ID", "numero ONU"],
            names::CLASSIFICACAO_ONU => &["UN hazard class", "classe ONU", "hazard classification"],
            names::GRUPO_EMBALAGEM => &["packing group", "grupo de embalagem", "UN packing group"],
            names::INCOMPATIBILIDADES => &[
                "incompatibilities",
                "storage incompatibilities",
                "incompatible materials",
            ],
            names::FABRICANTE => &["manufacturer", "fabricante", "supplier"],
            names::NOME_PRODUTO => &["product name", "nome do produto", "trade name"],
            other => return vec![format!("{identifiers} {other} safety data sheet")],
        };

        let mut queries = Vec::new();
        for extra in extras {
            if identifiers.is_empty() {
                queries.push(format!("{extra} safety data sheet"));
            } else {
                queries.push(format!("{identifiers} {extra} safety data sheet"));
                queries.push(format!("{identifiers} {extra} SDS"));
            }
        }

        let mut seen = std::collections::HashSet::new();
        queries.retain(|q| seen.insert(q.clone()));
        queries.truncate(6);
        queries
    }
}

#[derive(Default)]
struct BestHit {
    snippet: String,
    source: String,
    score: f64,
}

/// Executes per-field retrieval and persists intermediate extractions.
pub struct FieldRetriever {
    store: Arc<dyn ExtractionStore>,
    provider: Arc<dyn SearchProvider>,
    cache: Arc<dyn FieldCache>,
    config: RetrievalConfig,
}

impl FieldRetriever {
    pub fn new(
        store: Arc<dyn ExtractionStore>,
        provider: Arc<dyn SearchProvider>,
        cache: Arc<dyn FieldCache>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            provider,
            cache,
            config,
        }
    }

    /// Retrieve each missing field, cache-first.
    ///
    /// Results at or above the low confidence floor are persisted to the
    /// store immediately and written through to the cache. Per-field
    /// failures are contained; the remaining fields still run.
    pub async fn retrieve_missing_fields(
        &self,
        document_id: i64,
        missing_fields: &[String],
        known: &ProductKey,
    ) -> HashMap<String, RetrievalResult> {
        let mut results = HashMap::new();

        for field in missing_fields {
            match self.retrieve_field(document_id, field, known).await {
                Ok(result) => {
                    results.insert(field.clone(), result);
                }
                Err(err) => {
                    tracing::error!(field = %field, error = %err, "field retrieval error");
                }
            }
        }

        results
    }

    async fn retrieve_field(
        &self,
        document_id: i64,
        field: &str,
        known: &ProductKey,
    ) -> StoreResult<RetrievalResult> {
        if let Some(cached) = self.cache.get(field, known).await? {
            if cached.confidence >= self.config.confidence_low {
                tracing::info!(
                    field,
                    confidence = cached.confidence,
                    "using cached value, skipping search"
                );
                let result = RetrievalResult {
                    field_name: field.to_string(),
                    value: cached.value.clone(),
                    confidence: cached.confidence,
                    source: cached.source.clone(),
                };
                self.persist(
                    document_id,
                    &result,
                    format!("cached:{}", cached.source),
                    cached.source_urls.clone(),
                )
                .await?;
                return Ok(result);
            }
        }

        let mut queries = FieldQueryBuilder::build(field, known);
        let best = self.search_rounds(document_id, field, &mut queries).await?;

        let result = if best.snippet.is_empty() {
            RetrievalResult {
                field_name: field.to_string(),
                value: NOT_FOUND.to_string(),
                confidence: 0.0,
                source: "search".to_string(),
            }
        } else {
            // Bounded normalization of the raw score into a confidence.
            let confidence = (0.4 + best.score / 2500.0).min(0.95);
            RetrievalResult {
                field_name: field.to_string(),
                value: best.snippet.clone(),
                confidence,
                source: if best.source.is_empty() {
                    "search".to_string()
                } else {
                    best.source.clone()
                },
            }
        };

        if result.confidence >= self.config.confidence_low {
            let source_urls = if best.source.is_empty() {
                vec![]
            } else {
                vec![best.source.clone()]
            };
            self.persist(
                document_id,
                &result,
                format!("retrieval:{}", result.source),
                source_urls.clone(),
            )
            .await?;
            self.cache
                .put(
                    field,
                    known,
                    &result.value,
                    result.confidence,
                    &result.source,
                    &source_urls,
                )
                .await?;
        }

        Ok(result)
    }

    async fn search_rounds(
        &self,
        document_id: i64,
        field: &str,
        queries: &mut Vec<String>,
    ) -> StoreResult<BestHit> {
        let mut best = BestHit::default();
        let keyword = field_display(field).to_lowercase();

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                queries.shuffle(&mut rand::thread_rng());
                tracing::debug!(field, attempt = attempt + 1, "retrying query variants");
            }

            for query in queries.iter() {
                let hits = match self.provider.search(query, 2).await {
                    Ok(hits) => hits,
                    Err(err) => {
                        tracing::debug!(field, query = %query, error = %err, "search failed");
                        continue;
                    }
                };
                for hit in hits {
                    let snippet = hit.snippet.trim();
                    if snippet.is_empty() {
                        continue;
                    }
                    let mut score = snippet.chars().count() as f64;
                    if snippet.to_lowercase().contains(&keyword) {
                        score *= 1.1;
                    }
                    if score > best.score {
                        best = BestHit {
                            snippet: clip(snippet, 800),
                            source: hit.url.clone(),
                            score,
                        };
                    }
                }
                if best.score > self.config.sufficiency_score {
                    break;
                }
            }

            if best.score < self.config.crawl_score
                && self.provider.supports_crawl()
                && self.config.max_crawl_pages_per_field > 0
            {
                self.crawl_top_hits(document_id, field, queries, &keyword, &mut best)
                    .await?;
            }

            let sufficient = best.score >= self.config.sufficiency_score || !best.snippet.is_empty();
            let last_attempt = attempt + 1 == self.config.max_attempts;
            if sufficient || last_attempt {
                break;
            }

            let backoff = self.config.backoff_base.as_secs_f64() * 2f64.powi(attempt as i32);
            let jitter = backoff * rand::thread_rng().gen_range(-0.15..0.15);
            let sleep = (backoff + jitter).max(0.05);
            tracing::debug!(field, score = best.score, sleep_s = sleep, "insufficient, backing off");
            tokio::time::sleep(std::time::Duration::from_secs_f64(sleep)).await;
        }

        Ok(best)
    }

    /// Crawl the top hit of each variant for a richer, keyword-centered
    /// snippet, bounded by the per-field page limit.
    async fn crawl_top_hits(
        &self,
        document_id: i64,
        field: &str,
        queries: &[String],
        keyword: &str,
        best: &mut BestHit,
    ) -> StoreResult<()> {
        let mut crawled = 0usize;
        for query in queries {
            if crawled >= self.config.max_crawl_pages_per_field {
                break;
            }
            let Ok(hits) = self.provider.search(query, 1).await else {
                continue;
            };
            let Some(hit) = hits.into_iter().next() else {
                continue;
            };
            if hit.url.is_empty() {
                continue;
            }
            let Ok(page) = self.provider.fetch_page(&hit.url).await else {
                continue;
            };
            if page.is_empty() {
                continue;
            }
            crawled += 1;

            self.store
                .store_crawled_page(CrawledPageRecord {
                    url: hit.url.clone(),
                    document_id,
                    field_name: field.to_string(),
                    title: if hit.title.is_empty() {
                        field.to_string()
                    } else {
                        hit.title.clone()
                    },
                    content: clip(&page, self.config.crawl_text_max_chars),
                    status: "ok".to_string(),
                })
                .await?;

            if let Some(focused) = keyword_window(&page, keyword, 400) {
                if focused.chars().count() > best.snippet.chars().count() {
                    best.score = focused.chars().count() as f64;
                    best.snippet = clip(&focused, 800);
                    best.source = hit.url;
                }
            }
        }
        Ok(())
    }

    async fn persist(
        &self,
        document_id: i64,
        result: &RetrievalResult,
        context: String,
        source_urls: Vec<String>,
    ) -> StoreResult<()> {
        let candidate = Candidate::new(result.value.clone(), result.confidence);
        let (status, message) = validate_field(&result.field_name, &candidate);
        self.store
            .store_extraction(NewExtraction {
                document_id,
                field_name: result.field_name.clone(),
                value: result.value.clone(),
                confidence: result.confidence,
                context,
                validation_status: status,
                validation_message: message,
                source_urls,
            })
            .await
    }
}

/// Text window of `pad` chars on each side of the keyword's first
/// occurrence (case-insensitive), or `None` when the keyword is absent.
fn keyword_window(text: &str, keyword: &str, pad: usize) -> Option<String> {
    let lowered = text.to_lowercase();
    let byte_idx = lowered.find(keyword)?;
    let char_idx = lowered[..byte_idx].chars().count();

    let chars: Vec<char> = text.chars().collect();
    let start = char_idx.saturating_sub(pad);
    let end = (char_idx + keyword.chars().count() + pad).min(chars.len());
    Some(chars[start..end].iter().collect::<String>().trim().to_string())
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryFieldCache;
    use crate::search::SearchHit;
    use crate::store::MemoryStore;
    use crate::testing::MockSearchProvider;
    use std::time::Duration;

    fn quick_config() -> RetrievalConfig {
        RetrievalConfig {
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
            ..RetrievalConfig::default()
        }
    }

    fn acetone_key() -> ProductKey {
        ProductKey::new(Some("Acetona"), Some("67-64-1"), None::<String>)
    }

    async fn registered_doc(store: &MemoryStore) -> i64 {
        use crate::store::{ExtractionStore, NewDocument};
        store
            .register_document(NewDocument {
                filename: "fds.txt".into(),
                file_path: "/tmp/fds.txt".into(),
                content_hash: "h".into(),
                file_size_bytes: 1,
                file_type: "Text".into(),
            })
            .await
            .unwrap()
    }

    #[test]
    fn query_variants_are_deduplicated_and_capped() {
        let queries = FieldQueryBuilder::build(names::GRUPO_EMBALAGEM, &acetone_key());
        assert!(queries.len() <= 6);
        let unique: std::collections::HashSet<_> = queries.iter().collect();
        assert_eq!(unique.len(), queries.len());
        assert!(queries[0].contains("Acetona"));
        assert!(queries[0].contains("packing group"));
    }

    #[tokio::test]
    async fn cached_entry_short_circuits_with_zero_search_calls() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockSearchProvider::new());
        let cache = Arc::new(MemoryFieldCache::new(Duration::from_secs(60)));
        let key = acetone_key();
        cache
            .put("grupo_embalagem", &key, "II", 0.8, "pubchem", &[])
            .await
            .unwrap();

        let document_id = registered_doc(&store).await;
        let retriever =
            FieldRetriever::new(store.clone(), provider.clone(), cache, quick_config());
        let results = retriever
            .retrieve_missing_fields(document_id, &["grupo_embalagem".to_string()], &key)
            .await;

        assert_eq!(results["grupo_embalagem"].value, "II");
        assert_eq!(provider.search_calls(), 0);

        // The cached value was re-persisted for this document.
        use crate::store::ExtractionStore;
        let details = store.field_details(document_id).await.unwrap();
        assert_eq!(details["grupo_embalagem"].value, "II");
    }

    #[tokio::test]
    async fn retrieval_persists_and_caches_good_results() {
        let store = Arc::new(MemoryStore::new());
        let snippet = "The UN packing group for acetone is II. ".repeat(20);
        let provider = Arc::new(MockSearchProvider::new().with_hits_for_any_query(vec![
            SearchHit::new("Acetone SDS", "https://example.com/sds", snippet),
        ]));
        let cache = Arc::new(MemoryFieldCache::new(Duration::from_secs(60)));
        let key = acetone_key();

        let document_id = registered_doc(&store).await;
        let retriever =
            FieldRetriever::new(store.clone(), provider, cache.clone(), quick_config());
        let results = retriever
            .retrieve_missing_fields(document_id, &["grupo_embalagem".to_string()], &key)
            .await;

        let result = &results["grupo_embalagem"];
        assert!(result.confidence >= 0.6);
        assert!(result.confidence <= 0.95);
        assert_eq!(result.source, "https://example.com/sds");

        // Written through to the cache.
        let cached = cache.get("grupo_embalagem", &key).await.unwrap().unwrap();
        assert_eq!(cached.value, result.value);
    }

    #[tokio::test]
    async fn empty_results_degrade_to_not_found_without_persisting() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockSearchProvider::new());
        let cache = Arc::new(MemoryFieldCache::new(Duration::from_secs(60)));

        let document_id = registered_doc(&store).await;
        let retriever = FieldRetriever::new(
            store.clone(),
            provider,
            cache,
            quick_config(),
        );
        let results = retriever
            .retrieve_missing_fields(document_id, &["fabricante".to_string()], &acetone_key())
            .await;

        assert_eq!(results["fabricante"].value, NOT_FOUND);
        assert_eq!(results["fabricante"].confidence, 0.0);

        use crate::store::ExtractionStore;
        assert!(store.field_details(document_id).await.unwrap().is_empty());
    }

    #[test]
    fn keyword_window_centers_on_match() {
        let text = format!("{} packing group II {}", "a".repeat(600), "b".repeat(600));
        let window = keyword_window(&text, "packing group", 100).unwrap();
        assert!(window.contains("packing group II"));
        assert!(window.chars().count() <= 213 + 13);
        assert!(keyword_window(&text, "missing", 100).is_none());
    }
}

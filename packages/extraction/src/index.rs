//! Optional semantic retrieval index over document chunks.
//!
//! When present, the processor narrows model prompting to the top-K most
//! similar chunks instead of brute-forcing every chunk, and the enricher
//! uses it for targeted refinement. The shipped implementation keeps
//! embeddings in memory and ranks by cosine similarity; the embedding
//! backend is pluggable through [`Embedder`].

use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::chunk::Chunk;
use crate::error::ModelResult;

/// Embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> ModelResult<Vec<f32>>;

    /// Batch variant; the default just loops.
    async fn embed_batch(&self, texts: &[String]) -> ModelResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// A chunk returned from a similarity search.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub document_id: i64,
    pub label: String,
    pub text: String,
    pub score: f32,
}

/// Semantic search over indexed chunks.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Add a document's chunks. Returns how many were indexed.
    async fn index_chunks(&self, document_id: i64, chunks: &[Chunk]) -> ModelResult<usize>;

    /// Top-k most similar chunks across all indexed documents.
    async fn search(&self, query: &str, k: usize) -> ModelResult<Vec<ScoredChunk>>;
}

struct IndexEntry {
    document_id: i64,
    label: String,
    text: String,
    embedding: Vec<f32>,
}

/// In-memory cosine-similarity index.
pub struct InMemoryIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SemanticIndex for InMemoryIndex {
    async fn index_chunks(&self, document_id: i64, chunks: &[Chunk]) -> ModelResult<usize> {
        let texts: Vec<String> = chunks
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .map(|c| c.text.clone())
            .collect();
        if texts.is_empty() {
            return Ok(0);
        }
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let mut entries = self.entries.write().unwrap();
        // Re-indexing a document replaces its previous chunks.
        entries.retain(|e| e.document_id != document_id);
        for (chunk, embedding) in chunks
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .zip(embeddings)
        {
            entries.push(IndexEntry {
                document_id,
                label: chunk.label.clone(),
                text: chunk.text.clone(),
                embedding,
            });
        }
        let indexed = texts.len();
        tracing::info!(document_id, indexed, "chunks indexed");
        Ok(indexed)
    }

    async fn search(&self, query: &str, k: usize) -> ModelResult<Vec<ScoredChunk>> {
        let query = query.trim();
        if query.chars().count() < 3 {
            tracing::warn!(%query, "query too short for semantic search");
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;

        let entries = self.entries.read().unwrap();
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|entry| ScoredChunk {
                document_id: entry.document_id,
                label: entry.label.clone(),
                text: entry.text.clone(),
                score: cosine_similarity(&query_embedding, &entry.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k.max(1));
        Ok(scored)
    }
}

/// Cosine similarity between two vectors; 0.0 on mismatch or zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashEmbedder;

    #[test]
    fn cosine_similarity_basics() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[tokio::test]
    async fn indexing_and_search_return_ranked_chunks() {
        let index = InMemoryIndex::new(Arc::new(HashEmbedder::new(64)));
        let chunks = vec![
            Chunk::new("Secao 1", "Nome do produto: Acetona"),
            Chunk::new("Secao 14", "Numero ONU 1090 grupo de embalagem II"),
        ];
        assert_eq!(index.index_chunks(7, &chunks).await.unwrap(), 2);

        // Identical text embeds identically, so it must rank first.
        let hits = index
            .search("Numero ONU 1090 grupo de embalagem II", 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "Secao 14");
        assert_eq!(hits[0].document_id, 7);
    }

    #[tokio::test]
    async fn reindexing_replaces_previous_chunks() {
        let index = InMemoryIndex::new(Arc::new(HashEmbedder::new(64)));
        index
            .index_chunks(1, &[Chunk::new("Chunk 1", "old text")])
            .await
            .unwrap();
        index
            .index_chunks(1, &[Chunk::new("Chunk 1", "new text")])
            .await
            .unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn short_queries_are_skipped() {
        let index = InMemoryIndex::new(Arc::new(HashEmbedder::new(64)));
        assert!(index.search("ab", 5).await.unwrap().is_empty());
    }
}

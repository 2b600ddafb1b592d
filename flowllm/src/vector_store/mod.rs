//! Vector-store capability: opaque document search over embeddings.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::EmbeddingModel;
use crate::error::FlowError;

/// One stored document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// A search hit with its similarity score (higher is closer).
#[derive(Clone, Debug, Serialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: Document,
    pub score: f32,
}

/// An opaque vector store. Re-entrant; shared by reference across ops.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert(&self, documents: Vec<Document>) -> Result<(), FlowError>;

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredDocument>, FlowError>;
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// In-memory store with cosine similarity; the reference backend.
pub struct InMemoryVectorStore {
    embedding: Arc<dyn EmbeddingModel>,
    entries: RwLock<Vec<(Document, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new(embedding: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            embedding,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, documents: Vec<Document>) -> Result<(), FlowError> {
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedding.embed(&texts).await?;
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (document, vector) in documents.into_iter().zip(vectors) {
            // Same id overwrites.
            entries.retain(|(existing, _)| existing.id != document.id);
            entries.push((document, vector));
        }
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredDocument>, FlowError> {
        let query_vec = self
            .embedding
            .embed(std::slice::from_ref(&query.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FlowError::op_failed("embedding returned no vector".to_string()))?;
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut scored: Vec<ScoredDocument> = entries
            .iter()
            .map(|(document, vector)| ScoredDocument {
                document: document.clone(),
                score: cosine(&query_vec, vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;

    #[tokio::test]
    async fn exact_match_ranks_first() {
        let store = InMemoryVectorStore::new(Arc::new(MockEmbedding::new(16)));
        store
            .insert(vec![
                Document::new("a", "rust async runtime"),
                Document::new("b", "completely different text"),
            ])
            .await
            .unwrap();
        let hits = store.search("rust async runtime", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn same_id_overwrites() {
        let store = InMemoryVectorStore::new(Arc::new(MockEmbedding::default()));
        store
            .insert(vec![Document::new("a", "first")])
            .await
            .unwrap();
        store
            .insert(vec![Document::new("a", "second")])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        let hits = store.search("second", 1).await.unwrap();
        assert_eq!(hits[0].document.content, "second");
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let store = InMemoryVectorStore::new(Arc::new(MockEmbedding::default()));
        let docs = (0..5)
            .map(|i| Document::new(format!("d{i}"), format!("text {i}")))
            .collect();
        store.insert(docs).await.unwrap();
        let hits = store.search("text", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}

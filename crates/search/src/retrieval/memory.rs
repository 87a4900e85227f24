use super::{cosine_score, ChunkRef, VectorIndex};
use flowllm_common::errors::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct Entry {
    embedding: Vec<f32>,
    chunk: ChunkRef,
}

/// Process-local index with brute-force cosine search
#[derive(Default)]
pub struct InMemoryVectorIndex {
    namespaces: RwLock<HashMap<String, Vec<Entry>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, namespace: &str, embedding: Vec<f32>, chunk: ChunkRef) {
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .push(Entry { embedding, chunk });
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(&self, namespace: &str, embedding: &[f32], top_k: usize) -> Result<Vec<ChunkRef>> {
        let namespaces = self.namespaces.read().await;
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ChunkRef> = entries
            .iter()
            .map(|entry| ChunkRef {
                relevance_score: cosine_score(embedding, &entry.embedding),
                ..entry.chunk.clone()
            })
            .collect();
        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scored.truncate(top_k);
        Ok(scored)
    }
}

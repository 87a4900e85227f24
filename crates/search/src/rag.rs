//! Retrieval-augmented context selection
//!
//! Embed the query, pull candidates from the caller's namespace, drop weak
//! matches, optionally rerank, and report how many documents contributed.

use crate::rerank::Reranker;
use crate::retrieval::{ChunkRef, VectorIndex};
use flowllm_common::config::{RerankConfig, VectorConfig};
use flowllm_common::errors::Result;
use flowllm_common::Embedder;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Candidate selection parameters
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Candidates fetched without reranking
    pub top_k: usize,
    /// Candidates fetched when reranking
    pub top_k_rerank: usize,
    /// Matches must score strictly above this
    pub min_score: f32,
    /// Most chunks kept after reranking
    pub rerank_cap: usize,
    /// Reranking runs only with more candidates than this
    pub rerank_min_candidates: usize,
}

impl RagConfig {
    pub fn from_config(vector: &VectorConfig, rerank: &RerankConfig) -> Self {
        Self {
            top_k: vector.top_k,
            top_k_rerank: vector.top_k_rerank,
            min_score: vector.min_score,
            rerank_cap: rerank.cap,
            rerank_min_candidates: rerank.min_candidates,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self::from_config(&VectorConfig::default(), &RerankConfig::default())
    }
}

/// Chunks selected for a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RagOutcome {
    pub chunks: Vec<ChunkRef>,
    /// Distinct source documents among `chunks`
    pub distinct_documents: usize,
}

impl RagOutcome {
    /// Image keys attached to the selected chunks, in chunk order
    pub fn images(&self) -> Vec<&str> {
        self.chunks
            .iter()
            .filter_map(|c| c.image_ref.as_deref())
            .filter(|key| !key.is_empty())
            .collect()
    }
}

/// Chunk retriever for one deployment
pub struct RagRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    reranker: Option<Arc<dyn Reranker>>,
    config: RagConfig,
}

impl RagRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        reranker: Option<Arc<dyn Reranker>>,
        config: RagConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            reranker,
            config,
        }
    }

    /// Number of chunks kept after reranking `candidates`
    fn rerank_keep(&self, candidates: usize) -> usize {
        (candidates / 2).max(1).min(self.config.rerank_cap)
    }

    /// Select chunks for `query` from the caller's `namespace`
    pub async fn retrieve(&self, query: &str, namespace: &str, rerank: bool) -> Result<RagOutcome> {
        let embedding = self.embedder.embed(query).await?;
        let top_k = if rerank {
            self.config.top_k_rerank
        } else {
            self.config.top_k
        };

        let mut candidates = self.index.query(namespace, &embedding, top_k).await?;
        candidates.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        candidates.retain(|c| c.relevance_score > self.config.min_score);

        debug!(
            namespace,
            top_k,
            surviving = candidates.len(),
            "Vector candidates filtered"
        );

        let chunks = if rerank && candidates.len() > self.config.rerank_min_candidates {
            self.rerank(query, candidates).await
        } else {
            candidates
        };

        let distinct_documents = chunks
            .iter()
            .map(|c| c.document_name.as_str())
            .collect::<HashSet<_>>()
            .len();

        Ok(RagOutcome {
            chunks,
            distinct_documents,
        })
    }

    async fn rerank(&self, query: &str, mut candidates: Vec<ChunkRef>) -> Vec<ChunkRef> {
        let keep = self.rerank_keep(candidates.len());

        let Some(reranker) = &self.reranker else {
            debug!("No reranker configured, keeping score order");
            candidates.truncate(self.config.rerank_cap);
            return candidates;
        };

        let documents: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let hits = match reranker.rerank(query, &documents, keep).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Rerank failed, keeping score order");
                candidates.truncate(self.config.rerank_cap);
                return candidates;
            }
        };

        let mut used = HashSet::new();
        let reranked: Vec<ChunkRef> = hits
            .into_iter()
            .filter(|hit| hit.index < candidates.len() && used.insert(hit.index))
            .take(keep)
            .map(|hit| candidates[hit.index].clone())
            .collect();

        if reranked.is_empty() {
            warn!("Reranker returned no usable results, keeping score order");
            candidates.truncate(self.config.rerank_cap);
            return candidates;
        }

        reranked
    }
}

//! Namespaced vector retrieval
//!
//! Every caller owns one namespace. Queries never cross namespaces.

mod memory;
mod vector;

pub use memory::InMemoryVectorIndex;
pub use vector::PgVectorIndex;

use flowllm_common::errors::Result;
use serde::{Deserialize, Serialize};

/// A retrieved document chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRef {
    pub text: String,
    pub document_name: String,
    /// Object storage key of an image extracted with this chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// Similarity to the query, in [0, 1]
    pub relevance_score: f32,
}

/// Vector index queried by caller namespace
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top `top_k` matches in `namespace`, best first
    async fn query(&self, namespace: &str, embedding: &[f32], top_k: usize) -> Result<Vec<ChunkRef>>;
}

/// Cosine similarity mapped to [0, 1]
pub(crate) fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

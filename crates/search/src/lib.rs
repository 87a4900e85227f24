//! FlowLLM retrieval
//!
//! Provides:
//! - Namespaced vector index (pgvector, in-memory)
//! - Reranking client
//! - RAG candidate selection (threshold, rerank, distinct documents)

pub mod rag;
pub mod rerank;
pub mod retrieval;

pub use rag::{RagConfig, RagOutcome, RagRetriever};
pub use rerank::{CohereReranker, RerankHit, Reranker};
pub use retrieval::{ChunkRef, InMemoryVectorIndex, PgVectorIndex, VectorIndex};

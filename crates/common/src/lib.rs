//! FlowLLM Common Library
//!
//! Shared code for the FlowLLM services including:
//! - Chat data model (messages, parts, annotations, capabilities)
//! - Generative model client (OpenAI-compatible, streaming)
//! - Embedding client abstraction
//! - Conversation store and database access
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod cache;
pub mod chat;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::ConversationStore;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::ChatModel;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

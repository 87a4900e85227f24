//! FlowLLM turn pipeline
//!
//! Provides:
//! - Enrichment stages (query rewrite, reasoning, memory, RAG, web search)
//! - Prompt assembly
//! - Streaming generation with the memory write-back tool
//! - Outbound frame model and per-turn emitter
//! - Turn persistence

pub mod assembly;
pub mod events;
pub mod memory;
pub mod orchestrator;
pub mod persister;
pub mod prompts;
pub mod stages;
pub mod web;

pub use events::{OutboundEvent, TurnEmitter, TurnRecord};
pub use memory::{InMemoryMemoryStore, MemoryStore, ZepMemoryStore};
pub use orchestrator::{CompletedTurn, FinishState, Pipeline, PipelineSettings, Turn};
pub use persister::Persister;
pub use stages::{Stage, StageResult, StageServices};
pub use web::{WebFindings, WebSearchClient};

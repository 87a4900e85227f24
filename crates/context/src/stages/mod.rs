//! Enrichment stages
//!
//! Each stage wraps one backing service behind the same
//! `run(ctx) -> StageResult` contract. The orchestrator runs the enabled
//! stages one after another in `Stage::ORDER`.

mod memory;
mod rag;
mod reasoning;
mod rewrite;
mod web;

use crate::events::TurnEmitter;
use crate::memory::MemoryStore;
use crate::web::{WebFindings, WebSearchClient};
use flowllm_common::chat::{Annotation, AnnotationKind, Capabilities, StoredMessage};
use flowllm_common::config::AppConfig;
use flowllm_common::errors::Result;
use flowllm_common::llm::ChatModel;
use flowllm_common::storage::ObjectStorage;
use flowllm_search::{RagOutcome, RagRetriever};
use std::sync::Arc;
use std::time::Duration;

/// Backing services shared by all turns
pub struct StageServices {
    pub model: Arc<dyn ChatModel>,
    pub rewrite_model: String,
    pub reasoning_model: String,
    pub memory_query_model: String,
    pub memory: Arc<dyn MemoryStore>,
    pub memory_query_chars: usize,
    pub memory_search_limit: usize,
    pub rag: Arc<RagRetriever>,
    pub web: WebSearchClient,
    pub storage: Arc<dyn ObjectStorage>,
}

impl StageServices {
    pub fn new(
        config: &AppConfig,
        model: Arc<dyn ChatModel>,
        memory: Arc<dyn MemoryStore>,
        rag: Arc<RagRetriever>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        let web = WebSearchClient::new(
            model.clone(),
            config.model.web_query_model.clone(),
            config.model.web_search_model.clone(),
        );
        Self {
            model,
            rewrite_model: config.model.rewrite_model.clone(),
            reasoning_model: config.model.reasoning_model.clone(),
            memory_query_model: config.model.memory_query_model.clone(),
            memory,
            memory_query_chars: config.memory.max_query_chars,
            memory_search_limit: config.memory.search_limit,
            rag,
            web,
            storage,
        }
    }
}

/// Inputs a stage may read, plus the emitter for live side effects
pub struct StageContext<'a> {
    pub caller_id: &'a str,
    pub history: &'a [StoredMessage],
    pub effective_query: &'a str,
    pub rag_rerank: bool,
    pub services: &'a StageServices,
    pub emitter: &'a mut TurnEmitter,
}

/// One enrichment step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    QueryRewrite,
    Reasoning,
    Memory,
    Rag,
    WebSearch,
}

impl Stage {
    /// Fixed execution and annotation order
    pub const ORDER: [Stage; 5] = [
        Stage::QueryRewrite,
        Stage::Reasoning,
        Stage::Memory,
        Stage::Rag,
        Stage::WebSearch,
    ];

    /// Stages switched on by `capabilities`, in execution order
    pub fn enabled(capabilities: &Capabilities) -> Vec<Stage> {
        Self::ORDER
            .into_iter()
            .filter(|stage| match stage {
                Stage::QueryRewrite => capabilities.query_rewrite,
                Stage::Reasoning => capabilities.reasoning,
                Stage::Memory => capabilities.memory,
                Stage::Rag => capabilities.rag_retrieval,
                Stage::WebSearch => capabilities.web_search,
            })
            .collect()
    }

    /// Metric and log name
    pub fn name(&self) -> &'static str {
        match self {
            Stage::QueryRewrite => "query-rewrite",
            Stage::Reasoning => "reasoning",
            Stage::Memory => "memory",
            Stage::Rag => "rag",
            Stage::WebSearch => "web-search",
        }
    }

    /// Progress message announced before the stage starts
    pub fn progress(&self) -> &'static str {
        match self {
            Stage::QueryRewrite => "Rewriting query...",
            Stage::Reasoning => "Thinking...",
            Stage::Memory => "Retrieving user memories...",
            Stage::Rag => "Retrieving relevant chunks...",
            Stage::WebSearch => "Searching the web...",
        }
    }

    /// Message announced when the stage fails. Query rewrite fails silently.
    pub fn skipped(&self) -> Option<&'static str> {
        match self {
            Stage::QueryRewrite => None,
            Stage::Reasoning => Some("Reasoning skipped"),
            Stage::Memory => Some("Memory retrieval skipped"),
            Stage::Rag => Some("Document retrieval skipped"),
            Stage::WebSearch => Some("Web search skipped"),
        }
    }

    pub async fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageResult> {
        match self {
            Stage::QueryRewrite => rewrite::run(ctx).await,
            Stage::Reasoning => reasoning::run(ctx).await,
            Stage::Memory => memory::run(ctx).await,
            Stage::Rag => rag::run(ctx).await,
            Stage::WebSearch => web::run(ctx).await,
        }
    }
}

/// Output of one stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    RewrittenQuery(String),
    ReasoningTrace { trace: String, elapsed: Duration },
    MemoryFacts(String),
    RetrievedChunks(RagOutcome),
    WebFindings(WebFindings),
}

impl StageResult {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::RewrittenQuery(q) => q.trim().is_empty(),
            Self::ReasoningTrace { trace, .. } => trace.trim().is_empty(),
            Self::MemoryFacts(facts) => facts.trim().is_empty(),
            Self::RetrievedChunks(outcome) => outcome.chunks.is_empty(),
            Self::WebFindings(findings) => findings.text.trim().is_empty(),
        }
    }

    /// Annotations announcing this result. Only non-empty results get a
    /// result annotation; info annotations may accompany either.
    pub fn annotations(&self) -> Vec<Annotation> {
        let mut out = Vec::new();
        match self {
            Self::RewrittenQuery(query) => {
                if !self.is_empty() {
                    out.push(Annotation::new(AnnotationKind::QueryRewrite, query.as_str()));
                }
            }
            Self::ReasoningTrace { trace, elapsed } => {
                out.push(Annotation::info(format!(
                    "Thought for: {:.2} seconds",
                    elapsed.as_secs_f64()
                )));
                if !self.is_empty() {
                    out.push(Annotation::new(AnnotationKind::Reasoning, trace.as_str()));
                }
            }
            Self::MemoryFacts(facts) => {
                if !self.is_empty() {
                    out.push(Annotation::new(AnnotationKind::Memory, facts.as_str()));
                }
            }
            Self::RetrievedChunks(outcome) => {
                if outcome.distinct_documents > 0 {
                    out.push(Annotation::info(format!(
                        "Found relevant chunks from {} files",
                        outcome.distinct_documents
                    )));
                }
                if !self.is_empty() {
                    out.push(Annotation::new(
                        AnnotationKind::RagContext,
                        joined_chunks(outcome),
                    ));
                }
            }
            Self::WebFindings(findings) => {
                if !self.is_empty() {
                    out.push(Annotation::new(AnnotationKind::WebSearch, findings.text.as_str()));
                }
            }
        }
        out
    }
}

pub(crate) fn joined_chunks(outcome: &RagOutcome) -> String {
    outcome
        .chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Per-turn accumulator, at most one result per stage
#[derive(Debug, Default)]
pub struct StageResults {
    pub rewritten_query: Option<String>,
    pub reasoning_trace: Option<String>,
    pub memory_facts: Option<String>,
    pub chunks: Option<RagOutcome>,
    pub web_findings: Option<WebFindings>,
}

impl StageResults {
    /// Keep a non-empty result
    pub fn record(&mut self, result: StageResult) {
        if result.is_empty() {
            return;
        }
        match result {
            StageResult::RewrittenQuery(q) => self.rewritten_query = Some(q.trim().to_string()),
            StageResult::ReasoningTrace { trace, .. } => self.reasoning_trace = Some(trace),
            StageResult::MemoryFacts(facts) => self.memory_facts = Some(facts),
            StageResult::RetrievedChunks(outcome) => self.chunks = Some(outcome),
            StageResult::WebFindings(findings) => self.web_findings = Some(findings),
        }
    }

    /// Query used by retrieval-style stages
    pub fn effective_query<'a>(&'a self, raw: &'a str) -> &'a str {
        self.rewritten_query.as_deref().unwrap_or(raw)
    }

    pub fn is_empty(&self) -> bool {
        self.rewritten_query.is_none()
            && self.reasoning_trace.is_none()
            && self.memory_facts.is_none()
            && self.chunks.is_none()
            && self.web_findings.is_none()
    }
}

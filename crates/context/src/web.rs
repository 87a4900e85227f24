//! Web search through a search-capable model

use crate::prompts;
use flowllm_common::chat::SourceRef;
use flowllm_common::errors::Result;
use flowllm_common::llm::{ChatMessage, ChatModel, CompletionRequest, DeltaStream};
use std::sync::Arc;

/// Findings of one web search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebFindings {
    pub text: String,
    /// Cited pages in the order the model reported them
    pub sources: Vec<SourceRef>,
}

/// Two-call web search: derive a search query, then run it on an online model
#[derive(Clone)]
pub struct WebSearchClient {
    model: Arc<dyn ChatModel>,
    query_model: String,
    search_model: String,
}

impl WebSearchClient {
    pub fn new(model: Arc<dyn ChatModel>, query_model: String, search_model: String) -> Self {
        Self {
            model,
            query_model,
            search_model,
        }
    }

    /// Search-engine style query for `input`. Falls back to `input` when the model returns nothing.
    pub async fn derive_query(&self, input: &str) -> Result<String> {
        let request = CompletionRequest::new(&self.query_model, vec![ChatMessage::user(input)])
            .with_system(prompts::WEB_SEARCH_QUERY);
        let completion = self.model.complete(&request).await?;

        let query = completion.text.trim().trim_matches('"').trim();
        Ok(if query.is_empty() {
            input.to_string()
        } else {
            query.to_string()
        })
    }

    /// Start the search. Citations arrive as `Source` deltas while the text streams.
    pub async fn search(&self, query: &str) -> Result<DeltaStream> {
        let request = CompletionRequest::new(&self.search_model, vec![ChatMessage::user(query)])
            .with_system(prompts::WEB_SEARCH);
        self.model.stream(&request).await
    }
}

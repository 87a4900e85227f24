use super::{StageContext, StageResult};
use crate::prompts;
use flowllm_common::errors::Result;
use flowllm_common::llm::{ChatMessage, CompletionRequest};
use tracing::warn;

/// First `max_chars` characters of `text`
pub(crate) fn clip_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

pub(super) async fn run(ctx: &mut StageContext<'_>) -> Result<StageResult> {
    let services = ctx.services;
    let limit = services.memory_query_chars;
    let query = ctx.effective_query.trim();

    let query = if query.chars().count() > limit {
        let request = CompletionRequest::new(&services.memory_query_model, vec![ChatMessage::user(query)])
            .with_system(prompts::MEMORY_QUERY);
        match services.model.complete(&request).await {
            Ok(completion) if !completion.text.trim().is_empty() => {
                clip_chars(completion.text.trim(), limit).to_string()
            }
            Ok(_) => clip_chars(query, limit).to_string(),
            Err(e) => {
                warn!(error = %e, "Memory query summarization failed, clipping input");
                clip_chars(query, limit).to_string()
            }
        }
    } else {
        query.to_string()
    };

    let facts = services
        .memory
        .search(ctx.caller_id, &query, services.memory_search_limit)
        .await?;
    Ok(StageResult::MemoryFacts(facts.join("\n\n")))
}

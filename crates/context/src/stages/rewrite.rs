use super::{StageContext, StageResult};
use crate::assembly::history_messages;
use crate::prompts;
use flowllm_common::errors::Result;
use flowllm_common::llm::CompletionRequest;

/// Standalone query from the whole conversation
pub(super) async fn run(ctx: &mut StageContext<'_>) -> Result<StageResult> {
    let services = ctx.services;
    let request = CompletionRequest::new(&services.rewrite_model, history_messages(ctx.history))
        .with_system(prompts::QUERY_REWRITE);

    let completion = services.model.complete(&request).await?;
    Ok(StageResult::RewrittenQuery(completion.text.trim().to_string()))
}

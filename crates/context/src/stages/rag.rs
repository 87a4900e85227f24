use super::{StageContext, StageResult};
use flowllm_common::errors::Result;

/// Chunks from the caller's own namespace
pub(super) async fn run(ctx: &mut StageContext<'_>) -> Result<StageResult> {
    let outcome = ctx
        .services
        .rag
        .retrieve(ctx.effective_query, ctx.caller_id, ctx.rag_rerank)
        .await?;
    Ok(StageResult::RetrievedChunks(outcome))
}

use super::{StageContext, StageResult};
use crate::web::WebFindings;
use flowllm_common::chat::SourceRef;
use flowllm_common::errors::Result;
use flowllm_common::llm::StreamDelta;
use futures::StreamExt;

/// Derive a query, run it, and forward citations as they arrive
pub(super) async fn run(ctx: &mut StageContext<'_>) -> Result<StageResult> {
    let web = &ctx.services.web;
    let query = web.derive_query(ctx.effective_query).await?;
    let mut stream = web.search(&query).await?;

    let mut findings = WebFindings::default();
    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::Text(text) => findings.text.push_str(&text),
            StreamDelta::Source(url) => {
                let source = SourceRef::new(url);
                ctx.emitter.source(source.clone()).await;
                findings.sources.push(source);
            }
            StreamDelta::Finish(_) => break,
            StreamDelta::Reasoning(_) | StreamDelta::ToolCall(_) => {}
        }
    }
    Ok(StageResult::WebFindings(findings))
}

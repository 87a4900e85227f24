use super::{StageContext, StageResult};
use crate::assembly::history_messages;
use crate::prompts;
use flowllm_common::chat::Role;
use flowllm_common::errors::Result;
use flowllm_common::llm::{ChatMessage, CompletionRequest};
use regex_lite::Regex;
use std::sync::OnceLock;
use std::time::Instant;

fn think_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").ok())
        .as_ref()
}

/// Bodies of the `<think>` blocks, or the raw text when the model ignored the tags
pub(crate) fn extract_trace(raw: &str) -> String {
    let steps: Vec<&str> = match think_pattern() {
        Some(pattern) => pattern
            .captures_iter(raw)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|step| !step.is_empty())
            .collect(),
        None => Vec::new(),
    };

    if steps.is_empty() {
        raw.trim().to_string()
    } else {
        steps.join("\n\n")
    }
}

pub(super) async fn run(ctx: &mut StageContext<'_>) -> Result<StageResult> {
    let services = ctx.services;
    let mut messages = history_messages(ctx.history);
    if ctx.effective_query != last_user_text(&messages) {
        messages.push(ChatMessage::user(ctx.effective_query));
    }
    let request = CompletionRequest::new(&services.reasoning_model, messages)
        .with_system(prompts::CHAIN_OF_THOUGHT);

    let started = Instant::now();
    let completion = services.model.complete(&request).await?;
    let elapsed = started.elapsed();

    Ok(StageResult::ReasoningTrace {
        trace: extract_trace(&completion.text),
        elapsed,
    })
}

fn last_user_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(ChatMessage::text_content)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_trace_joins_think_blocks() {
        let raw = "<think>Step one.</think>\n<think>\nStep two.\n</think> trailing";
        assert_eq!(extract_trace(raw), "Step one.\n\nStep two.");
    }

    #[test]
    fn test_extract_trace_falls_back_to_raw() {
        assert_eq!(extract_trace("  no tags here "), "no tags here");
        assert_eq!(extract_trace(""), "");
    }
}

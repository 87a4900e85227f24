//! Final prompt assembly
//!
//! Stage results are appended to the latest user message as labelled
//! sections. Retrieved page images ride along as image parts.

use crate::stages::{joined_chunks, StageResults};
use flowllm_common::chat::{Role, StoredMessage};
use flowllm_common::llm::{ChatMessage, ContentPart, ImageUrl, MessageContent};
use flowllm_common::storage::ObjectStorage;

/// Conversation as model messages. Caller-sent system and tool messages
/// and messages without text are dropped.
pub fn history_messages(history: &[StoredMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter_map(|m| {
            let text = m.text();
            (!text.trim().is_empty()).then(|| ChatMessage::text(m.role, text))
        })
        .collect()
}

/// Labelled context sections, `None` when no stage produced anything
pub fn context_block(results: &StageResults) -> Option<String> {
    let mut sections = Vec::new();
    if let Some(query) = &results.rewritten_query {
        sections.push(format!("Rewritten Query: {}", query));
    }
    if let Some(trace) = &results.reasoning_trace {
        sections.push(format!("Thought Process: {}", trace));
    }
    if let Some(facts) = &results.memory_facts {
        sections.push(format!("User Memories: {}", facts));
    }
    if let Some(outcome) = &results.chunks {
        sections.push(format!("Relevant Chunks: {}", joined_chunks(outcome)));
    }
    if let Some(findings) = &results.web_findings {
        sections.push(format!("Web Search Result: {}", findings.text));
    }

    (!sections.is_empty()).then(|| sections.join("\n\n"))
}

/// Messages for the generation call
pub fn assemble(
    history: &[StoredMessage],
    results: &StageResults,
    storage: &dyn ObjectStorage,
) -> Vec<ChatMessage> {
    let mut messages = history_messages(history);
    let Some(block) = context_block(results) else {
        return messages;
    };
    let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User) else {
        return messages;
    };

    let text = format!("{}\n\n{}", last_user.text_content(), block);
    let images: Vec<ContentPart> = results
        .chunks
        .as_ref()
        .map(|outcome| outcome.images())
        .unwrap_or_default()
        .into_iter()
        .map(|key| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: storage.resolve_url(key),
            },
        })
        .collect();

    last_user.content = Some(if images.is_empty() {
        MessageContent::Text(text)
    } else {
        let mut parts = vec![ContentPart::Text { text }];
        parts.extend(images);
        MessageContent::Parts(parts)
    });
    messages
}

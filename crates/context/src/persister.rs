//! Turn persistence
//!
//! A turn is stored as the user message followed by the assistant message,
//! appended to whatever the conversation already holds. Replaying a turn
//! (same user message id) replaces the earlier attempt instead of
//! duplicating it.

use flowllm_common::chat::StoredMessage;
use flowllm_common::db::ConversationStore;
use flowllm_common::errors::{AppError, Result};
use flowllm_common::metrics;
use std::sync::Arc;
use tracing::{error, info, instrument};

const TITLE_MAX_CHARS: usize = 60;
const DEFAULT_TITLE: &str = "New Chat";

/// Conversation name derived from the first user message
pub fn derive_title(first_message: &str) -> String {
    let line = first_message
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }

    let clipped: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    let cut = match clipped.rfind(' ') {
        Some(idx) if idx > 0 => &clipped[..idx],
        _ => clipped.as_str(),
    };
    format!("{}…", cut.trim_end())
}

#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn ConversationStore>,
}

impl Persister {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Append one finished turn to the conversation
    #[instrument(skip(self, user, assistant), fields(user_message_id = %user.id))]
    pub async fn persist(
        &self,
        conversation_id: &str,
        caller_id: &str,
        user: &StoredMessage,
        assistant: &StoredMessage,
    ) -> Result<()> {
        let result = self
            .try_persist(conversation_id, caller_id, user, assistant)
            .await;
        metrics::record_persistence(result.is_ok());

        match result {
            Ok(()) => {
                info!("Turn persisted");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to persist turn");
                Err(match e {
                    AppError::ConversationNotFound { .. } => e,
                    other => AppError::PersistenceFailed {
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    async fn try_persist(
        &self,
        conversation_id: &str,
        caller_id: &str,
        user: &StoredMessage,
        assistant: &StoredMessage,
    ) -> Result<()> {
        let existing = self.store.get_by_id(conversation_id, caller_id).await?;

        let (mut messages, title) = match existing {
            Some(conversation) => (conversation.messages, conversation.name),
            None => (Vec::new(), derive_title(&user.text())),
        };
        if let Some(pos) = messages.iter().position(|m| m.id == user.id) {
            messages.truncate(pos);
        }
        messages.push(user.clone());
        messages.push(assistant.clone());

        self.store
            .merge_turn(conversation_id, caller_id, &messages, &title)
            .await
    }
}

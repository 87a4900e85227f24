use super::{Conversation, ConversationPage, ConversationStore, ConversationSummary};
use crate::chat::StoredMessage;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local conversation store
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_by_id(&self, id: &str, caller_id: &str) -> Result<Option<Conversation>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(id)
            .filter(|c| c.caller_id == caller_id)
            .cloned())
    }

    async fn merge_turn(
        &self,
        id: &str,
        caller_id: &str,
        messages: &[StoredMessage],
        title: &str,
    ) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let now = Utc::now();

        match conversations.get_mut(id) {
            Some(existing) if existing.caller_id != caller_id => {
                Err(AppError::ConversationNotFound { id: id.to_string() })
            }
            Some(existing) => {
                existing.messages = messages.to_vec();
                existing.updated_at = now;
                Ok(())
            }
            None => {
                conversations.insert(
                    id.to_string(),
                    Conversation {
                        id: id.to_string(),
                        caller_id: caller_id.to_string(),
                        name: title.to_string(),
                        messages: messages.to_vec(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(())
            }
        }
    }

    async fn rename(&self, id: &str, caller_id: &str, name: &str) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(id) {
            Some(c) if c.caller_id == caller_id => {
                c.name = name.to_string();
                c.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(AppError::ConversationNotFound { id: id.to_string() }),
        }
    }

    async fn list(&self, caller_id: &str, offset: u64, limit: u64) -> Result<ConversationPage> {
        let conversations = self.conversations.read().await;
        let mut owned: Vec<&Conversation> = conversations
            .values()
            .filter(|c| c.caller_id == caller_id)
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let total = owned.len() as u64;
        let items = owned
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(ConversationSummary::from)
            .collect();

        Ok(ConversationPage {
            items,
            next_cursor: next_cursor(offset, limit, total),
        })
    }

    async fn delete(&self, id: &str, caller_id: &str) -> Result<bool> {
        let mut conversations = self.conversations.write().await;
        let owned = conversations
            .get(id)
            .is_some_and(|c| c.caller_id == caller_id);
        if owned {
            conversations.remove(id);
        }
        Ok(owned)
    }
}

fn next_cursor(offset: u64, limit: u64, total: u64) -> Option<u64> {
    let end = offset.saturating_add(limit);
    (end < total).then_some(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_merge_creates_then_replaces() {
        let store = InMemoryConversationStore::new();
        let first = vec![StoredMessage::user("Hi")];
        store.merge_turn("c1", "u1", &first, "Hi").await.unwrap();

        let mut second = first.clone();
        second.push(StoredMessage::user("Again"));
        store.merge_turn("c1", "u1", &second, "ignored").await.unwrap();

        let conversation = store.get_by_id("c1", "u1").await.unwrap().unwrap();
        assert_eq!(conversation.name, "Hi");
        assert_eq!(conversation.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let store = InMemoryConversationStore::new();
        let messages = vec![StoredMessage::user("Hi")];
        assert_ok!(store.merge_turn("c1", "u1", &messages, "Hi").await);
        assert_ok!(store.merge_turn("c1", "u1", &messages, "Hi").await);

        let conversation = store.get_by_id("c1", "u1").await.unwrap().unwrap();
        assert_eq!(conversation.messages, messages);
    }

    #[tokio::test]
    async fn test_other_caller_sees_nothing() {
        let store = InMemoryConversationStore::new();
        store
            .merge_turn("c1", "u1", &[StoredMessage::user("secret")], "t")
            .await
            .unwrap();

        assert!(store.get_by_id("c1", "u2").await.unwrap().is_none());
        assert_err!(store.rename("c1", "u2", "mine").await);
        assert!(!store.delete("c1", "u2").await.unwrap());
        assert!(store
            .merge_turn("c1", "u2", &[StoredMessage::user("x")], "t")
            .await
            .is_err());
        assert!(store.list("u2", 0, 10).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let store = InMemoryConversationStore::new();
        for i in 0..3 {
            store
                .merge_turn(&format!("c{}", i), "u1", &[StoredMessage::user("x")], "t")
                .await
                .unwrap();
        }

        let page = store.list("u1", 0, 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor, Some(2));

        let page = store.list("u1", 2, 2).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_list_past_the_end() {
        let store = InMemoryConversationStore::new();
        assert_ok!(
            store
                .merge_turn("c1", "u1", &[StoredMessage::user("x")], "t")
                .await
        );

        let page = assert_ok!(store.list("u1", u64::MAX, 20).await);
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor, None);
    }
}

//! SeaORM-backed conversation repository

use super::models::{ConversationActiveModel, ConversationColumn, ConversationEntity, ConversationRow};
use super::{Conversation, ConversationPage, ConversationStore, ConversationSummary, DbPool};
use crate::chat::StoredMessage;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::debug;

/// Repository for conversation data access
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

fn into_conversation(row: ConversationRow) -> Result<Conversation> {
    let messages: Vec<StoredMessage> = serde_json::from_value(row.messages)?;
    Ok(Conversation {
        id: row.id,
        caller_id: row.caller_id,
        name: row.name,
        messages,
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
    })
}

fn into_summary(row: ConversationRow) -> ConversationSummary {
    ConversationSummary {
        id: row.id,
        name: row.name,
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
    }
}

#[async_trait]
impl ConversationStore for Repository {
    async fn get_by_id(&self, id: &str, caller_id: &str) -> Result<Option<Conversation>> {
        ConversationEntity::find_by_id(id.to_string())
            .filter(ConversationColumn::CallerId.eq(caller_id))
            .one(self.read_conn())
            .await?
            .map(into_conversation)
            .transpose()
    }

    async fn merge_turn(
        &self,
        id: &str,
        caller_id: &str,
        messages: &[StoredMessage],
        title: &str,
    ) -> Result<()> {
        let payload = serde_json::to_value(messages)?;
        let now = Utc::now();
        let txn = self.write_conn().begin().await?;

        let existing = ConversationEntity::find_by_id(id.to_string())
            .lock_exclusive()
            .one(&txn)
            .await?;

        match existing {
            Some(row) if row.caller_id != caller_id => {
                txn.rollback().await?;
                return Err(AppError::ConversationNotFound { id: id.to_string() });
            }
            Some(row) => {
                let mut active: ConversationActiveModel = row.into();
                active.messages = Set(payload);
                active.updated_at = Set(now.into());
                active.update(&txn).await?;
                debug!(conversation_id = %id, count = messages.len(), "Conversation updated");
            }
            None => {
                ConversationActiveModel {
                    id: Set(id.to_string()),
                    caller_id: Set(caller_id.to_string()),
                    name: Set(title.to_string()),
                    messages: Set(payload),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                }
                .insert(&txn)
                .await?;
                debug!(conversation_id = %id, "Conversation created");
            }
        }

        txn.commit().await?;
        Ok(())
    }

    async fn rename(&self, id: &str, caller_id: &str, name: &str) -> Result<()> {
        let result = ConversationEntity::update_many()
            .col_expr(ConversationColumn::Name, Expr::value(name))
            .col_expr(ConversationColumn::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(ConversationColumn::Id.eq(id))
            .filter(ConversationColumn::CallerId.eq(caller_id))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::ConversationNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn list(&self, caller_id: &str, offset: u64, limit: u64) -> Result<ConversationPage> {
        let rows = ConversationEntity::find()
            .filter(ConversationColumn::CallerId.eq(caller_id))
            .order_by_desc(ConversationColumn::UpdatedAt)
            .offset(offset)
            .limit(limit.saturating_add(1))
            .all(self.read_conn())
            .await?;

        let has_more = rows.len() as u64 > limit;
        let items = rows
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(into_summary)
            .collect();

        Ok(ConversationPage {
            items,
            next_cursor: has_more.then_some(offset.saturating_add(limit)),
        })
    }

    async fn delete(&self, id: &str, caller_id: &str) -> Result<bool> {
        let result = ConversationEntity::delete_many()
            .filter(ConversationColumn::Id.eq(id))
            .filter(ConversationColumn::CallerId.eq(caller_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

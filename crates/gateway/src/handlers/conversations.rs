//! Conversation read and maintenance handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use flowllm_common::{
    auth::AuthContext,
    db::{Conversation, ConversationPage},
    errors::{AppError, Result},
};
use serde::Deserialize;
use validator::Validate;

use super::invalid;
use crate::state::AppState;

/// Largest offset the database accepts
const MAX_OFFSET: u64 = i64::MAX as u64;

/// Pagination parameters
#[derive(Debug, Deserialize, Validate)]
pub struct ListParams {
    #[serde(default)]
    #[validate(range(max = MAX_OFFSET))]
    pub offset: u64,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u64,
}

fn default_limit() -> u64 {
    20
}

/// Rename request
#[derive(Debug, Deserialize, Validate)]
pub struct RenameRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

/// List the caller's conversations, newest first
pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
) -> Result<Json<ConversationPage>> {
    params.validate().map_err(invalid)?;

    let page = state
        .conversations
        .list(&auth.caller_id, params.offset, params.limit)
        .await?;
    Ok(Json(page))
}

/// Get one conversation with its messages
pub async fn get_conversation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<Conversation>> {
    let conversation = state
        .conversations
        .get_by_id(&id, &auth.caller_id)
        .await?
        .ok_or(AppError::ConversationNotFound { id })?;
    Ok(Json(conversation))
}

/// Rename a conversation
pub async fn rename_conversation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<StatusCode> {
    request.validate().map_err(invalid)?;

    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation {
            message: "name must not be blank".to_string(),
            field: Some("name".to_string()),
        });
    }

    state.conversations.rename(&id, &auth.caller_id, name).await?;
    tracing::info!(conversation_id = %id, "Conversation renamed");
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a conversation
pub async fn delete_conversation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if !state.conversations.delete(&id, &auth.caller_id).await? {
        return Err(AppError::ConversationNotFound { id });
    }
    tracing::info!(conversation_id = %id, "Conversation deleted");
    Ok(StatusCode::NO_CONTENT)
}

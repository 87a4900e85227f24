//! Manual memory handler

use axum::{extract::State, http::StatusCode, Json};
use flowllm_common::{auth::AuthContext, errors::Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::invalid;
use crate::state::AppState;

/// Add memory request
#[derive(Debug, Deserialize, Validate)]
pub struct AddMemoryRequest {
    #[validate(length(min = 1, max = 4000))]
    pub memory: String,
}

#[derive(Debug, Serialize)]
pub struct AddMemoryResponse {
    pub status: &'static str,
}

/// Append a user-supplied fact to the caller's memory graph
pub async fn add_memory(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<AddMemoryRequest>,
) -> Result<(StatusCode, Json<AddMemoryResponse>)> {
    request.validate().map_err(invalid)?;

    let fact = format!("User has a new memory: {}", request.memory.trim());
    state.memory.add_fact(&auth.caller_id, &fact).await?;

    Ok((StatusCode::CREATED, Json(AddMemoryResponse { status: "added" })))
}

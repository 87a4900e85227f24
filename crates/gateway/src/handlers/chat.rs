//! Chat turn handler
//!
//! Validates and authenticates before anything streams. The turn itself
//! runs on its own task; the response is a Server-Sent Events stream
//! fed from that task's outbound channel.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use flowllm_common::{
    auth::AuthContext,
    chat::{Capabilities, StoredMessage},
    errors::{Result, GENERIC_ERROR_MESSAGE},
};
use flowllm_context::{OutboundEvent, Turn};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use validator::Validate;

use super::invalid;
use crate::state::AppState;

/// Chat request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 128))]
    pub conversation_id: String,

    #[validate(length(min = 1))]
    pub messages: Vec<StoredMessage>,

    #[validate(length(min = 1, max = 200))]
    pub model: String,

    #[serde(default)]
    pub capabilities: Capabilities,
}

fn to_sse(event: OutboundEvent) -> Event {
    Event::default()
        .event(event.kind())
        .json_data(&event)
        .unwrap_or_else(|_| Event::default().event("error").data(GENERIC_ERROR_MESSAGE))
}

/// Run one chat turn and stream its frames
pub async fn chat(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    request.validate().map_err(invalid)?;

    let turn = Turn::new(
        request.conversation_id,
        auth.caller_id,
        request.messages,
        request.capabilities,
        request.model,
    );
    turn.validate()?;

    info!(
        turn_id = %turn.turn_id,
        conversation_id = %turn.conversation_id,
        request_id = %auth.request_id,
        "Chat turn accepted"
    );

    let (tx, rx) = mpsc::channel(state.config.pipeline.channel_capacity.max(1));
    let cancel = CancellationToken::new();

    let pipeline = state.pipeline.clone();
    let task_cancel = cancel.clone();
    state.turns.spawn(async move {
        if let Err(e) = pipeline.run(turn, tx, task_cancel).await {
            warn!(error = %e, "Turn ended without a stored answer");
        }
    });

    // Dropping the response body (client gone) stops generation
    let guard = cancel.drop_guard();
    let stream = ReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        Ok(to_sse(event))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

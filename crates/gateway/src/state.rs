//! Shared application state

use axum::extract::FromRef;
use flowllm_common::auth::JwtManager;
use flowllm_common::cache::Cache;
use flowllm_common::config::AppConfig;
use flowllm_common::db::ConversationStore;
use flowllm_context::{MemoryStore, Pipeline};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: Arc<JwtManager>,
    pub pipeline: Pipeline,
    pub conversations: Arc<dyn ConversationStore>,
    pub memory: Arc<dyn MemoryStore>,
    pub cache: Option<Cache>,
    /// In-flight chat turns, awaited on shutdown so persistence completes
    pub turns: TaskTracker,
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

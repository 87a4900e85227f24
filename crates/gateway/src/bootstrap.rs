//! Provider wiring
//!
//! Every external collaborator is optional at start-up: without credentials
//! or a URL the gateway falls back to an in-process implementation and says
//! so in the log. Only the JWT secret is mandatory.

use crate::state::AppState;
use flowllm_common::auth::JwtManager;
use flowllm_common::cache::Cache;
use flowllm_common::config::AppConfig;
use flowllm_common::db::{ConversationStore, DbPool, InMemoryConversationStore, Repository};
use flowllm_common::embeddings::{create_embedder, CachedEmbedder, Embedder};
use flowllm_common::errors::{AppError, Result};
use flowllm_common::llm::{ChatModel, EchoModel, OpenRouterClient};
use flowllm_common::storage::S3UrlResolver;
use flowllm_context::{
    InMemoryMemoryStore, MemoryStore, Persister, Pipeline, PipelineSettings, StageServices,
    ZepMemoryStore,
};
use flowllm_search::{
    CohereReranker, InMemoryVectorIndex, PgVectorIndex, RagConfig, RagRetriever, Reranker,
    VectorIndex,
};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

/// Build the application state from configuration
pub async fn build_state(config: AppConfig) -> Result<AppState> {
    let secret = non_empty(&config.auth.jwt_secret).ok_or_else(|| AppError::Configuration {
        message: "auth.jwt_secret is required".to_string(),
    })?;
    let jwt = Arc::new(JwtManager::new(&secret, config.auth.jwt_expiration_secs));

    let conversations = conversation_store(&config).await?;
    let cache = cache(&config).await;
    let model = chat_model(&config)?;
    let memory = memory_store(&config);

    let mut embedder = create_embedder(&config.embedding)?;
    if let Some(cache) = &cache {
        embedder = Arc::new(CachedEmbedder::new(embedder, cache.clone())) as Arc<dyn Embedder>;
    }
    let rag = Arc::new(RagRetriever::new(
        embedder,
        vector_index(&config).await?,
        reranker(&config),
        RagConfig::from_config(&config.vector, &config.rerank),
    ));

    let services = StageServices::new(
        &config,
        model,
        memory.clone(),
        rag,
        Arc::new(S3UrlResolver::new(&config.storage)),
    );
    let pipeline = Pipeline::new(
        Arc::new(services),
        Persister::new(conversations.clone()),
        PipelineSettings::from(&config.pipeline),
    );

    Ok(AppState {
        config: Arc::new(config),
        jwt,
        pipeline,
        conversations,
        memory,
        cache,
        turns: TaskTracker::new(),
    })
}

async fn conversation_store(config: &AppConfig) -> Result<Arc<dyn ConversationStore>> {
    let Some(url) = non_empty(&config.database.url) else {
        warn!("No database URL configured, conversations are kept in memory");
        return Ok(Arc::new(InMemoryConversationStore::new()));
    };

    let pool = DbPool::new(&url, &config.database).await?;
    if let Some(dir) = &config.database.migrations_dir {
        pool.migrate(dir).await?;
    }
    Ok(Arc::new(Repository::new(pool)))
}

async fn cache(config: &AppConfig) -> Option<Cache> {
    let url = non_empty(&config.redis.url)?;
    match Cache::connect(&url, &config.redis).await {
        Ok(cache) => {
            info!("Redis cache connected");
            Some(cache)
        }
        Err(e) => {
            warn!(error = %e, "Redis unavailable, continuing without cache");
            None
        }
    }
}

fn chat_model(config: &AppConfig) -> Result<Arc<dyn ChatModel>> {
    match non_empty(&config.model.api_key) {
        Some(key) => Ok(Arc::new(OpenRouterClient::new(&config.model, key)?)),
        None => {
            warn!("No model API key configured, answers are echoed");
            Ok(Arc::new(EchoModel))
        }
    }
}

fn memory_store(config: &AppConfig) -> Arc<dyn MemoryStore> {
    match (config.memory.provider.as_str(), non_empty(&config.memory.api_key)) {
        ("zep", Some(key)) => Arc::new(ZepMemoryStore::new(key, &config.memory)),
        (provider, _) => {
            if provider != "memory" {
                warn!(provider, "Memory provider unavailable, using in-process memory");
            }
            Arc::new(InMemoryMemoryStore::new())
        }
    }
}

async fn vector_index(config: &AppConfig) -> Result<Arc<dyn VectorIndex>> {
    let url = non_empty(&config.vector.url).or_else(|| non_empty(&config.database.url));
    match (config.vector.provider.as_str(), url) {
        ("pgvector", Some(url)) => Ok(Arc::new(PgVectorIndex::connect(&url, &config.vector).await?)),
        (provider, _) => {
            if provider != "memory" {
                warn!(provider, "Vector index unavailable, using an empty in-process index");
            }
            Ok(Arc::new(InMemoryVectorIndex::new()))
        }
    }
}

fn reranker(config: &AppConfig) -> Option<Arc<dyn Reranker>> {
    match (config.rerank.provider.as_str(), non_empty(&config.rerank.api_key)) {
        ("cohere", Some(key)) => Some(Arc::new(CohereReranker::new(key, &config.rerank))),
        ("none", _) => None,
        (provider, _) => {
            warn!(provider, "Reranker unavailable, score order is kept");
            None
        }
    }
}

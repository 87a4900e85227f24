//! Configuration management for FlowLLM services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Conversation database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis configuration (embedding cache)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Generative model configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    #[serde(default)]
    pub vector: VectorConfig,

    /// Reranker configuration
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Memory graph configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Pipeline behaviour
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Grace period in seconds for open streams after a shutdown signal
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL. Unset means the in-memory conversation store.
    pub url: Option<String>,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Directory of SQL migrations to apply at start-up
    pub migrations_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL. Unset disables caching.
    pub url: Option<String>,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// JWT secret used to verify caller tokens
    pub jwt_secret: Option<String>,

    /// JWT expiration in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (per process)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// OpenAI-compatible chat completions base URL
    #[serde(default = "default_model_base")]
    pub api_base: String,

    /// API key. Unset means the echo model (development only).
    pub api_key: Option<String>,

    /// Timeout for non-streaming stage calls in seconds
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    /// Connect timeout for streaming calls in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Model used to rewrite the query
    #[serde(default = "default_light_model")]
    pub rewrite_model: String,

    /// Model used for the chain-of-thought stage
    #[serde(default = "default_reasoning_model")]
    pub reasoning_model: String,

    /// Model used to shorten memory queries
    #[serde(default = "default_light_model")]
    pub memory_query_model: String,

    /// Model used to derive the web search query
    #[serde(default = "default_light_model")]
    pub web_query_model: String,

    /// Search-capable model used for web findings
    #[serde(default = "default_web_search_model")]
    pub web_search_model: String,

    /// Application title sent to the provider
    #[serde(default = "default_app_title")]
    pub app_title: String,

    /// Referer sent to the provider
    pub site_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: cohere, openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorConfig {
    /// Vector index provider: pgvector, memory
    #[serde(default = "default_vector_provider")]
    pub provider: String,

    /// Postgres URL holding the chunk table (pgvector provider)
    pub url: Option<String>,

    /// Chunk table name
    #[serde(default = "default_vector_table")]
    pub table: String,

    /// Candidates fetched when reranking is disabled
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Candidates fetched when reranking is enabled
    #[serde(default = "default_top_k_rerank")]
    pub top_k_rerank: usize,

    /// Matches at or below this score are discarded
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Query timeout in seconds
    #[serde(default = "default_vector_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    /// Reranker provider: cohere, none
    #[serde(default = "default_rerank_provider")]
    pub provider: String,

    /// API key
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_cohere_base")]
    pub api_base: String,

    /// Rerank model
    #[serde(default = "default_rerank_model")]
    pub model: String,

    /// Hard cap on reranked results
    #[serde(default = "default_rerank_cap")]
    pub cap: usize,

    /// Reranking only runs when more candidates than this survive
    #[serde(default = "default_rerank_min_candidates")]
    pub min_candidates: usize,

    /// Request timeout in seconds
    #[serde(default = "default_rerank_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// Memory provider: zep, memory
    #[serde(default = "default_memory_provider")]
    pub provider: String,

    /// API base URL
    #[serde(default = "default_zep_base")]
    pub api_base: String,

    /// API key
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_memory_timeout")]
    pub timeout_secs: u64,

    /// Longest query sent to the graph search
    #[serde(default = "default_memory_query_chars")]
    pub max_query_chars: usize,

    /// Maximum facts returned per search
    #[serde(default = "default_memory_search_limit")]
    pub search_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Bucket holding uploaded files and extracted images
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Bucket region
    #[serde(default = "default_region")]
    pub region: String,

    /// Public base URL override (CDN, local minio, ...)
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Maximum model steps within one turn (tool call + continuation)
    #[serde(default = "default_max_tool_steps")]
    pub max_tool_steps: usize,

    /// Overall deadline for the streamed answer in seconds
    #[serde(default = "default_turn_deadline")]
    pub turn_deadline_secs: u64,

    /// Timeout applied to each enrichment stage in seconds
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Offer the addMemory tool when the memory capability is enabled
    #[serde(default = "default_enabled")]
    pub memory_write_back: bool,

    /// Outbound event channel capacity per turn
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_ttl() -> u64 { 3600 }
fn default_redis_prefix() -> String { "flowllm".to_string() }
fn default_jwt_expiration() -> u64 { 3600 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "flowllm".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }
fn default_model_base() -> String { "https://openrouter.ai/api/v1".to_string() }
fn default_model_timeout() -> u64 { 30 }
fn default_light_model() -> String { "openai/gpt-4.1-nano".to_string() }
fn default_reasoning_model() -> String { "openai/gpt-4.1-mini".to_string() }
fn default_web_search_model() -> String { "perplexity/sonar:online".to_string() }
fn default_app_title() -> String { "FlowLLM".to_string() }
fn default_embedding_provider() -> String { "cohere".to_string() }
fn default_embedding_model() -> String { "embed-v4.0".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 10 }
fn default_embedding_retries() -> u32 { 3 }
fn default_vector_provider() -> String { "pgvector".to_string() }
fn default_vector_table() -> String { "document_chunks".to_string() }
fn default_top_k() -> usize { 10 }
fn default_top_k_rerank() -> usize { 20 }
fn default_min_score() -> f32 { 0.5 }
fn default_vector_timeout() -> u64 { 10 }
fn default_rerank_provider() -> String { "cohere".to_string() }
fn default_cohere_base() -> String { "https://api.cohere.com".to_string() }
fn default_rerank_model() -> String { "rerank-v3.5".to_string() }
fn default_rerank_cap() -> usize { 10 }
fn default_rerank_min_candidates() -> usize { 2 }
fn default_rerank_timeout() -> u64 { 10 }
fn default_memory_provider() -> String { "zep".to_string() }
fn default_zep_base() -> String { "https://api.getzep.com/api/v2".to_string() }
fn default_memory_timeout() -> u64 { 10 }
fn default_memory_query_chars() -> usize { 256 }
fn default_memory_search_limit() -> usize { 10 }
fn default_bucket() -> String { "flowllm-bucket".to_string() }
fn default_region() -> String { "us-east-1".to_string() }
fn default_max_tool_steps() -> usize { 2 }
fn default_turn_deadline() -> u64 { 60 }
fn default_stage_timeout() -> u64 { 20 }
fn default_channel_capacity() -> usize { 64 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__MODEL__API_KEY=sk-...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> Option<&str> {
        self.database
            .read_url
            .as_deref()
            .or(self.database.url.as_deref())
    }
}

impl PipelineConfig {
    pub fn turn_deadline(&self) -> Duration {
        Duration::from_secs(self.turn_deadline_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            migrations_dir: None,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            default_ttl_secs: default_redis_ttl(),
            key_prefix: default_redis_prefix(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_expiration_secs: default_jwt_expiration(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: default_model_base(),
            api_key: None,
            timeout_secs: default_model_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            rewrite_model: default_light_model(),
            reasoning_model: default_reasoning_model(),
            memory_query_model: default_light_model(),
            web_query_model: default_light_model(),
            web_search_model: default_web_search_model(),
            app_title: default_app_title(),
            site_url: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            url: None,
            table: default_vector_table(),
            top_k: default_top_k(),
            top_k_rerank: default_top_k_rerank(),
            min_score: default_min_score(),
            timeout_secs: default_vector_timeout(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            api_key: None,
            api_base: default_cohere_base(),
            model: default_rerank_model(),
            cap: default_rerank_cap(),
            min_candidates: default_rerank_min_candidates(),
            timeout_secs: default_rerank_timeout(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            provider: default_memory_provider(),
            api_base: default_zep_base(),
            api_key: None,
            timeout_secs: default_memory_timeout(),
            max_query_chars: default_memory_query_chars(),
            search_limit: default_memory_search_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            public_base_url: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tool_steps: default_max_tool_steps(),
            turn_deadline_secs: default_turn_deadline(),
            stage_timeout_secs: default_stage_timeout(),
            memory_write_back: default_enabled(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pipeline.max_tool_steps, 2);
        assert_eq!(config.pipeline.turn_deadline(), Duration::from_secs(60));
        assert_eq!(config.vector.top_k, 10);
        assert_eq!(config.vector.top_k_rerank, 20);
        assert_eq!(config.memory.max_query_chars, 256);
    }

    #[test]
    fn test_read_database_fallback() {
        let mut config = AppConfig::default();
        assert_eq!(config.read_database_url(), None);

        config.database.url = Some("postgres://localhost/flowllm".to_string());
        assert_eq!(config.read_database_url(), Some("postgres://localhost/flowllm"));

        config.database.read_url = Some("postgres://replica/flowllm".to_string());
        assert_eq!(config.read_database_url(), Some("postgres://replica/flowllm"));
    }

    #[test]
    fn test_partial_sections_deserialize() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "pipeline": { "max_tool_steps": 3 },
            "model": { "api_key": "sk-test" }
        }))
        .unwrap();

        assert_eq!(config.pipeline.max_tool_steps, 3);
        assert_eq!(config.pipeline.turn_deadline_secs, 60);
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model.web_search_model, "perplexity/sonar:online");
    }
}

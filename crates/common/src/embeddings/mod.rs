//! Embedding service abstraction
//!
//! Providers:
//! - Cohere (embed-v4.0, `search_query` input type)
//! - OpenAI-compatible `/embeddings` endpoints
//! - Deterministic mock for development and tests

use crate::cache::{keys, Cache};
use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics::record_embedding;
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate the embedding of a search query
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Retry an embedding call with exponential backoff
async fn with_retry<F, Fut>(provider: &'static str, max_retries: u32, mut call: F) -> Result<Vec<f32>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<f32>>>,
{
    let attempts = max_retries.max(1);
    let mut last_error = None;
    let start = Instant::now();

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
            tokio::time::sleep(delay).await;
        }

        match call().await {
            Ok(embedding) => {
                record_embedding(provider, start.elapsed().as_secs_f64(), true);
                return Ok(embedding);
            }
            Err(e) => {
                tracing::warn!(
                    provider,
                    attempt = attempt + 1,
                    max_retries = attempts,
                    error = %e,
                    "Embedding request failed, retrying"
                );
                last_error = Some(e);
            }
        }
    }

    record_embedding(provider, start.elapsed().as_secs_f64(), false);
    Err(last_error.unwrap_or_else(|| AppError::EmbeddingError {
        message: "Unknown error after retries".to_string(),
    }))
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to create embedding HTTP client: {}", e),
        })
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::EmbeddingError {
            message: format!("API error {}: {}", status, body),
        });
    }

    response.json().await.map_err(|e| AppError::EmbeddingError {
        message: format!("Failed to parse response: {}", e),
    })
}

/// Cohere v2 embed client
pub struct CohereEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct CohereRequest<'a> {
    model: &'a str,
    texts: [&'a str; 1],
    input_type: &'static str,
    embedding_types: [&'static str; 1],
}

#[derive(Deserialize)]
struct CohereResponse {
    embeddings: CohereEmbeddings,
}

#[derive(Deserialize)]
struct CohereEmbeddings {
    #[serde(default)]
    float: Vec<Vec<f32>>,
}

impl CohereEmbedder {
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.cohere.com".to_string()),
            max_retries: config.max_retries,
        })
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let request = CohereRequest {
            model: &self.model,
            texts: [text],
            input_type: "search_query",
            embedding_types: ["float"],
        };

        let response = self
            .client
            .post(format!("{}/v2/embed", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError {
                message: format!("Request failed: {}", e),
            })?;

        let result: CohereResponse = read_json(response).await?;
        result
            .embeddings
            .float
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })
    }
}

#[async_trait]
impl Embedder for CohereEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_retry("cohere", self.max_retries, || self.make_request(text)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: [&'a str; 1],
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries,
        })
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let request = OpenAIRequest {
            input: [text],
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError {
                message: format!("Request failed: {}", e),
            })?;

        let result: OpenAIResponse = read_json(response).await?;
        result
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_retry("openai", self.max_retries, || self.make_request(text)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder. The same text always maps to the same unit vector.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let digest = keys::text_hash(text);
        let mut seed = [0u8; 32];
        if let Ok(bytes) = hex::decode(&digest) {
            seed.copy_from_slice(&bytes[..32]);
        }
        let mut rng = StdRng::from_seed(seed);

        let raw: Vec<f32> = (0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
        Ok(raw.into_iter().map(|v| v / norm).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder decorator that reads through the Redis cache
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Cache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = keys::embedding(text, self.inner.model_name());
        self.cache
            .get_or_load("embedding", &key, || self.inner.embed(text))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let key = config.api_key.clone().filter(|k| !k.is_empty());

    match (config.provider.as_str(), key) {
        ("cohere", Some(key)) => Ok(Arc::new(CohereEmbedder::new(key, config)?)),
        ("openai", Some(key)) => Ok(Arc::new(OpenAIEmbedder::new(key, config)?)),
        ("mock", _) => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        (provider, _) => {
            tracing::warn!(provider, "Embedding provider unavailable, using mock");
            Ok(Arc::new(MockEmbedder::new(config.dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("test text").await.unwrap();
        let b = embedder.embed("test text").await.unwrap();
        let c = embedder.embed("other text").await.unwrap();

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AppError::EmbeddingError {
                        message: "flaky".into(),
                    })
                } else {
                    Ok(vec![1.0])
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, vec![1.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_key_falls_back_to_mock() {
        let config = EmbeddingConfig {
            dimension: 32,
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "mock-embedding");
        assert_eq!(embedder.dimension(), 32);
    }
}

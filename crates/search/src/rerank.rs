//! Second-pass relevance reordering

use flowllm_common::config::RerankConfig;
use flowllm_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SERVICE: &str = "rerank";

/// Position of a document in the input list and its new relevance
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f32,
}

#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    /// Best `top_n` documents for `query`, most relevant first
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankHit>>;
}

/// Cohere v2 rerank client
pub struct CohereReranker {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankHit>,
}

impl CohereReranker {
    pub fn new(api_key: String, config: &RerankConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait::async_trait]
impl Reranker for CohereReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankHit>> {
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n,
        };

        let response = self
            .client
            .post(format!("{}/v2/rerank", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::UpstreamTimeout {
                        service: SERVICE.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::upstream(SERVICE, e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(SERVICE, format!("API error {}: {}", status, body)));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| AppError::upstream(SERVICE, format!("Malformed response: {}", e)))?;

        Ok(parsed.results)
    }
}

//! Per-caller long-term memory graph

use async_trait::async_trait;
use flowllm_common::config::MemoryConfig;
use flowllm_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

const SERVICE: &str = "memory";

/// Knowledge graph keyed by caller. Implementations must never read or
/// write outside the given caller's graph.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append a fact to the caller's graph
    async fn add_fact(&self, caller_id: &str, fact: &str) -> Result<()>;

    /// Facts from the caller's graph relevant to `query`, best first
    async fn search(&self, caller_id: &str, query: &str, limit: usize) -> Result<Vec<String>>;
}

/// Zep graph API client
pub struct ZepMemoryStore {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct AddRequest<'a> {
    user_id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a str,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    user_id: &'a str,
    query: &'a str,
    scope: &'static str,
    limit: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Deserialize)]
struct Edge {
    #[serde(default)]
    fact: Option<String>,
}

impl ZepMemoryStore {
    pub fn new(api_key: String, config: &MemoryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .timeout(self.timeout)
            .json(body)
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
        Ok(response)
    }
}

#[async_trait]
impl MemoryStore for ZepMemoryStore {
    async fn add_fact(&self, caller_id: &str, fact: &str) -> Result<()> {
        let body = AddRequest {
            user_id: caller_id,
            kind: "text",
            data: fact,
        };
        self.post("/graph", &body).await?;
        tracing::debug!(caller_id, "Memory fact added");
        Ok(())
    }

    async fn search(&self, caller_id: &str, query: &str, limit: usize) -> Result<Vec<String>> {
        let body = SearchRequest {
            user_id: caller_id,
            query,
            scope: "edges",
            limit,
        };
        let response: SearchResponse = self
            .post("/graph/search", &body)
            .await?
            .json()
            .await
            .map_err(|e| AppError::upstream(SERVICE, format!("Malformed response: {}", e)))?;

        Ok(response
            .edges
            .into_iter()
            .filter_map(|edge| edge.fact)
            .filter(|fact| !fact.trim().is_empty())
            .take(limit)
            .collect())
    }
}

/// Process-local memory. Search ranks facts by shared words with the query.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    facts: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn add_fact(&self, caller_id: &str, fact: &str) -> Result<()> {
        self.facts
            .write()
            .await
            .entry(caller_id.to_string())
            .or_default()
            .push(fact.to_string());
        Ok(())
    }

    async fn search(&self, caller_id: &str, query: &str, limit: usize) -> Result<Vec<String>> {
        let facts = self.facts.read().await;
        let Some(owned) = facts.get(caller_id) else {
            return Ok(Vec::new());
        };

        let query_words = words(query);
        let mut scored: Vec<(usize, &String)> = owned
            .iter()
            .map(|fact| {
                let fact_words = words(fact);
                let overlap = query_words.iter().filter(|w| fact_words.contains(w)).count();
                (overlap, fact)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, fact)| fact.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_is_scoped_to_caller() {
        let store = InMemoryMemoryStore::new();
        store.add_fact("alice", "Alice drinks green tea").await.unwrap();
        store.add_fact("bob", "Bob drinks black tea").await.unwrap();

        let facts = store.search("alice", "what tea", 10).await.unwrap();
        assert_eq!(facts, vec!["Alice drinks green tea"]);
        assert!(store.search("carol", "tea", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let store = InMemoryMemoryStore::new();
        store.add_fact("u", "Lives in Berlin").await.unwrap();
        store.add_fact("u", "Works in Berlin as a Rust engineer").await.unwrap();

        let facts = store.search("u", "rust engineer berlin", 1).await.unwrap();
        assert_eq!(facts, vec!["Works in Berlin as a Rust engineer"]);
    }
}

//! Redis cache integration
//!
//! Used for query embeddings, which are requested again for every
//! follow-up turn that reuses the same effective query.

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use crate::metrics::record_cache;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

/// Redis cache client
#[derive(Clone)]
pub struct Cache {
    connection: MultiplexedConnection,
    key_prefix: String,
    default_ttl_secs: u64,
}

impl Cache {
    /// Connect to the configured Redis URL
    pub async fn connect(url: &str, config: &RedisConfig) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            default_ttl_secs: config.default_ttl_secs,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;

        match value {
            Some(json) => {
                let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                debug!(key = %full_key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Set a value with the default TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;

        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(&full_key, &json, self.default_ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs = self.default_ttl_secs, "Cache set");
        Ok(())
    }

    /// Read through the cache. Cache failures never fail the load.
    pub async fn get_or_load<T, F, Fut>(&self, kind: &'static str, key: &str, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(cached)) => {
                record_cache(kind, true);
                return Ok(cached);
            }
            Ok(None) => record_cache(kind, false),
            Err(e) => {
                record_cache(kind, false);
                warn!(error = %e, "Cache read failed, loading from source");
            }
        }

        let value = loader().await?;

        if let Err(e) = self.set(key, &value).await {
            warn!(error = %e, "Failed to cache value, continuing without cache");
        }

        Ok(value)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Cache key builders
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Hex sha256 of a text
    pub fn text_hash(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Embedding cache key
    pub fn embedding(text: &str, model: &str) -> String {
        format!("embedding:{}:{}", model, text_hash(text))
    }
}

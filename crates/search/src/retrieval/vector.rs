//! Vector similarity search using pgvector

use super::{ChunkRef, VectorIndex};
use flowllm_common::config::VectorConfig;
use flowllm_common::errors::{AppError, Result};
use pgvector::Vector;
use regex_lite::Regex;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Vector index over a Postgres chunk table
#[derive(Clone)]
pub struct PgVectorIndex {
    pool: PgPool,
    sql: String,
    timeout: Duration,
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    text: String,
    document_name: String,
    image_path: Option<String>,
    score: f32,
}

fn build_query(table: &str) -> Result<String> {
    let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| AppError::Internal {
        message: e.to_string(),
    })?;
    if !identifier.is_match(table) {
        return Err(AppError::Configuration {
            message: format!("Invalid vector table name: {}", table),
        });
    }

    Ok(format!(
        r#"
        SELECT text, document_name, image_path,
               (1 - (embedding <=> $1))::float4 AS score
        FROM {table}
        WHERE namespace = $2
        ORDER BY embedding <=> $1
        LIMIT $3
        "#
    ))
}

impl PgVectorIndex {
    /// Connect to the database holding the chunk table
    pub async fn connect(url: &str, config: &VectorConfig) -> Result<Self> {
        let sql = build_query(&config.table)?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(config.timeout_secs))
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to vector store: {}", e),
            })?;

        Ok(Self {
            pool,
            sql,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait::async_trait]
impl VectorIndex for PgVectorIndex {
    async fn query(&self, namespace: &str, embedding: &[f32], top_k: usize) -> Result<Vec<ChunkRef>> {
        let query = sqlx::query_as::<_, ChunkRow>(&self.sql)
            .bind(Vector::from(embedding.to_vec()))
            .bind(namespace)
            .bind(top_k as i64)
            .fetch_all(&self.pool);

        let rows = tokio::time::timeout(self.timeout, query)
            .await
            .map_err(|_| AppError::UpstreamTimeout {
                service: "vector".to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        Ok(rows
            .into_iter()
            .map(|row| ChunkRef {
                text: row.text,
                document_name: row.document_name,
                image_ref: row.image_path.filter(|p| !p.is_empty()),
                relevance_score: row.score.clamp(0.0, 1.0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_uses_table_and_namespace() {
        let sql = build_query("document_chunks").unwrap();
        assert!(sql.contains("FROM document_chunks"));
        assert!(sql.contains("WHERE namespace = $2"));
    }

    #[test]
    fn test_rejects_injected_table() {
        assert!(build_query("chunks; DROP TABLE conversations").is_err());
        assert!(build_query("1chunks").is_err());
    }
}

//! Conversation storage
//!
//! Provides:
//! - The `ConversationStore` contract keyed by (conversation id, caller id)
//! - A SeaORM repository over Postgres
//! - An in-memory store for development and tests
//! - Connection pool management and migrations

mod memory;
pub mod models;
mod repository;

pub use memory::InMemoryConversationStore;
pub use repository::Repository;

use crate::chat::StoredMessage;
use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// A stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(skip_serializing, default)]
    pub caller_id: String,
    pub name: String,
    pub messages: Vec<StoredMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing entry without messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationSummary {
    fn from(c: &Conversation) -> Self {
        Self {
            id: c.id.clone(),
            name: c.name.clone(),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// One page of conversations, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPage {
    pub items: Vec<ConversationSummary>,
    pub next_cursor: Option<u64>,
}

/// Durable conversation store. Every operation is scoped to the caller;
/// another caller's conversation behaves as if it did not exist.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_by_id(&self, id: &str, caller_id: &str) -> Result<Option<Conversation>>;

    /// Replace the whole message array, creating the conversation with
    /// `title` when it does not exist yet. Replaying the same turn is a no-op.
    async fn merge_turn(
        &self,
        id: &str,
        caller_id: &str,
        messages: &[StoredMessage],
        title: &str,
    ) -> Result<()>;

    async fn rename(&self, id: &str, caller_id: &str, name: &str) -> Result<()>;

    async fn list(&self, caller_id: &str, offset: u64, limit: u64) -> Result<ConversationPage>;

    /// Returns whether a conversation was removed
    async fn delete(&self, id: &str, caller_id: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);
    opts
}

impl DbPool {
    /// Connect to the primary (and optional replica) database
    pub async fn new(url: &str, config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Database::connect(connect_options(url, config))
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        let replica = match config.read_url {
            Some(ref read_url) => {
                info!("Connecting to read replica...");
                let conn = Database::connect(connect_options(read_url, config))
                    .await
                    .map_err(|e| AppError::DatabaseConnection {
                        message: format!("Failed to connect to replica: {}", e),
                    })?;
                Some(conn)
            }
            None => None,
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Apply the SQL migrations found in `dir`
    pub async fn migrate(&self, dir: &str) -> Result<()> {
        let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(dir))
            .await
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to load migrations from {}: {}", dir, e),
            })?;

        migrator
            .run(self.primary.get_postgres_connection_pool())
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Migration failed: {}", e),
            })?;

        info!(dir, "Migrations applied");
        Ok(())
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}

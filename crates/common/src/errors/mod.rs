//! Error types for FlowLLM services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Message shown to callers whenever a turn fails in a user-visible way.
/// Internal detail is logged, never exposed.
pub const GENERIC_ERROR_MESSAGE: &str = "An unknown error occurred. Please try again later.";

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    EmptyInput,

    // Authentication errors (2xxx)
    Unauthorized,
    InvalidToken,
    ExpiredToken,

    // Resource errors (4xxx)
    ConversationNotFound,

    // Rate limiting (6xxx)
    RateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    UpstreamTimeout,
    EmbeddingError,
    CacheError,

    // Pipeline errors (85xx)
    StageDegraded,
    GenerationFailed,
    PersistenceFailed,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::EmptyInput => 1002,

            ErrorCode::Unauthorized => 2001,
            ErrorCode::InvalidToken => 2002,
            ErrorCode::ExpiredToken => 2003,

            ErrorCode::ConversationNotFound => 4002,

            ErrorCode::RateLimited => 6001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::UpstreamTimeout => 8002,
            ErrorCode::EmbeddingError => 8003,
            ErrorCode::CacheError => 8006,

            ErrorCode::StageDegraded => 8501,
            ErrorCode::GenerationFailed => 8502,
            ErrorCode::PersistenceFailed => 8503,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Input text is empty")]
    EmptyInput,

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    // Resource errors
    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("{service} error: {message}")]
    UpstreamError { service: String, message: String },

    #[error("{service} timed out after {timeout_ms}ms")]
    UpstreamTimeout { service: String, timeout_ms: u64 },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Pipeline errors
    #[error("Stage {stage} degraded: {message}")]
    StageDegraded { stage: String, message: String },

    #[error("Generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("Persistence failed: {message}")]
    PersistenceFailed { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for an upstream failure attributed to a named service
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::UpstreamError {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::EmptyInput => ErrorCode::EmptyInput,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidToken => ErrorCode::InvalidToken,
            AppError::ExpiredToken => ErrorCode::ExpiredToken,
            AppError::ConversationNotFound { .. } => ErrorCode::ConversationNotFound,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::UpstreamError { .. } => ErrorCode::UpstreamError,
            AppError::UpstreamTimeout { .. } => ErrorCode::UpstreamTimeout,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::StageDegraded { .. } => ErrorCode::StageDegraded,
            AppError::GenerationFailed { .. } => ErrorCode::GenerationFailed,
            AppError::PersistenceFailed { .. } => ErrorCode::PersistenceFailed,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::EmptyInput => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } | AppError::InvalidToken | AppError::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }

            // 404 Not Found
            AppError::ConversationNotFound { .. } => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::PersistenceFailed { .. }
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::UpstreamError { .. }
            | AppError::EmbeddingError { .. }
            | AppError::HttpClient(_)
            | AppError::StageDegraded { .. }
            | AppError::GenerationFailed { .. } => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            AppError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // 503 Service Unavailable
            AppError::CacheError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Message safe to show a caller. Server-side failures collapse to the
    /// generic message so upstream detail never leaks.
    pub fn public_message(&self) -> String {
        if self.is_server_error() {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message: self.public_message(),
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseConnection {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::ConversationNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::ConversationNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unauthorized_is_401() {
        let err = AppError::Unauthorized {
            message: "Missing Authorization header".into(),
        };
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(err.is_client_error());
        assert_eq!(err.code().as_code(), 2001);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "model is required".into(),
            field: Some("model".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.public_message().contains("model is required"));
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let err = AppError::upstream("openrouter", "HTTP 500: secret stack trace");
        assert!(err.is_server_error());
        assert_eq!(err.public_message(), GENERIC_ERROR_MESSAGE);

        let err = AppError::GenerationFailed {
            message: "connection reset".into(),
        };
        assert_eq!(err.public_message(), GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err = AppError::UpstreamTimeout {
            service: "cohere".into(),
            timeout_ms: 5000,
        };
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.to_string(), "cohere timed out after 5000ms");
    }

    #[test]
    fn test_cache_outage_is_503() {
        let err = AppError::CacheError {
            message: "connection refused".into(),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code().as_code(), 8006);
        assert_eq!(err.public_message(), GENERIC_ERROR_MESSAGE);
    }
}

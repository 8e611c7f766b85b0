//! Error types for Tarwatch workers
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Stable error codes for log aggregation
//! - Transient/permanent classification used by retry policies

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Resource errors (4xxx)
    NotFound,

    // Conflict errors (5xxx)
    Duplicate,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    MigrationError,

    // External service errors (8xxx)
    UpstreamError,
    SourceParseError,
    ChannelError,
    KeywordLoadError,

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
            ErrorCode::MissingField => 1002,

            ErrorCode::NotFound => 4001,

            ErrorCode::Duplicate => 5001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::MigrationError => 7003,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::SourceParseError => 8002,
            ErrorCode::ChannelError => 8003,
            ErrorCode::KeywordLoadError => 8004,

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

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    // Conflict errors
    #[error("Duplicate resource: {message}")]
    Duplicate { message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // External service errors
    #[error("Upstream {service} error: {message}")]
    Upstream { service: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Malformed source page: {message}")]
    SourceParse { message: String },

    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Keyword load error: {message}")]
    KeywordLoad { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
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
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::Duplicate { .. } => ErrorCode::Duplicate,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Migration(_) => ErrorCode::MigrationError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::SourceParse { .. } => ErrorCode::SourceParseError,
            AppError::Channel { .. } => ErrorCode::ChannelError,
            AppError::KeywordLoad { .. } => ErrorCode::KeywordLoadError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Network or remote-side failures that may succeed when retried.
    /// Client errors other than 429 are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::HttpClient(err) => err
                .status()
                .map(|s| !s.is_client_error() || s.as_u16() == 429)
                .unwrap_or(true),
            AppError::Upstream { .. } | AppError::Channel { .. } | AppError::DatabaseConnection { .. } => {
                true
            }
            _ => false,
        }
    }

    /// Malformed input that should be skipped rather than retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. } | AppError::MissingField { .. } | AppError::SourceParse { .. }
        )
    }

    /// Failures of the store itself, fatal for a worker iteration
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::DatabaseConnection { .. } | AppError::Migration(_)
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation {
            message: err.to_string(),
            field: err.field_errors().keys().next().map(|k| k.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

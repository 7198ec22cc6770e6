//! Error types for Till

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core not initialized: {0}")]
    NotInitialized(String),

    #[error("Terminal not paired: {0}")]
    NotPaired(String),

    #[error("Offline exposure limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Dataset version required: {0}")]
    DatasetVersionRequired(String),

    #[error("API key rejected by backend")]
    AuthInvalid,

    #[error("Operation rejected by backend: {0}")]
    Conflict(String),

    #[error("Database corruption: {0}")]
    Corruption(String),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Stable machine-readable code for the gateway response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "NOT_INITIALIZED",
            Self::NotPaired(_) => "NOT_PAIRED",
            Self::LimitExceeded(_) => "LIMIT_EXCEEDED",
            Self::DatasetVersionRequired(_) => "DATASET_VERSION_REQUIRED",
            Self::AuthInvalid => "AUTH_INVALID",
            Self::Conflict(_) => "CONFLICT",
            Self::Corruption(_) => "DB_CORRUPTION",
            Self::Migration(_) => "SCHEMA_MIGRATION_FAILED",
            Self::Http(e) if e.is_timeout() => "TIMEOUT",
            Self::Http(_) => "NETWORK_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidData(_) => "INVALID_DATA",
            _ => "INTERNAL",
        }
    }

    /// Whether a sync-path failure may be retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

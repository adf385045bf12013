//! Error types for the extraction pipeline and ingestion workflow

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification used by callers that only care about the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    LoadError,
    ValidationError,
    StorageError,
    SinkError,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("model not available: {name} (loaded models: {available:?})")]
    ModelNotFound { name: String, available: Vec<String> },

    #[error("no OCR model registered for counter {0}")]
    NoModelForCounter(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("failed to load model {name}: {reason}")]
    Load { name: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Sink write failed: {0}")]
    Sink(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ModelNotFound { .. } | Error::NoModelForCounter(_) | Error::NotFound(_) => {
                ErrorKind::NotFound
            }
            Error::Load { .. } => ErrorKind::LoadError,
            Error::Validation(_) | Error::Image(_) | Error::Json(_) => ErrorKind::ValidationError,
            Error::Storage(_)
            | Error::Upload(_)
            | Error::Database(_)
            | Error::Migration(_)
            | Error::Io(_) => ErrorKind::StorageError,
            Error::Sink(_) => ErrorKind::SinkError,
        }
    }

    pub fn load(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Load {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

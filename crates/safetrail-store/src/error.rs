//! Error types for safetrail-store.

use std::path::PathBuf;

use safetrail_core::StoreOperation;
use safetrail_types::DocumentPath;

/// Result type for safetrail-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in safetrail-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A path that does not name a document, or a stored row that is not one.
    #[error("Invalid document {path}: {reason}")]
    InvalidDocument { path: String, reason: String },

    /// The database was written by a newer schema than this build knows.
    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid document error.
    pub fn invalid_document(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidDocument {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Convert into the controller's error type with operation context.
    pub fn into_core(self, operation: StoreOperation, path: &DocumentPath) -> safetrail_core::Error {
        safetrail_core::Error::store(operation, path, self)
    }
}

//! Typed errors for the extraction pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.
//!
//! Failure scope follows the pipeline design: [`ProcessError`] is fatal for
//! a document; [`ModelError`] and [`SearchError`] are caught at field/call
//! granularity and degrade that field rather than aborting the document.

use std::path::PathBuf;

use thiserror::Error;

/// Document-level errors. Any of these marks the document `failed`.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// File rejected before registration (oversized, unsupported type).
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Underlying text extraction failed.
    #[error("text extraction failed for {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Pre-registration rejection of a document file.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("file {path} exceeds the configured limit of {limit_bytes} bytes ({size_bytes})")]
    FileTooLarge {
        path: PathBuf,
        size_bytes: u64,
        limit_bytes: u64,
    },

    #[error("no extractor can handle {path}")]
    UnsupportedType { path: PathBuf },

    #[error("cannot read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

/// Errors from the persistence layer (documents, extractions, caches).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored data: {0}")]
    CorruptData(String),

    #[error("document not found: {0}")]
    DocumentNotFound(i64),
}

/// Errors from a single language-model call. Caught per call; the caller
/// degrades the field to a low-confidence placeholder.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("model returned status {status}")]
    Status { status: u16 },

    #[error("model response had no content")]
    EmptyResponse,
}

/// Errors from the search/crawl client. Retried with backoff up to a
/// ceiling, then the field degrades to "not found".
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// 429/503 from an instance; retried against the next instance.
    #[error("instance {instance} throttled request (status {status})")]
    Throttled { instance: String, status: u16 },

    #[error("search retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("search cache error: {0}")]
    Cache(#[from] StoreError),
}

impl SearchError {
    /// Whether another attempt against a rotated instance may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Throttled { .. })
    }
}

/// Result type alias for document-level operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for model calls.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Result type alias for search/crawl operations.
pub type SearchResult<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_and_transport_errors_are_retryable() {
        let throttled = SearchError::Throttled {
            instance: "https://searx.be".into(),
            status: 429,
        };
        assert!(throttled.is_retryable());

        let exhausted = SearchError::RetriesExhausted {
            attempts: 3,
            last_error: "timeout".into(),
        };
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn validation_error_converts_to_process_error() {
        let err: ProcessError = ValidationError::UnsupportedType {
            path: PathBuf::from("report.xlsx"),
        }
        .into();
        assert!(matches!(err, ProcessError::Validation(_)));
    }
}

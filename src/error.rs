//! Error types for the request cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Storage Error Enum ==
/// Failure while loading or saving a persisted snapshot.
///
/// Never escapes a cache operation; the service logs it and reports it
/// through the `on_error` hook.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Filesystem failure (open, write, rename)
    #[error("storage io: {0}")]
    Io(String),

    /// Snapshot could not be encoded or decoded
    #[error("storage serialization: {0}")]
    Serialization(String),

    /// Snapshot is larger than the configured quota
    #[error("storage quota exceeded: {size} bytes > {quota} bytes")]
    QuotaExceeded { size: usize, quota: usize },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// == Cache Error Enum ==
/// Unified error type for the request cache.
///
/// `Clone` so one fetch outcome can be handed to every waiter of a key or batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// A caller-supplied fetcher failed
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Persistence failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The batch this request was waiting on was cleared before it ran
    #[error("Batch cancelled: {0}")]
    BatchCancelled(String),

    /// Value could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps any displayable error as a fetch failure.
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        CacheError::Fetch(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Fetch(_) => StatusCode::BAD_GATEWAY,
            CacheError::BatchCancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Storage(_) | CacheError::Serialization(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the request cache.
pub type Result<T> = std::result::Result<T, CacheError>;

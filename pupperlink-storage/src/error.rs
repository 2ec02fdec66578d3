//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the calibration store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("calibration not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("data corruption: {0}")]
    Corruption(String),
}

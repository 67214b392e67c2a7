//! Storage errors

use thiserror::Error;

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object not found
    #[error("object not found: {0}")]
    NotFound(String),

    /// Key is empty, absolute or escapes the bucket
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Upload failed
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

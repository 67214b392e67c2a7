//! Recording engine errors

use recmux_storage::StorageError;
use thiserror::Error;

/// Errors from the recording engine
#[derive(Error, Debug)]
pub enum MuxError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A stream could not be mapped to an output slot
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// No source stream is supported by the container
    #[error("no supported streams")]
    NoSupportedStreams,

    /// The stream accept filter refused the source
    #[error("stream parameters rejected")]
    StreamRejected,

    /// Streams were already negotiated
    #[error("streams already negotiated")]
    AlreadyPrepared,

    /// Operation not valid in the current session state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown bitstream filter name
    #[error("unknown bitstream filter: {0}")]
    UnknownFilter(String),

    /// Bitstream filter failure
    #[error("filter error: {0}")]
    Filter(String),

    /// Container or bitstream error
    #[error(transparent)]
    Media(#[from] recmux_core::Error),

    /// Storage error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, MuxError>;

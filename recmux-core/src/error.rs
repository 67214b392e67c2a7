//! Error types for the recmux crates.
//!
//! Container and bitstream failures have their own enums so callers can
//! tell a malformed file apart from an I/O problem.

use thiserror::Error;

/// Main error type for the core and container crates.
#[derive(Error, Debug)]
pub enum Error {
    /// Container format errors (reading/writing).
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// Bitstream parsing errors.
    #[error("Bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unsupported feature or format.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// End of stream reached.
    #[error("End of stream")]
    EndOfStream,
}

/// Container format errors.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// Invalid or corrupted container structure.
    #[error("Invalid container structure: {0}")]
    InvalidStructure(String),

    /// Missing required atom/box/element.
    #[error("Missing required element: {0}")]
    MissingElement(String),

    /// Invalid atom/box size.
    #[error("Invalid element size at offset {offset}: {message}")]
    InvalidSize { offset: u64, message: String },

    /// Stream not found in container.
    #[error("Stream {index} not found")]
    StreamNotFound { index: usize },

    /// Decode timestamps must strictly increase within a track.
    #[error("Non-monotonic dts on stream {index}: {dts} after {last}")]
    NonMonotonicDts { index: usize, last: i64, dts: i64 },

    /// Operation issued in the wrong writer/reader state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Track configuration error.
    #[error("Track configuration error: {0}")]
    TrackConfig(String),

    /// Generic container error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for ContainerError {
    fn from(s: String) -> Self {
        ContainerError::Other(s)
    }
}

impl From<&str> for ContainerError {
    fn from(s: &str) -> Self {
        ContainerError::Other(s.to_string())
    }
}

/// Bitstream parsing errors.
#[derive(Error, Debug)]
pub enum BitstreamError {
    /// Unexpected end of bitstream.
    #[error("Unexpected end of bitstream")]
    UnexpectedEnd,

    /// Missing or corrupt sync word / start code.
    #[error("Invalid sync at offset {offset}")]
    InvalidSync { offset: u64 },

    /// Generic bitstream error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for BitstreamError {
    fn from(s: String) -> Self {
        BitstreamError::Other(s)
    }
}

impl From<&str> for BitstreamError {
    fn from(s: &str) -> Self {
        BitstreamError::Other(s.to_string())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// Check if this error only affects the current packet.
    ///
    /// Timestamp ordering problems and malformed payloads leave the writer
    /// usable for the next packet.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Container(ContainerError::NonMonotonicDts { .. })
                | Error::Container(ContainerError::StreamNotFound { .. })
                | Error::Bitstream(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidParameter("test parameter".into());
        assert_eq!(err.to_string(), "Invalid parameter: test parameter");
    }

    #[test]
    fn test_container_error_conversion() {
        let container_err = ContainerError::MissingElement("moov".into());
        let err: Error = container_err.into();
        assert!(matches!(err, Error::Container(ContainerError::MissingElement(_))));
    }

    #[test]
    fn test_non_monotonic_display() {
        let err = ContainerError::NonMonotonicDts { index: 1, last: 20, dts: 10 };
        assert_eq!(err.to_string(), "Non-monotonic dts on stream 1: 10 after 20");
    }

    #[test]
    fn test_is_eof() {
        assert!(Error::EndOfStream.is_eof());
        assert!(!Error::unsupported("x").is_eof());
    }

    #[test]
    fn test_is_recoverable() {
        let recoverable = Error::Container(ContainerError::NonMonotonicDts { index: 0, last: 1, dts: 1 });
        assert!(recoverable.is_recoverable());

        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.is_recoverable());
    }
}

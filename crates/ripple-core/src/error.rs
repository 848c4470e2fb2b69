//! Error types for ripple-core

use thiserror::Error;

/// Result type alias using ripple-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding frames
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A binary frame did not hold UTF-8 text
    #[error("Frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl Error {
    /// Whether this error came from a frame that could not be decoded.
    ///
    /// Decode errors are recoverable: the frame is dropped and the session
    /// carries on.
    pub fn is_decode_error(&self) -> bool {
        match self {
            Error::Json(e) => !e.is_io(),
            Error::Utf8(_) => true,
        }
    }
}

//! Error types for ripple-client

use thiserror::Error;

/// Result type alias using ripple-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the client
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the protocol layer
    #[error(transparent)]
    Core(#[from] ripple_core::Error),

    /// The endpoint address is not a usable WebSocket URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The session task has stopped and no longer accepts commands
    #[error("Client session is closed")]
    Closed,
}

impl Error {
    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

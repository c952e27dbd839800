//! Common error types for hmdlink.

use thiserror::Error;

/// Result type alias using hmdlink's common error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised outside the XR runtime boundary: config files, environment.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while reading a config file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed config file contents
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

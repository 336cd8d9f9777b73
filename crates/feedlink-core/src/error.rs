//! Error types for the Feedlink core library.

use thiserror::Error;

/// Result type alias using the Feedlink core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Feedlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed bus payload or topic. Always recoverable: the offending
    /// message is dropped and processing continues.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bus message that could not be interpreted.
///
/// Carriers of this error log a diagnostic and drop the message; it never
/// terminates a subscription loop.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed topic: {0}")]
    Topic(String),

    #[error("Malformed payload: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

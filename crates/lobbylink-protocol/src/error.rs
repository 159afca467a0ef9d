//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while framing or parsing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line was not a well-formed JSON value of the expected shape.
    #[error("malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    /// The message cannot be sent as a single line.
    #[error("invalid payload: {reason}")]
    InvalidPayload { reason: String },

    /// A line exceeded the maximum allowed length.
    #[error("line too long: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A value could not be turned into JSON at all.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Creates an invalid payload error.
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }
}

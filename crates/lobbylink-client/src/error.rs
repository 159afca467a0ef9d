//! Client error types.

use std::fmt;

use lobbylink_server::ConnectionError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while joining a lobby.
#[derive(Debug)]
pub enum ClientError {
    /// Connecting to the server failed.
    Connection(String),
    /// Connecting took longer than the configured timeout.
    Timeout(String),
    /// IO error.
    Io(std::io::Error),
    /// The server did not complete the handshake.
    Handshake(ConnectionError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Handshake(err) => write!(f, "handshake failed: {}", err),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Handshake(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ConnectionError> for ClientError {
    fn from(err: ConnectionError) -> Self {
        Self::Handshake(err)
    }
}

//! Server error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use lobbylink_protocol::ProtocolError;

use crate::handler::RunnerError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors raised by a single [`Connection`](crate::Connection).
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Framing error: malformed line, invalid payload or oversized line.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO error on the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The connection was closed locally.
    #[error("Connection closed")]
    Closed,

    /// The peer did not complete the handshake.
    #[error("Handshake failed: {reason}")]
    Handshake { reason: String },

    /// The peer did not send its identity in time.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The starting roster was already sent on this connection.
    #[error("Starting roster already sent to {name}")]
    RosterAlreadySent { name: String },
}

impl ConnectionError {
    /// Creates a handshake error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    /// Returns true if a received line could not be decoded.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Protocol(ProtocolError::MalformedMessage(_)))
    }
}

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error on the listening socket.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A joining connection failed (handshake, framing, IO).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A member with the same name is already waiting in the lobby.
    #[error("Duplicate member {name:?} in lobby {lobby:?}")]
    DuplicateMember { lobby: String, name: String },

    /// `run` was called on a server that was already started.
    #[error("Server is already running or has been stopped")]
    AlreadyRunning,

    /// `stop` was called on a server that is not running.
    #[error("Server is not running")]
    NotRunning,

    /// The lobby handler failed while running a lobby.
    #[error("Lobby {lobby:?} runner failed: {source}")]
    Runner { lobby: String, source: RunnerError },
}

impl ServerError {
    /// Creates a duplicate member error.
    pub fn duplicate_member(lobby: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateMember {
            lobby: lobby.into(),
            name: name.into(),
        }
    }

    /// Creates a runner failure.
    pub fn runner(lobby: impl Into<String>, source: impl Into<RunnerError>) -> Self {
        Self::Runner {
            lobby: lobby.into(),
            source: source.into(),
        }
    }
}

//! Handshake message types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Any JSON value; the only payload a connection can carry.
pub type Message = Value;

/// First line a client sends: who it is and which lobby it wants.
///
/// Fields other than `name` and `lobby` are kept in `extra` and travel with
/// the connection to the lobby handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Member name, unique within a lobby.
    pub name: String,
    /// Lobby identifier to join or create.
    pub lobby: String,
    /// Additional client-supplied metadata.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Identity {
    /// Creates an identity without extra metadata.
    pub fn new(name: impl Into<String>, lobby: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lobby: lobby.into(),
            extra: Map::new(),
        }
    }

    /// Builder: attach an extra metadata field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Lobby status notices sent by the server.
///
/// Currently the only notice is the starting roster, sent once to every
/// member when its lobby completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LobbyState {
    /// The lobby is complete; `others` names every other member.
    Starting {
        /// Names of the other members, in lobby order.
        others: Vec<String>,
    },
}

impl LobbyState {
    /// Creates a starting roster.
    pub fn starting(others: Vec<String>) -> Self {
        Self::Starting { others }
    }

    /// Peer names carried by this notice.
    pub fn others(&self) -> &[String] {
        match self {
            Self::Starting { others } => others,
        }
    }
}

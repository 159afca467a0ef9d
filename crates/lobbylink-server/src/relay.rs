//! A ready-made handler that relays every message to the rest of the lobby.

use futures_util::future::{join_all, try_join_all};
use serde_json::json;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::handler::{BoxFuture, LobbyHandler, RunnerError};
use crate::lobby::Lobby;

/// Starts a lobby once it has `members` members, then forwards each message
/// a member sends to all others as `{"sender": <name>, "body": <message>}`.
///
/// The lobby ends when every member has disconnected.
#[derive(Debug, Clone)]
pub struct RelayHandler {
    members: usize,
}

impl RelayHandler {
    /// Creates a relay for lobbies of `members` participants (at least one).
    pub fn new(members: usize) -> Self {
        Self {
            members: members.max(1),
        }
    }

    /// Lobby size that triggers the start.
    pub fn members(&self) -> usize {
        self.members
    }

    async fn relay_from(lobby: &Lobby, member: &Connection) -> Result<(), RunnerError> {
        while let Some(body) = member.read_message().await? {
            let envelope = &json!({"sender": member.name(), "body": body});
            let deliveries = lobby
                .members_except(member.name())
                .map(|other| async move { (other.name(), other.send_message(envelope).await) });
            for (recipient, result) in join_all(deliveries).await {
                // A departed recipient must not end the relay for the others.
                if let Err(e) = result {
                    warn!(lobby = %lobby.id(), from = %member.name(), to = %recipient, error = %e, "Relay delivery failed");
                }
            }
        }
        debug!(lobby = %lobby.id(), name = %member.name(), "Member disconnected");
        Ok(())
    }
}

impl LobbyHandler for RelayHandler {
    fn is_complete(&self, lobby: &Lobby) -> bool {
        lobby.len() >= self.members
    }

    fn run<'a>(&'a self, lobby: &'a Lobby) -> BoxFuture<'a, Result<(), RunnerError>> {
        Box::pin(async move {
            try_join_all(lobby.iter().map(|member| Self::relay_from(lobby, member))).await?;
            Ok(())
        })
    }
}

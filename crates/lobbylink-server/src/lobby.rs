//! A named group of connections.
//!
//! Lobbies are plain containers: members are appended while the lobby is
//! building and never removed. Once complete, the server lends the lobby to
//! the handler by shared reference, so it cannot grow any more.

use std::slice;

use thiserror::Error;

use crate::connection::Connection;

/// Returned by [`Lobby::insert`] when the name is taken; hands the rejected
/// connection back to the caller.
#[derive(Debug, Error)]
#[error("member {name:?} already present in lobby {lobby:?}")]
pub struct DuplicateMember {
    lobby: String,
    name: String,
    connection: Connection,
}

impl DuplicateMember {
    /// Lobby the connection tried to join.
    pub fn lobby(&self) -> &str {
        &self.lobby
    }

    /// Name that was already taken.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recovers the rejected connection.
    pub fn into_connection(self) -> Connection {
        self.connection
    }
}

/// Members of one lobby, in join order.
#[derive(Debug)]
pub struct Lobby {
    id: String,
    members: Vec<Connection>,
}

impl Lobby {
    /// Creates an empty lobby.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: Vec::new(),
        }
    }

    /// Lobby identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if nobody has joined yet.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Adds a member, refusing a name that is already present.
    pub fn insert(&mut self, connection: Connection) -> Result<(), DuplicateMember> {
        if self.contains(connection.name()) {
            return Err(DuplicateMember {
                lobby: self.id.clone(),
                name: connection.name().to_string(),
                connection,
            });
        }
        self.members.push(connection);
        Ok(())
    }

    /// Looks a member up by name.
    pub fn get(&self, name: &str) -> Option<&Connection> {
        self.members.iter().find(|member| member.name() == name)
    }

    /// Returns true if a member with this name has joined.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over members in join order.
    pub fn iter(&self) -> slice::Iter<'_, Connection> {
        self.members.iter()
    }

    /// Member names in join order.
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(Connection::name).collect()
    }

    /// Every member except the one called `name`.
    ///
    /// Pass `conn.name()` to exclude a connection you already hold.
    pub fn members_except<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Connection> {
        self.iter().filter(move |member| member.name() != name)
    }
}

impl<'a> IntoIterator for &'a Lobby {
    type Item = &'a Connection;
    type IntoIter = slice::Iter<'a, Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::member;

    #[tokio::test]
    async fn insert_keeps_join_order() {
        let mut lobby = Lobby::new("t");
        assert!(lobby.is_empty());

        for name in ["carol", "alice", "bob"] {
            let (conn, _peer) = member(name, "t").await;
            lobby.insert(conn).unwrap();
        }

        assert_eq!(lobby.id(), "t");
        assert_eq!(lobby.len(), 3);
        assert_eq!(lobby.names(), ["carol", "alice", "bob"]);
        assert_eq!(lobby.names(), lobby.names());
        assert!(lobby.contains("alice"));
        assert!(!lobby.contains("dave"));
        assert_eq!(lobby.get("bob").map(Connection::name), Some("bob"));
    }

    #[tokio::test]
    async fn duplicate_name_is_refused() {
        let mut lobby = Lobby::new("t");
        let (first, _p1) = member("alice", "t").await;
        let (second, _p2) = member("alice", "t").await;

        lobby.insert(first).unwrap();
        let err = lobby.insert(second).unwrap_err();
        assert_eq!(err.lobby(), "t");
        assert_eq!(err.to_string(), r#"member "alice" already present in lobby "t""#);
        assert_eq!(err.into_connection().name(), "alice");
        assert_eq!(lobby.len(), 1);
    }

    #[tokio::test]
    async fn members_except_skips_one() {
        let mut lobby = Lobby::new("t");
        let mut peers = Vec::new();
        for name in ["alice", "bob", "carol"] {
            let (conn, peer) = member(name, "t").await;
            lobby.insert(conn).unwrap();
            peers.push(peer);
        }

        let others: Vec<&str> = lobby.members_except("bob").map(Connection::name).collect();
        assert_eq!(others, ["alice", "carol"]);

        let everyone: Vec<&str> = lobby.members_except("dave").map(Connection::name).collect();
        assert_eq!(everyone, ["alice", "bob", "carol"]);

        let alice = lobby.get("alice").unwrap();
        assert_eq!(lobby.members_except(alice.name()).count(), 2);
        assert_eq!((&lobby).into_iter().count(), 3);
    }
}

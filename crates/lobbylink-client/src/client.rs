//! TCP client for joining a lobby.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use lobbylink_protocol::{DEFAULT_PORT, Identity};
use lobbylink_server::Connection;

use crate::error::{ClientError, ClientResult};

/// Where and how to reach a lobby server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Limit on establishing the TCP connection. Waiting for the lobby to
    /// fill up is not bounded.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the given server.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Builder: set connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Joins lobbies on one server.
#[derive(Debug, Clone, Default)]
pub struct LobbyClient {
    config: ClientConfig,
}

impl LobbyClient {
    /// Creates a client for the configured server.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Joins `lobby` as `name` and waits until the lobby starts.
    pub async fn join(&self, name: &str, lobby: &str) -> ClientResult<Connection> {
        self.join_as(Identity::new(name, lobby)).await
    }

    /// Like [`join`](Self::join), sending extra identity fields as well.
    pub async fn join_as(&self, identity: Identity) -> ClientResult<Connection> {
        let stream = self.open().await?;
        debug!(name = %identity.name, lobby = %identity.lobby, "Waiting for lobby to start");

        let conn = Connection::initiate_handshake(stream, identity).await?;
        debug!(others = ?conn.others(), "Lobby started");
        Ok(conn)
    }

    async fn open(&self) -> ClientResult<TcpStream> {
        let ClientConfig {
            ref host,
            port,
            connect_timeout,
        } = self.config;
        debug!(host = %host, port, "Connecting to lobby server");

        let connecting = TcpStream::connect((host.as_str(), port));
        let stream = tokio::time::timeout(connect_timeout, connecting)
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "connecting to {host}:{port} took longer than {connect_timeout:?}"
                ))
            })?
            .map_err(|e| {
                ClientError::Connection(format!("failed to connect to {host}:{port}: {e}"))
            })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Joins `lobby` as `name` on `localhost` at the default port.
pub async fn connect(name: &str, lobby: &str) -> ClientResult<Connection> {
    LobbyClient::default().join(name, lobby).await
}

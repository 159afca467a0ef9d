//! Lobby server: handshake, lobby pairing, hand-off to session handlers.
//!
//! Clients connect, announce a name and a lobby id, and wait. Once a
//! [`LobbyHandler`] says their lobby is complete, every member gets the
//! names of the others and the handler takes over the connections.
//!
//! # Example
//!
//! ```rust,no_run
//! use lobbylink_server::{LobbyServer, RelayHandler, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = LobbyServer::bind(ServerConfig::default(), RelayHandler::new(2)).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod error;
mod handler;
mod lobby;
mod relay;
mod server;

#[cfg(test)]
mod testing;

pub use config::ServerConfig;
pub use connection::{ByteStream, Connection};
pub use error::{ConnectionError, ConnectionResult, ServerError, ServerResult};
pub use handler::{BoxFuture, LobbyHandler, RunnerError};
pub use lobby::{DuplicateMember, Lobby};
pub use relay::RelayHandler;
pub use server::{Admission, LobbyServer};

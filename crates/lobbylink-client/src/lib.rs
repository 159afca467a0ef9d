//! Client side of lobbylink: connect to a lobby server, announce a name and
//! a lobby id, and get back a [`Connection`] once the lobby has started.
//!
//! ```rust,no_run
//! # async fn example() -> lobbylink_client::ClientResult<()> {
//! let conn = lobbylink_client::connect("alice", "t").await?;
//! println!("playing against {:?}", conn.others());
//! conn.send_message(&serde_json::json!({"hello": conn.name()})).await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;

pub use client::{ClientConfig, LobbyClient, connect};
pub use error::{ClientError, ClientResult};
pub use lobbylink_server::Connection;

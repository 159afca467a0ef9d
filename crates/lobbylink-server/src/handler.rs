//! The capability a lobby server is built around.
//!
//! The server owns pairing; everything that happens after a lobby starts is
//! decided by a [`LobbyHandler`] supplied by the application.

use std::future::Future;
use std::pin::Pin;

use crate::lobby::Lobby;

/// A boxed future for async trait methods.
///
/// Boxing keeps [`LobbyHandler`] object-safe and lets the server require
/// `Send` futures for its spawned tasks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type a runner may return; any error converts into it with `?`.
pub type RunnerError = Box<dyn std::error::Error + Send + Sync>;

/// Application logic plugged into a [`LobbyServer`](crate::LobbyServer).
///
/// # Example Implementation
///
/// ```ignore
/// struct Pairs;
///
/// impl LobbyHandler for Pairs {
///     fn is_complete(&self, lobby: &Lobby) -> bool {
///         lobby.len() == 2
///     }
///
///     fn run<'a>(&'a self, lobby: &'a Lobby) -> BoxFuture<'a, Result<(), RunnerError>> {
///         Box::pin(async move {
///             for member in lobby {
///                 member.send_message(&"go").await?;
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait LobbyHandler: Send + Sync + 'static {
    /// Decides whether a building lobby is ready to start.
    ///
    /// Called with the pending table locked, right after every join; it must
    /// not block.
    fn is_complete(&self, lobby: &Lobby) -> bool;

    /// Drives a started lobby until the session is over.
    ///
    /// Every member has already received its starting roster. When the
    /// returned future resolves, successfully or not, the server closes all
    /// member connections.
    fn run<'a>(&'a self, lobby: &'a Lobby) -> BoxFuture<'a, Result<(), RunnerError>>;
}

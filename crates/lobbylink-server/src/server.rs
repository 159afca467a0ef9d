//! TCP lobby server.
//!
//! Each accepted stream is handled on its own task:
//!
//! ```text
//! accept -> handshake -> join pending lobby -> complete? -- no --> wait
//!                                                 |
//!                                                yes
//!                                                 v
//!               remove from pending -> send rosters -> run handler -> close all
//! ```
//!
//! Join, completion check and removal happen under one lock, so a lobby id
//! that just started is never joined again; the next arrival for that id
//! opens a new lobby.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{ByteStream, Connection};
use crate::error::{ConnectionError, ServerError, ServerResult};
use crate::handler::LobbyHandler;
use crate::lobby::Lobby;

/// What became of an admitted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Joined a lobby that is still building.
    Waiting { lobby: String },
    /// Completed its lobby; the handler ran and the lobby is closed.
    Finished { lobby: String },
}

enum Lifecycle {
    Ready(TcpListener),
    Running,
    Stopped,
}

/// Signals that the listener has been released when dropped.
struct ReleaseSignal<'a>(&'a watch::Sender<bool>);

impl Drop for ReleaseSignal<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// The listener while `run` owns it.
///
/// Fields drop in order: the port is freed before the release is signalled,
/// also when `run` is cancelled.
struct Accepting<'a> {
    listener: TcpListener,
    _released: ReleaseSignal<'a>,
}

/// State shared by every connection task.
struct Shared<H> {
    handler: H,
    config: ServerConfig,
    /// Building lobbies keyed by id; an id is present only until it completes.
    pending: Mutex<HashMap<String, Lobby>>,
}

enum Joined {
    Waiting,
    Started(Lobby),
    Duplicate(Connection),
}

impl<H: LobbyHandler> Shared<H> {
    async fn admit<S: ByteStream>(&self, stream: S) -> ServerResult<Admission> {
        let connection = self.handshake(stream).await.inspect_err(|e| {
            warn!(error = %e, "Handshake failed");
        })?;
        let lobby_id = connection.lobby().to_string();
        let name = connection.name().to_string();

        let joined = {
            let mut pending = self.pending.lock().await;
            let lobby = pending
                .entry(lobby_id.clone())
                .or_insert_with(|| Lobby::new(lobby_id.as_str()));
            match lobby.insert(connection) {
                Err(duplicate) => Joined::Duplicate(duplicate.into_connection()),
                Ok(()) => {
                    debug!(lobby = %lobby_id, name = %name, members = lobby.len(), "Member joined");
                    if self.handler.is_complete(lobby) {
                        pending
                            .remove(&lobby_id)
                            .map_or(Joined::Waiting, Joined::Started)
                    } else {
                        Joined::Waiting
                    }
                }
            }
        };

        match joined {
            Joined::Waiting => Ok(Admission::Waiting { lobby: lobby_id }),
            Joined::Duplicate(connection) => {
                warn!(lobby = %lobby_id, name = %name, "Rejecting duplicate member");
                if let Err(e) = connection.close().await {
                    debug!(error = %e, "Closing rejected connection failed");
                }
                Err(ServerError::duplicate_member(lobby_id, name))
            }
            Joined::Started(lobby) => {
                self.start(lobby).await?;
                Ok(Admission::Finished { lobby: lobby_id })
            }
        }
    }

    async fn handshake<S: ByteStream>(&self, stream: S) -> ServerResult<Connection> {
        let handshake = Connection::accept_handshake(stream);
        let connection = match self.config.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| ConnectionError::HandshakeTimeout(limit))??,
            None => handshake.await?,
        };
        Ok(connection)
    }

    /// Announces the roster, runs the handler, then closes every member.
    async fn start(&self, lobby: Lobby) -> ServerResult<()> {
        info!(lobby = %lobby.id(), members = ?lobby.names(), "Lobby complete, starting");

        let announcements = lobby.iter().map(|member| {
            let others = lobby
                .members_except(member.name())
                .map(|other| other.name().to_string())
                .collect();
            async move { (member.name(), member.send_starting_roster(others).await) }
        });
        for (name, result) in join_all(announcements).await {
            if let Err(e) = result {
                warn!(lobby = %lobby.id(), name = %name, error = %e, "Failed to send starting roster");
            }
        }

        let outcome = AssertUnwindSafe(self.handler.run(&lobby))
            .catch_unwind()
            .await;
        close_members(&lobby).await;

        match outcome {
            Ok(Ok(())) => {
                info!(lobby = %lobby.id(), "Lobby finished");
                Ok(())
            }
            Ok(Err(source)) => {
                error!(lobby = %lobby.id(), error = %source, "Lobby runner failed");
                Err(ServerError::runner(lobby.id(), source))
            }
            Err(_) => {
                error!(lobby = %lobby.id(), "Lobby runner panicked");
                Err(ServerError::runner(lobby.id(), "lobby runner panicked"))
            }
        }
    }
}

/// Closes every member still open; one failure does not stop the rest.
async fn close_members(lobby: &Lobby) {
    let open = lobby.iter().filter(|member| !member.is_closed());
    let closes = open.map(|member| async move { (member.name(), member.close().await) });
    for (name, result) in join_all(closes).await {
        if let Err(e) = result {
            warn!(lobby = %lobby.id(), name = %name, error = %e, "Failed to close member");
        }
    }
}

/// Lobby server bound to a TCP port.
///
/// Cheap operations take `&self`, so the server is usually shared through an
/// `Arc` with one task calling [`run`](Self::run) and another calling
/// [`stop`](Self::stop).
pub struct LobbyServer<H> {
    shared: Arc<Shared<H>>,
    local_addr: SocketAddr,
    lifecycle: Mutex<Lifecycle>,
    shutdown: watch::Sender<bool>,
    released: watch::Sender<bool>,
}

impl<H: LobbyHandler> LobbyServer<H> {
    /// Binds the listener described by `config`.
    ///
    /// Connections are not accepted until [`run`](Self::run) is called.
    pub async fn bind(config: ServerConfig, handler: H) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Lobby server listening");

        let (shutdown, _) = watch::channel(false);
        let (released, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                handler,
                config,
                pending: Mutex::new(HashMap::new()),
            }),
            local_addr,
            lifecycle: Mutex::new(Lifecycle::Ready(listener)),
            shutdown,
            released,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The configured handler.
    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    /// Accepts connections until [`stop`](Self::stop) is called or a lobby
    /// runner fails.
    ///
    /// Each connection is admitted on its own task. Handshake and duplicate
    /// member failures only affect their own connection; a runner failure is
    /// returned from here, after that lobby's members have been closed.
    /// Lobbies already running are left alone when the server stops.
    pub async fn run(&self) -> ServerResult<()> {
        // Subscribe first so a stop racing with startup is not missed.
        let mut shutdown = self.shutdown.subscribe();
        let accepting = {
            let mut lifecycle = self.lifecycle.lock().await;
            match std::mem::replace(&mut *lifecycle, Lifecycle::Running) {
                Lifecycle::Ready(listener) => Accepting {
                    listener,
                    _released: ReleaseSignal(&self.released),
                },
                previous => {
                    *lifecycle = previous;
                    return Err(ServerError::AlreadyRunning);
                }
            }
        };

        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();

        let result = loop {
            tokio::select! {
                accepted = accepting.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Accepted connection");
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(error = %e, "Failed to set TCP_NODELAY");
                        }
                        let shared = Arc::clone(&self.shared);
                        let failures = failures_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e @ ServerError::Runner { .. }) = shared.admit(stream).await {
                                let _ = failures.send(e);
                            }
                        });
                    }
                    Err(e) => {
                        // Keep accepting; the error is usually per-connection.
                        error!(error = %e, "Failed to accept connection");
                    }
                },
                Some(failure) = failures_rx.recv() => break Err(failure),
                _ = shutdown.changed() => {
                    info!(addr = %self.local_addr, "Lobby server stopped");
                    break Ok(());
                }
            }
        };

        drop(accepting);
        *self.lifecycle.lock().await = Lifecycle::Stopped;
        result
    }

    /// Stops accepting connections and releases the listener.
    ///
    /// Returns once the listening port is closed, so it can be bound again
    /// right away. Fails with [`ServerError::NotRunning`] unless
    /// [`run`](Self::run) is currently active.
    pub async fn stop(&self) -> ServerResult<()> {
        let mut released = self.released.subscribe();
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if !matches!(*lifecycle, Lifecycle::Running) {
                return Err(ServerError::NotRunning);
            }
            *lifecycle = Lifecycle::Stopped;
            self.shutdown.send_replace(true);
        }

        if !*released.borrow_and_update() {
            // Sender lives in `self`, so this only returns on release.
            let _ = released.changed().await;
        }
        debug!(addr = %self.local_addr, "Listener released");
        Ok(())
    }

    /// Runs the join algorithm over an already-accepted stream.
    ///
    /// Resolves once the connection is waiting in a building lobby, or, if it
    /// completed its lobby, once that lobby's handler has finished and its
    /// members are closed.
    pub async fn admit<S: ByteStream>(&self, stream: S) -> ServerResult<Admission> {
        self.shared.admit(stream).await
    }

    /// Ids of lobbies still building.
    pub async fn pending_lobbies(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.pending.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Member names of a building lobby, in join order.
    pub async fn pending_members(&self, lobby: &str) -> Option<Vec<String>> {
        let pending = self.shared.pending.lock().await;
        pending
            .get(lobby)
            .map(|lobby| lobby.names().into_iter().map(str::to_string).collect())
    }
}

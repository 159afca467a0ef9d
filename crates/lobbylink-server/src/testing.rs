//! Helpers for driving connections from the raw side of an in-memory pipe.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

use lobbylink_protocol::Identity;

use crate::connection::Connection;

/// The far end of a duplex pipe, speaking raw lines.
pub(crate) struct RawPeer {
    stream: BufReader<DuplexStream>,
}

impl RawPeer {
    pub(crate) fn new(stream: DuplexStream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub(crate) async fn write_line(&mut self, line: &str) {
        self.write_raw(format!("{line}\n").as_bytes()).await;
    }

    pub(crate) async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub(crate) async fn shutdown(&mut self) {
        self.stream.shutdown().await.unwrap();
    }

    /// Next line without its terminator, or `None` at end of input.
    pub(crate) async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = self.stream.read_line(&mut line).await.ok()?;
        if read == 0 || !line.ends_with('\n') {
            return None;
        }
        line.pop();
        Some(line)
    }
}

/// A stream whose identity line is already queued, plus its raw peer.
pub(crate) async fn joining(name: &str, lobby: &str) -> (DuplexStream, RawPeer) {
    let (local, remote) = duplex(4096);
    let mut peer = RawPeer::new(remote);
    let identity = serde_json::to_string(&Identity::new(name, lobby)).unwrap();
    peer.write_line(&identity).await;
    (local, peer)
}

/// A handshaken server-side connection and its raw peer.
pub(crate) async fn member(name: &str, lobby: &str) -> (Connection, RawPeer) {
    let (local, peer) = joining(name, lobby).await;
    let conn = Connection::accept_handshake(local).await.unwrap();
    (conn, peer)
}

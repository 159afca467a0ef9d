//! Line-framed connection over a duplex byte stream.
//!
//! A [`Connection`] exclusively owns its stream. Reads and writes go through
//! separate locks, so one task can wait for the next line while others send;
//! concurrent sends are serialized and never interleave partial lines.

use std::fmt;
use std::io;
use std::sync::OnceLock;

use serde::Serialize;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use lobbylink_protocol::{
    Identity, LINE_TERMINATOR, LobbyState, MAX_LINE_LENGTH, Message, ProtocolError,
    decode_message, encode_message,
};

use crate::error::{ConnectionError, ConnectionResult};

/// Any duplex byte stream a connection can run over (TCP, Unix, in-memory).
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type BoxedStream = Box<dyn ByteStream>;

type LineReader = BufReader<ReadHalf<BoxedStream>>;

/// Framed halves of a stream, before or after identity is known.
struct Channel {
    reader: Mutex<LineReader>,
    /// `None` once the connection has been closed.
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    /// Flips to `true` on close; wakes any read waiting on the stream.
    closing: watch::Sender<bool>,
}

impl Channel {
    fn new<S: ByteStream>(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(Box::new(stream) as BoxedStream);
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(Some(writer)),
            closing: watch::channel(false).0,
        }
    }

    fn is_closed(&self) -> bool {
        *self.closing.borrow()
    }

    async fn send<T: Serialize + ?Sized>(&self, message: &T) -> ConnectionResult<()> {
        // Encode before taking the lock so a bad payload never touches the stream.
        let bytes = encode_message(message)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ConnectionError::Closed)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads one raw line without its terminator.
    ///
    /// Returns `Ok(None)` at end of input, or when the connection is closed
    /// while the read is waiting; a trailing fragment with no terminator
    /// counts as end of input.
    async fn read_line(&self) -> ConnectionResult<Option<Vec<u8>>> {
        let mut closing = self.closing.subscribe();
        if *closing.borrow_and_update() {
            return Err(ConnectionError::Closed);
        }

        tokio::select! {
            line = async {
                let mut reader = self.reader.lock().await;
                read_limited_line(&mut reader).await
            } => line,
            _ = closing.changed() => {
                debug!("Pending read interrupted by close");
                Ok(None)
            }
        }
    }

    async fn read(&self) -> ConnectionResult<Option<Message>> {
        match self.read_line().await? {
            Some(line) => Ok(Some(decode_message(&line)?)),
            None => Ok(None),
        }
    }

    async fn close(&self) -> ConnectionResult<()> {
        let writer = self.writer.lock().await.take();
        let Some(mut writer) = writer else {
            return Err(ConnectionError::Closed);
        };
        self.closing.send_replace(true);
        writer.shutdown().await?;
        Ok(())
    }
}

/// Reads up to the next terminator, refusing lines over [`MAX_LINE_LENGTH`].
///
/// An oversized line is drained through its terminator before the error is
/// returned, so the following read starts on a line boundary.
async fn read_limited_line(reader: &mut LineReader) -> ConnectionResult<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let limit = (MAX_LINE_LENGTH + 1) as u64;
    (&mut *reader)
        .take(limit)
        .read_until(LINE_TERMINATOR, &mut line)
        .await?;

    if line.last() == Some(&LINE_TERMINATOR) {
        line.pop();
        return Ok(Some(line));
    }
    if line.len() > MAX_LINE_LENGTH {
        skip_line(reader).await?;
        return Err(ProtocolError::MessageTooLarge {
            size: line.len(),
            max: MAX_LINE_LENGTH,
        }
        .into());
    }
    if !line.is_empty() {
        debug!(bytes = line.len(), "Discarding unterminated trailing line");
    }
    Ok(None)
}

/// Discards input through the next terminator or end of input.
async fn skip_line(reader: &mut LineReader) -> io::Result<()> {
    loop {
        let (used, done) = {
            let buf = reader.fill_buf().await?;
            match buf.iter().position(|&b| b == LINE_TERMINATOR) {
                Some(end) => (end + 1, true),
                None => (buf.len(), buf.is_empty()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

/// One participant: an identified, line-framed stream.
///
/// Created only by a handshake, so `name` and `lobby` are always set. The
/// starting roster is filled in once, when the member's lobby completes.
/// Dropping a connection releases its stream.
pub struct Connection {
    identity: Identity,
    roster: OnceLock<Vec<String>>,
    channel: Channel,
}

impl Connection {
    /// Server side of the handshake: read the peer's identity line.
    ///
    /// The stream is dropped (and so closed) on failure.
    pub async fn accept_handshake<S: ByteStream>(stream: S) -> ConnectionResult<Self> {
        let channel = Channel::new(stream);

        let first = match channel.read().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Err(ConnectionError::handshake(
                    "stream closed before identity was sent",
                ));
            }
            Err(e) => return Err(ConnectionError::handshake(format!("unreadable identity: {e}"))),
        };
        let identity: Identity = serde_json::from_value(first)
            .map_err(|e| ConnectionError::handshake(format!("invalid identity: {e}")))?;

        debug!(name = %identity.name, lobby = %identity.lobby, "Handshake accepted");
        Ok(Self {
            identity,
            roster: OnceLock::new(),
            channel,
        })
    }

    /// Client side of the handshake: send `identity`, then wait for the
    /// starting roster.
    ///
    /// Suspends for as long as the server keeps the lobby building.
    pub async fn initiate_handshake<S: ByteStream>(
        stream: S,
        identity: Identity,
    ) -> ConnectionResult<Self> {
        let channel = Channel::new(stream);
        channel
            .send(&identity)
            .await
            .map_err(|e| ConnectionError::handshake(format!("could not send identity: {e}")))?;

        let reply = match channel.read().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Err(ConnectionError::handshake(
                    "stream closed before the lobby started",
                ));
            }
            Err(e) => return Err(ConnectionError::handshake(format!("unreadable roster: {e}"))),
        };
        let state: LobbyState = serde_json::from_value(reply)
            .map_err(|e| ConnectionError::handshake(format!("invalid roster: {e}")))?;

        let LobbyState::Starting { others } = state;
        Ok(Self {
            identity,
            roster: OnceLock::from(others),
            channel,
        })
    }

    /// Member name.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Lobby identifier declared at handshake.
    pub fn lobby(&self) -> &str {
        &self.identity.lobby
    }

    /// Full identity, including extra metadata fields.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Names of the other members, once the lobby has started.
    pub fn others(&self) -> Option<&[String]> {
        self.roster.get().map(Vec::as_slice)
    }

    /// Returns true after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Sends one message and waits until it is flushed.
    ///
    /// Fails with a protocol error before writing anything if the message
    /// cannot be framed as a single line.
    pub async fn send_message<T: Serialize + ?Sized>(&self, message: &T) -> ConnectionResult<()> {
        self.channel.send(message).await
    }

    /// Waits for the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed its side.
    pub async fn read_message(&self) -> ConnectionResult<Option<Message>> {
        self.channel.read().await
    }

    /// Records and sends the starting roster. Only the server calls this.
    pub async fn send_starting_roster(&self, others: Vec<String>) -> ConnectionResult<()> {
        self.roster
            .set(others.clone())
            .map_err(|_| ConnectionError::RosterAlreadySent {
                name: self.name().to_string(),
            })?;
        self.channel.send(&LobbyState::starting(others)).await
    }

    /// Shuts the stream down. Further sends and reads fail with
    /// [`ConnectionError::Closed`], as does a second `close`.
    pub async fn close(&self) -> ConnectionResult<()> {
        self.channel.close().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.identity.name)
            .field("lobby", &self.identity.lobby)
            .field("others", &self.roster.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RawPeer, member};
    use serde_json::json;
    use tokio::io::duplex;

    #[tokio::test]
    async fn accept_handshake_reads_identity() {
        let (local, remote) = duplex(4096);
        let mut peer = RawPeer::new(remote);
        peer.write_line(r#"{"name":"alice","lobby":"t","colour":"red"}"#)
            .await;

        let conn = Connection::accept_handshake(local).await.unwrap();
        assert_eq!(conn.name(), "alice");
        assert_eq!(conn.lobby(), "t");
        assert_eq!(conn.identity().extra.get("colour"), Some(&json!("red")));
        assert!(conn.others().is_none());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn accept_handshake_rejects_bad_identity() {
        let lines = [
            "not json",
            r#"{"name":"alice"}"#,
            r#"{"name":"alice","lobby":7}"#,
            r#"["alice","t"]"#,
        ];
        for line in lines {
            let (local, remote) = duplex(4096);
            let mut peer = RawPeer::new(remote);
            peer.write_line(line).await;

            let result = Connection::accept_handshake(local).await;
            assert!(
                matches!(result, Err(ConnectionError::Handshake { .. })),
                "line {line:?} gave {result:?}"
            );
            // The rejected stream is released.
            assert_eq!(peer.read_line().await, None);
        }
    }

    #[tokio::test]
    async fn accept_handshake_fails_on_early_close() {
        let (local, remote) = duplex(4096);
        drop(remote);
        let result = Connection::accept_handshake(local).await;
        assert!(matches!(result, Err(ConnectionError::Handshake { .. })));
    }

    #[tokio::test]
    async fn initiate_handshake_waits_for_roster() {
        let (local, remote) = duplex(4096);
        let mut peer = RawPeer::new(remote);

        let client = tokio::spawn(Connection::initiate_handshake(
            local,
            Identity::new("bob", "t"),
        ));

        let identity: Identity = serde_json::from_str(&peer.read_line().await.unwrap()).unwrap();
        assert_eq!(identity, Identity::new("bob", "t"));
        assert!(!client.is_finished());

        peer.write_line(r#"{"state":"starting","others":["alice"]}"#)
            .await;
        let conn = client.await.unwrap().unwrap();
        assert_eq!(conn.others(), Some(&["alice".to_string()][..]));
    }

    #[tokio::test]
    async fn initiate_handshake_rejects_bad_roster() {
        let (local, remote) = duplex(4096);
        let mut peer = RawPeer::new(remote);
        let client = tokio::spawn(Connection::initiate_handshake(
            local,
            Identity::new("bob", "t"),
        ));
        peer.read_line().await;
        peer.write_line(r#"{"state":"finished"}"#).await;

        let result = client.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::Handshake { .. })));
    }

    #[tokio::test]
    async fn messages_round_trip() {
        let (conn, mut peer) = member("alice", "t").await;

        conn.send_message(&json!({"board": [["X", "_"]]})).await.unwrap();
        assert_eq!(
            peer.read_line().await.as_deref(),
            Some(r#"{"board":[["X","_"]]}"#)
        );

        peer.write_line("[1,2]").await;
        assert_eq!(conn.read_message().await.unwrap(), Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn read_returns_none_at_end_of_input() {
        let (conn, mut peer) = member("alice", "t").await;
        peer.write_raw(b"{\"partial\":").await;
        peer.shutdown().await;

        assert_eq!(conn.read_message().await.unwrap(), None);
        assert_eq!(conn.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_line_is_an_error() {
        let (conn, mut peer) = member("alice", "t").await;
        peer.write_line("{oops}").await;
        peer.write_line("true").await;

        let err = conn.read_message().await.unwrap_err();
        assert!(err.is_malformed());
        // The connection stays usable for the next line.
        assert_eq!(conn.read_message().await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn oversized_line_is_rejected() {
        let (local, remote) = duplex(MAX_LINE_LENGTH * 2 + 64);
        let mut peer = RawPeer::new(remote);
        peer.write_line(r#"{"name":"alice","lobby":"t"}"#).await;
        let conn = Connection::accept_handshake(local).await.unwrap();

        let huge = format!("\"{}\"", "a".repeat(MAX_LINE_LENGTH + 8));
        peer.write_line(&huge).await;

        peer.write_line("true").await;

        let result = conn.read_message().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Protocol(ProtocolError::MessageTooLarge { .. }))
        ));
        // The rest of the oversized line is dropped, not read as a message.
        assert_eq!(conn.read_message().await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn oversized_line_at_end_of_input() {
        let (local, remote) = duplex(MAX_LINE_LENGTH * 2 + 64);
        let mut peer = RawPeer::new(remote);
        peer.write_line(r#"{"name":"alice","lobby":"t"}"#).await;
        let conn = Connection::accept_handshake(local).await.unwrap();

        peer.write_raw("b".repeat(MAX_LINE_LENGTH + 100).as_bytes()).await;
        peer.shutdown().await;

        assert!(conn.read_message().await.is_err());
        assert_eq!(conn.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_payload_writes_nothing() {
        let (conn, mut peer) = member("alice", "t").await;

        let result = conn.send_message(&json!({"text": "two\nlines"})).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Protocol(ProtocolError::InvalidPayload { .. }))
        ));

        conn.close().await.unwrap();
        assert_eq!(peer.read_line().await, None);
    }

    #[tokio::test]
    async fn closed_connection_rejects_io() {
        let (conn, mut peer) = member("alice", "t").await;
        conn.close().await.unwrap();

        assert!(conn.is_closed());
        assert!(matches!(
            conn.send_message(&json!(1)).await,
            Err(ConnectionError::Closed)
        ));
        assert!(matches!(conn.read_message().await, Err(ConnectionError::Closed)));
        assert!(matches!(conn.close().await, Err(ConnectionError::Closed)));
        assert_eq!(peer.read_line().await, None);
    }

    #[tokio::test]
    async fn close_wakes_pending_read() {
        let (conn, _peer) = member("alice", "t").await;
        let conn = std::sync::Arc::new(conn);

        let reading = tokio::spawn({
            let conn = std::sync::Arc::clone(&conn);
            async move { conn.read_message().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!reading.is_finished());

        conn.close().await.unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_millis(500), reading)
            .await
            .expect("read still blocked after close")
            .unwrap();
        assert_eq!(result.unwrap(), None);
        assert!(matches!(conn.read_message().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn concurrent_sends_do_not_interleave() {
        let (conn, mut peer) = member("alice", "t").await;
        let filler = "x".repeat(2000);

        let conn = &conn;
        let sends = (0..16).map(|i| {
            let message = json!({"i": i, "filler": filler});
            async move { conn.send_message(&message).await }
        });
        let reader = async {
            let mut seen = Vec::new();
            for _ in 0..16 {
                let line = peer.read_line().await.unwrap();
                let value: Message = serde_json::from_str(&line).unwrap();
                assert_eq!(value["filler"], json!(filler));
                seen.push(value["i"].as_u64().unwrap());
            }
            seen
        };

        let (results, mut seen) = tokio::join!(futures_util::future::join_all(sends), reader);
        assert!(results.iter().all(Result::is_ok));
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn roster_is_sent_once() {
        let (conn, mut peer) = member("alice", "t").await;

        conn.send_starting_roster(vec!["bob".into()]).await.unwrap();
        assert_eq!(conn.others(), Some(&["bob".to_string()][..]));
        let line = peer.read_line().await.unwrap();
        let state: LobbyState = serde_json::from_str(&line).unwrap();
        assert_eq!(state, LobbyState::starting(vec!["bob".into()]));

        let again = conn.send_starting_roster(vec!["carol".into()]).await;
        assert!(matches!(again, Err(ConnectionError::RosterAlreadySent { .. })));
        assert_eq!(conn.others(), Some(&["bob".to_string()][..]));
    }
}

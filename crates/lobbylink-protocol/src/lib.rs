//! Line framing and handshake message types for lobbylink.
//!
//! # Protocol Overview
//!
//! Every message is one line of compact JSON terminated by `\n`:
//!
//! ```text
//! client -> server   {"name":"alice","lobby":"t"}
//! server -> client   {"state":"starting","others":["bob"]}
//! either direction   <application-defined JSON>
//! ```
//!
//! There is no length prefix or version field; a peer only needs to agree on
//! the two handshake shapes above.
//!
//! # Example
//!
//! ```rust
//! use lobbylink_protocol::{Identity, decode_message, encode_message};
//!
//! let bytes = encode_message(&Identity::new("alice", "t")).unwrap();
//! assert_eq!(bytes.last(), Some(&b'\n'));
//! let decoded: Identity = decode_message(&bytes).unwrap();
//! assert_eq!(decoded.name, "alice");
//! ```

mod error;
mod framing;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{decode_message, encode_message, strip_terminator};
pub use types::{Identity, LobbyState, Message};

/// Default TCP port of a lobby server.
pub const DEFAULT_PORT: u16 = 42042;

/// Byte that ends every frame.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Longest accepted line, terminator excluded (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

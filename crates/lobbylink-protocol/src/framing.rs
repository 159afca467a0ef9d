//! Newline-delimited JSON framing.
//!
//! A frame is the compact JSON text of one value followed by a single
//! terminator byte:
//!
//! ```text
//! +---------------------------+----+
//! |  compact JSON (no '\n')   | \n |
//! +---------------------------+----+
//! ```
//!
//! Strings carrying a raw line terminator are refused at encode time, so a
//! frame never depends on the JSON escaper to stay on one line.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::LINE_TERMINATOR;
use crate::error::{ProtocolError, ProtocolResult};

/// Encodes a message into one terminated line.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidPayload`] if any string (key or value)
/// contains a line terminator, and [`ProtocolError::Serialization`] if the
/// value has no JSON representation.
///
/// # Example
///
/// ```rust
/// use lobbylink_protocol::encode_message;
/// use serde_json::json;
///
/// let bytes = encode_message(&json!({"move": [1, 2]})).unwrap();
/// assert_eq!(bytes, b"{\"move\":[1,2]}\n");
/// ```
pub fn encode_message<T: Serialize + ?Sized>(message: &T) -> ProtocolResult<Vec<u8>> {
    let value = serde_json::to_value(message).map_err(ProtocolError::Serialization)?;
    ensure_single_line(&value)?;

    let mut buffer = serde_json::to_vec(&value).map_err(ProtocolError::Serialization)?;
    if buffer.contains(&LINE_TERMINATOR) {
        return Err(ProtocolError::invalid_payload(
            "encoded form contains a line terminator",
        ));
    }
    buffer.push(LINE_TERMINATOR);
    Ok(buffer)
}

/// Decodes one line into a message.
///
/// The terminator may already be stripped; a trailing `\n` is tolerated.
///
/// # Example
///
/// ```rust
/// use lobbylink_protocol::{Message, decode_message};
///
/// let message: Message = decode_message(b"[1,\"x\",null]").unwrap();
/// assert_eq!(message, serde_json::json!([1, "x", null]));
/// ```
pub fn decode_message<T: DeserializeOwned>(line: &[u8]) -> ProtocolResult<T> {
    serde_json::from_slice(strip_terminator(line)).map_err(ProtocolError::MalformedMessage)
}

/// Returns `line` without its trailing terminator (and a preceding `\r`).
pub fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(&[LINE_TERMINATOR]).unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn ensure_single_line(value: &Value) -> ProtocolResult<()> {
    match value {
        Value::String(s) => check_text(s),
        Value::Array(items) => items.iter().try_for_each(ensure_single_line),
        Value::Object(map) => map.iter().try_for_each(|(key, item)| {
            check_text(key)?;
            ensure_single_line(item)
        }),
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

fn check_text(text: &str) -> ProtocolResult<()> {
    if text.as_bytes().contains(&LINE_TERMINATOR) {
        return Err(ProtocolError::invalid_payload(format!(
            "string {text:?} contains a line terminator"
        )));
    }
    Ok(())
}

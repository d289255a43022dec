//! Codec for encoding and decoding banter wire messages.
//!
//! Messages travel as JSON text frames over the WebSocket. Several
//! already-encoded messages may be coalesced into one transport frame,
//! separated by newlines; JSON encoding never contains a raw newline, so
//! the separator is unambiguous.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::message::WireMessage;

/// Maximum encoded message size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Separator between coalesced messages in a single frame.
pub const FRAME_SEPARATOR: u8 = b'\n';

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a message to JSON bytes.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &WireMessage) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode a single message from JSON bytes.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid message.
pub fn decode(data: &[u8]) -> Result<WireMessage, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Coalesce several encoded messages into one newline-separated frame.
///
/// Used by the connection writer to batch queued messages into a single
/// transport frame before flushing.
#[must_use]
pub fn coalesce(frames: &[Bytes]) -> Bytes {
    let total: usize = frames.iter().map(Bytes::len).sum::<usize>() + frames.len().saturating_sub(1);
    let mut buf = BytesMut::with_capacity(total);

    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            buf.put_u8(FRAME_SEPARATOR);
        }
        buf.extend_from_slice(frame);
    }

    buf.freeze()
}

/// Decode a frame that may contain several newline-separated messages.
///
/// Empty segments are skipped.
///
/// # Errors
///
/// Returns an error on the first segment that fails to decode.
pub fn decode_lines(data: &[u8]) -> Result<Vec<WireMessage>, ProtocolError> {
    data.split(|&b| b == FRAME_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(decode)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let messages = vec![
            WireMessage::chat(7, 42, "alice", "hello"),
            WireMessage::join(7, 42, "alice"),
            WireMessage::leave(7, 42, "alice"),
        ];

        for message in messages {
            let encoded = encode(&message).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(message, decoded);
        }
    }

    #[test]
    fn test_message_too_large() {
        let message = WireMessage::chat(1, 1, "bob", "x".repeat(MAX_MESSAGE_SIZE + 1));

        match encode(&message) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid() {
        assert!(matches!(
            decode(b"not json"),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_coalesce_and_split() {
        let first = encode(&WireMessage::chat(1, 1, "bob", "one")).unwrap();
        let second = encode(&WireMessage::chat(1, 1, "bob", "two")).unwrap();
        let third = encode(&WireMessage::join(1, 2, "eve")).unwrap();

        let frame = coalesce(&[first, second, third]);
        let decoded = decode_lines(&frame).unwrap();

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].content, "one");
        assert_eq!(decoded[1].content, "two");
        assert_eq!(decoded[2].content, "eve joined the room");
    }

    #[test]
    fn test_coalesce_single() {
        let only = encode(&WireMessage::chat(1, 1, "bob", "solo")).unwrap();
        let frame = coalesce(std::slice::from_ref(&only));
        assert_eq!(frame, only);
    }

    #[test]
    fn test_decode_lines_skips_empty_segments() {
        let encoded = encode(&WireMessage::chat(1, 1, "bob", "hi")).unwrap();
        let mut data = encoded.to_vec();
        data.push(FRAME_SEPARATOR);

        let decoded = decode_lines(&data).unwrap();
        assert_eq!(decoded.len(), 1);
    }
}

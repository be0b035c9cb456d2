//! Codec for encoding and decoding Parley frames.
//!
//! Frames travel as individual WebSocket text messages, so framing is
//! delegated to the transport and the codec only handles JSON
//! serialization plus a size ceiling.

use thiserror::Error;

use crate::frames::{ClientFrame, ServerFrame};

/// Maximum encoded frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(serde_json::Error),
}

/// Encode a server frame for delivery to a client.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode(frame: &ServerFrame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a client frame received from the wire.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid frame.
pub fn decode(text: &str) -> Result<ClientFrame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Encode a client frame. Used by client implementations and tests.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode_client(frame: &ClientFrame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a server frame. Used by client implementations and tests.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid frame.
pub fn decode_server(text: &str) -> Result<ServerFrame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{MessagePayload, PresencePayload, SenderPayload};

    #[test]
    fn test_client_roundtrip() {
        let frames = vec![
            ClientFrame::join_room("chat-1"),
            ClientFrame::send_message("chat-1", "Hello, world!"),
            ClientFrame::typing("chat-1"),
            ClientFrame::stop_typing("chat-1"),
            ClientFrame::message_seen("chat-1", "msg-9"),
        ];

        for frame in frames {
            let encoded = encode_client(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_server_roundtrip() {
        let frames = vec![
            ServerFrame::ReceiveMessage(MessagePayload {
                id: "m1".to_string(),
                chat: "c1".to_string(),
                sender: SenderPayload {
                    id: "u1".to_string(),
                    name: "Alice".to_string(),
                    avatar: "a.png".to_string(),
                },
                content: "hi".to_string(),
                is_read: false,
                read_at: None,
                created_at: 42,
            }),
            ServerFrame::UserOffline(PresencePayload {
                user_id: "u1".to_string(),
                is_online: false,
                last_seen: 42,
            }),
            ServerFrame::typing("c1", "u1", "Alice"),
            ServerFrame::stop_typing("c1", "u1"),
            ServerFrame::messages_flushed("c1", "u2"),
            ServerFrame::error("Chat not found"),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode_server(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode("not json"),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(
            decode(r#"{"event":"no_such_event","data":{}}"#),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let frame = ClientFrame::send_message("c1", "x".repeat(MAX_FRAME_SIZE + 1));
        match encode_client(&frame) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }

        let oversized = format!(
            r#"{{"event":"typing","data":{{"chatId":"{}"}}}}"#,
            "c".repeat(MAX_FRAME_SIZE)
        );
        match decode(&oversized) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }
}

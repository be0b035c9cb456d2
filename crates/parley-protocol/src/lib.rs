//! # parley-protocol
//!
//! Wire protocol definitions for the Parley direct-messaging engine.
//!
//! This crate defines the JSON event protocol spoken between Parley clients
//! and servers over a persistent WebSocket connection. Every event is a
//! single text frame of the form `{"event": "<name>", "data": {...}}`.
//!
//! ## Event Types
//!
//! - `join_room` / `send_message` / `typing` / `stop_typing` / `message_seen`
//!   flow client → server
//! - `receive_message` / `user_online` / `user_offline` / `typing` /
//!   `stop_typing` / `message_seen` / `error` flow server → client
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ClientFrame};
//!
//! // A client asks to open a chat
//! let frame = ClientFrame::join_room("chat-42");
//! let text = codec::encode_client(&frame).unwrap();
//!
//! // The server decodes it
//! let decoded = codec::decode(&text).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ClientFrame, MessagePayload, PresencePayload, SenderPayload, ServerFrame};

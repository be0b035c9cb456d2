//! Frame types for the Parley protocol.
//!
//! Frames are the unit of communication between clients and the server.
//! Each frame serializes to a JSON envelope with an `event` tag and a
//! `data` payload, so the wire format stays readable and debuggable.

use serde::{Deserialize, Serialize};

/// A denormalized sender block attached to every delivered message,
/// so clients can render without a follow-up profile lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderPayload {
    /// Sender user id.
    pub id: String,
    /// Display name at send time.
    pub name: String,
    /// Avatar reference, empty if the user has none.
    pub avatar: String,
}

/// A fully hydrated message as delivered to room subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Message id.
    pub id: String,
    /// Chat the message belongs to.
    pub chat: String,
    /// Denormalized sender summary.
    pub sender: SenderPayload,
    /// Message text.
    pub content: String,
    /// Whether the recipient has read the message.
    pub is_read: bool,
    /// When the first read transition happened, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<u64>,
    /// Server-assigned creation timestamp (Unix milliseconds).
    pub created_at: u64,
}

/// A presence transition for a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    /// The user whose presence changed.
    pub user_id: String,
    /// New online state.
    pub is_online: bool,
    /// Last-seen timestamp (Unix milliseconds).
    pub last_seen: u64,
}

/// Events a client may send to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Subscribe this connection to a chat's room.
    JoinRoom {
        /// Target chat id.
        chat_id: String,
    },

    /// Send a text message into a chat.
    SendMessage {
        /// Target chat id.
        chat_id: String,
        /// Message text.
        content: String,
    },

    /// Signal that the user started typing in a chat.
    Typing {
        /// Target chat id.
        chat_id: String,
    },

    /// Signal that the user stopped typing in a chat.
    StopTyping {
        /// Target chat id.
        chat_id: String,
    },

    /// Mark a single message as read.
    MessageSeen {
        /// Chat the message belongs to.
        chat_id: String,
        /// The message being read.
        message_id: String,
    },
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// A new message for a room this connection is subscribed to.
    ReceiveMessage(MessagePayload),

    /// A user in one of the receiver's chats came online.
    UserOnline(PresencePayload),

    /// A user in one of the receiver's chats went offline.
    UserOffline(PresencePayload),

    /// Another participant started typing.
    Typing {
        /// Chat where typing happens.
        chat_id: String,
        /// The typing user.
        user_id: String,
        /// Display name of the typing user.
        user_name: String,
    },

    /// Another participant stopped typing.
    StopTyping {
        /// Chat where typing stopped.
        chat_id: String,
        /// The user who stopped.
        user_id: String,
    },

    /// Read-receipt announcement. `message_id` is present for a single
    /// read transition and absent for a join-time batch flush.
    MessageSeen {
        /// Chat the receipt belongs to.
        chat_id: String,
        /// The reader.
        user_id: String,
        /// The read message, when announcing a single transition.
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// An operation on this connection failed.
    Error {
        /// Human-readable description, safe to show to the user.
        message: String,
    },
}

impl ClientFrame {
    /// Event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientFrame::JoinRoom { .. } => "join_room",
            ClientFrame::SendMessage { .. } => "send_message",
            ClientFrame::Typing { .. } => "typing",
            ClientFrame::StopTyping { .. } => "stop_typing",
            ClientFrame::MessageSeen { .. } => "message_seen",
        }
    }

    /// Create a new `join_room` frame.
    #[must_use]
    pub fn join_room(chat_id: impl Into<String>) -> Self {
        ClientFrame::JoinRoom {
            chat_id: chat_id.into(),
        }
    }

    /// Create a new `send_message` frame.
    #[must_use]
    pub fn send_message(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        ClientFrame::SendMessage {
            chat_id: chat_id.into(),
            content: content.into(),
        }
    }

    /// Create a new `typing` frame.
    #[must_use]
    pub fn typing(chat_id: impl Into<String>) -> Self {
        ClientFrame::Typing {
            chat_id: chat_id.into(),
        }
    }

    /// Create a new `stop_typing` frame.
    #[must_use]
    pub fn stop_typing(chat_id: impl Into<String>) -> Self {
        ClientFrame::StopTyping {
            chat_id: chat_id.into(),
        }
    }

    /// Create a new `message_seen` frame.
    #[must_use]
    pub fn message_seen(chat_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        ClientFrame::MessageSeen {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl ServerFrame {
    /// Event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerFrame::ReceiveMessage(_) => "receive_message",
            ServerFrame::UserOnline(_) => "user_online",
            ServerFrame::UserOffline(_) => "user_offline",
            ServerFrame::Typing { .. } => "typing",
            ServerFrame::StopTyping { .. } => "stop_typing",
            ServerFrame::MessageSeen { .. } => "message_seen",
            ServerFrame::Error { .. } => "error",
        }
    }

    /// Create a new `error` frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    /// Create a new `typing` frame.
    #[must_use]
    pub fn typing(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        ServerFrame::Typing {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }

    /// Create a new `stop_typing` frame.
    #[must_use]
    pub fn stop_typing(chat_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        ServerFrame::StopTyping {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Create a `message_seen` announcement for a single read transition.
    #[must_use]
    pub fn message_seen(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        ServerFrame::MessageSeen {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            message_id: Some(message_id.into()),
        }
    }

    /// Create a `message_seen` announcement for a join-time batch flush.
    #[must_use]
    pub fn messages_flushed(chat_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        ServerFrame::MessageSeen {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            message_id: None,
        }
    }
}

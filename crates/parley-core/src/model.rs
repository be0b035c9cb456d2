//! Domain records for Parley.
//!
//! These are the shapes the durable store persists and the engine
//! hydrates for delivery. Identifiers are opaque strings; generated ids
//! are UUIDv4. Timestamps are Unix milliseconds.

use parley_protocol::{MessagePayload, SenderPayload};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A user identifier.
pub type UserId = String;

/// A chat identifier.
pub type ChatId = String;

/// A message identifier.
pub type MessageId = String;

/// Current time as Unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Generate a fresh record identifier.
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// A registered user.
///
/// Identity fields are owned by the external profile collaborator;
/// only the presence fields are mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Account email.
    pub email: String,
    /// Avatar reference, empty if none.
    pub avatar: String,
    /// Whether the user currently has a live connection.
    pub is_online: bool,
    /// Last presence transition timestamp.
    pub last_seen: u64,
}

impl User {
    /// The denormalized sender block attached to delivered messages.
    #[must_use]
    pub fn summary(&self) -> SenderPayload {
        SenderPayload {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// A two-party chat.
///
/// The participant pair is immutable after creation and normalized so
/// that exactly one chat exists per unordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Chat id.
    pub id: ChatId,
    /// Exactly two distinct participants, sorted.
    pub participants: [UserId; 2],
    /// The most recently persisted message, if any.
    pub last_message: Option<MessageId>,
    /// Creation timestamp of the most recent message; never decreases.
    pub last_message_at: u64,
    /// When the chat was created.
    pub created_at: u64,
}

impl Chat {
    /// Check whether a user belongs to this chat.
    #[must_use]
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The other participant, if `user_id` is one of the pair.
    #[must_use]
    pub fn peer_of(&self, user_id: &str) -> Option<&UserId> {
        if !self.has_participant(user_id) {
            return None;
        }
        self.participants.iter().find(|p| *p != user_id)
    }
}

/// A persisted message.
///
/// Immutable except for the read transition, which flips `is_read`
/// exactly once and stamps `read_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// Chat this message belongs to.
    pub chat: ChatId,
    /// Sending participant.
    pub sender: UserId,
    /// Message text, non-empty after trimming.
    pub content: String,
    /// Read flag; transitions false → true, never back.
    pub is_read: bool,
    /// Timestamp of the first read transition.
    pub read_at: Option<u64>,
    /// Pipeline-assigned creation timestamp, strictly ordered per chat.
    pub created_at: u64,
}

impl Message {
    /// Hydrate this message with its sender summary for delivery.
    #[must_use]
    pub fn hydrate(&self, sender: &User) -> MessagePayload {
        MessagePayload {
            id: self.id.clone(),
            chat: self.chat.clone(),
            sender: sender.summary(),
            content: self.content.clone(),
            is_read: self.is_read,
            read_at: self.read_at,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{name}@example.com"),
            avatar: String::new(),
            is_online: false,
            last_seen: 0,
        }
    }

    #[test]
    fn test_chat_participants() {
        let chat = Chat {
            id: "c1".to_string(),
            participants: ["alice".to_string(), "bob".to_string()],
            last_message: None,
            last_message_at: 0,
            created_at: 0,
        };

        assert!(chat.has_participant("alice"));
        assert!(!chat.has_participant("carol"));
        assert_eq!(chat.peer_of("alice"), Some(&"bob".to_string()));
        assert_eq!(chat.peer_of("carol"), None);
    }

    #[test]
    fn test_message_hydration() {
        let alice = user("u1", "Alice");
        let message = Message {
            id: "m1".to_string(),
            chat: "c1".to_string(),
            sender: "u1".to_string(),
            content: "hello".to_string(),
            is_read: false,
            read_at: None,
            created_at: 7,
        };

        let payload = message.hydrate(&alice);
        assert_eq!(payload.sender.name, "Alice");
        assert_eq!(payload.content, "hello");
        assert!(!payload.is_read);
    }

    #[test]
    fn test_generated_ids_unique() {
        assert_ne!(generate_id(), generate_id());
    }
}

//! In-memory store implementation.
//!
//! Reference [`Store`] backend used by the server binary and the test
//! suite. All state lives in process memory; a restart loses it, which
//! matches the ephemeral-session model (presence is reconciled at
//! reconnect time).

use crate::model::{generate_id, now_millis, Chat, ChatId, Message, MessageId, User, UserId};
use crate::store::{Store, StoreError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// DashMap-backed store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<UserId, User>,
    chats: DashMap<ChatId, Chat>,
    /// Normalized participant pair → chat id.
    pair_index: DashMap<(UserId, UserId), ChatId>,
    messages: DashMap<MessageId, Message>,
    /// Insertion-ordered message ids per chat.
    by_chat: DashMap<ChatId, Vec<MessageId>>,
}

fn pair_key(a: &str, b: &str) -> (UserId, UserId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user record.
    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// Messages of a chat in insertion order. Test and debug helper.
    #[must_use]
    pub fn messages_in_chat(&self, chat_id: &str) -> Vec<Message> {
        self.by_chat
            .get(chat_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<User, StoreError> {
        self.users
            .get(user_id)
            .map(|u| u.clone())
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))
    }

    async fn set_presence(
        &self,
        user_id: &str,
        is_online: bool,
        at: u64,
    ) -> Result<User, StoreError> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))?;

        user.is_online = is_online;
        user.last_seen = at;
        Ok(user.clone())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Chat, StoreError> {
        self.chats
            .get(chat_id)
            .map(|c| c.clone())
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))
    }

    async fn get_or_create_chat(&self, a: &str, b: &str) -> Result<Chat, StoreError> {
        if a == b {
            return Err(StoreError::InvalidParticipants);
        }
        if !self.users.contains_key(a) {
            return Err(StoreError::UserNotFound(a.to_string()));
        }
        if !self.users.contains_key(b) {
            return Err(StoreError::UserNotFound(b.to_string()));
        }

        let key = pair_key(a, b);

        // The pair-index entry serializes concurrent first contact.
        match self.pair_index.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let chat_id = entry.get().clone();
                self.chats
                    .get(&chat_id)
                    .map(|c| c.clone())
                    .ok_or(StoreError::ChatNotFound(chat_id))
            }
            Entry::Vacant(entry) => {
                let now = now_millis();
                let chat = Chat {
                    id: generate_id(),
                    participants: [key.0, key.1],
                    last_message: None,
                    last_message_at: now,
                    created_at: now,
                };
                debug!(chat = %chat.id, "Created chat");
                entry.insert(chat.id.clone());
                self.chats.insert(chat.id.clone(), chat.clone());
                Ok(chat)
            }
        }
    }

    async fn chats_with(&self, user_id: &str) -> Result<Vec<Chat>, StoreError> {
        Ok(self
            .chats
            .iter()
            .filter(|c| c.has_participant(user_id))
            .map(|c| c.clone())
            .collect())
    }

    async fn insert_message(&self, message: Message) -> Result<(), StoreError> {
        self.by_chat
            .entry(message.chat.clone())
            .or_default()
            .push(message.id.clone());
        self.messages.insert(message.id.clone(), message);
        Ok(())
    }

    async fn set_last_message(
        &self,
        chat_id: &str,
        message_id: &str,
        at: u64,
    ) -> Result<(), StoreError> {
        let mut chat = self
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;

        chat.last_message = Some(message_id.to_string());
        chat.last_message_at = at;
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Message, StoreError> {
        self.messages
            .get(message_id)
            .map(|m| m.clone())
            .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))
    }

    async fn mark_read(&self, message_id: &str, at: u64) -> Result<Message, StoreError> {
        let mut message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;

        // First write wins; later calls keep the original read_at.
        if !message.is_read {
            message.is_read = true;
            message.read_at = Some(at);
        }
        Ok(message.clone())
    }

    async fn flush_unread(
        &self,
        chat_id: &str,
        reader_id: &str,
        at: u64,
    ) -> Result<Vec<MessageId>, StoreError> {
        let ids: Vec<MessageId> = self
            .by_chat
            .get(chat_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        let mut flushed = Vec::new();
        for id in ids {
            if let Some(mut message) = self.messages.get_mut(&id) {
                if message.sender != reader_id && !message.is_read {
                    message.is_read = true;
                    message.read_at = Some(at);
                    flushed.push(id);
                }
            }
        }

        if !flushed.is_empty() {
            debug!(chat = %chat_id, reader = %reader_id, count = flushed.len(), "Flushed unread messages");
        }

        Ok(flushed)
    }
}

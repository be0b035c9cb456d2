//! Room membership bookkeeping for Parley.
//!
//! The router owns the chat → room table and the per-connection
//! subscription sets. It only does bookkeeping and fan-out; chat
//! membership authorization happens in the engine before any
//! subscription is made.

use crate::model::ChatId;
use crate::registry::ConnectionId;
use crate::room::{Room, RoomEvent};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Not subscribed to the room.
    #[error("Not subscribed to chat: {0}")]
    NotSubscribed(ChatId),

    /// Already subscribed to the room.
    #[error("Already subscribed to chat: {0}")]
    AlreadySubscribed(ChatId),

    /// Maximum subscriptions reached for this connection.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Maximum room count reached.
    #[error("Maximum room count reached")]
    MaxRoomsReached,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of live rooms.
    pub max_rooms: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
    /// Room broadcast channel capacity.
    pub room_capacity: usize,
    /// Whether to drop rooms once their last subscriber leaves.
    pub auto_delete_empty_rooms: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_subscriptions_per_connection: 100,
            room_capacity: 1024,
            auto_delete_empty_rooms: true,
        }
    }
}

/// The room-subscription table.
pub struct RoomRouter {
    /// Rooms indexed by chat id.
    rooms: DashMap<ChatId, Room>,
    /// Connection subscriptions (connection → set of chat ids).
    subscriptions: DashMap<ConnectionId, dashmap::DashSet<ChatId>>,
    /// Configuration.
    config: RouterConfig,
}

impl RoomRouter {
    /// Create a router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            subscriptions: DashMap::new(),
            config,
        }
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            room_count: self.rooms.len(),
            connection_count: self.subscriptions.len(),
            total_subscriptions: self.subscriptions.iter().map(|s| s.len()).sum(),
        }
    }

    /// Subscribe a connection to a chat's room.
    ///
    /// Returns a receiver for events published to the room.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is already subscribed or a
    /// limit is exceeded.
    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
        chat_id: &str,
    ) -> Result<broadcast::Receiver<RoomEvent>, RouterError> {
        let conn_subs = self
            .subscriptions
            .entry(connection_id.clone())
            .or_default();

        if conn_subs.len() >= self.config.max_subscriptions_per_connection {
            return Err(RouterError::MaxSubscriptionsReached);
        }

        if conn_subs.contains(chat_id) {
            return Err(RouterError::AlreadySubscribed(chat_id.to_string()));
        }

        if !self.rooms.contains_key(chat_id) && self.rooms.len() >= self.config.max_rooms {
            return Err(RouterError::MaxRoomsReached);
        }

        let mut room = self.rooms.entry(chat_id.to_string()).or_insert_with(|| {
            debug!(chat = %chat_id, "Creating room");
            Room::with_capacity(chat_id, self.config.room_capacity)
        });

        let receiver = room.subscribe(connection_id.clone());
        conn_subs.insert(chat_id.to_string());

        debug!(
            chat = %chat_id,
            connection = %connection_id,
            subscribers = room.subscriber_count(),
            "Subscribed"
        );

        Ok(receiver)
    }

    /// Unsubscribe a connection from a chat's room.
    ///
    /// # Errors
    ///
    /// Returns an error if not subscribed.
    pub fn unsubscribe(
        &self,
        connection_id: &ConnectionId,
        chat_id: &str,
    ) -> Result<(), RouterError> {
        let subscribed = self
            .subscriptions
            .get(connection_id)
            .map(|subs| subs.remove(chat_id).is_some())
            .unwrap_or(false);
        if !subscribed {
            return Err(RouterError::NotSubscribed(chat_id.to_string()));
        }

        if let Some(mut room) = self.rooms.get_mut(chat_id) {
            room.unsubscribe(connection_id);

            if self.config.auto_delete_empty_rooms && room.is_empty() {
                drop(room); // Release the lock
                self.rooms.remove(chat_id);
                debug!(chat = %chat_id, "Deleted empty room");
            }
        }

        Ok(())
    }

    /// Unsubscribe a connection from every room it joined.
    pub fn unsubscribe_all(&self, connection_id: &ConnectionId) {
        if let Some((_, chats)) = self.subscriptions.remove(connection_id) {
            for chat_id in chats.iter() {
                if let Some(mut room) = self.rooms.get_mut(chat_id.as_str()) {
                    room.unsubscribe(connection_id);

                    if self.config.auto_delete_empty_rooms && room.is_empty() {
                        let id = chat_id.clone();
                        drop(room);
                        self.rooms.remove(&id);
                    }
                }
            }
        }

        debug!(connection = %connection_id, "Unsubscribed from all rooms");
    }

    /// Publish an event to a chat's room.
    ///
    /// Returns the number of receivers it reached.
    pub fn publish(&self, chat_id: &str, event: RoomEvent) -> usize {
        if let Some(room) = self.rooms.get(chat_id) {
            let count = room.publish(event);
            trace!(chat = %chat_id, recipients = count, "Published room event");
            count
        } else {
            warn!(chat = %chat_id, "Publish to room with no subscribers");
            0
        }
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, chat_id: &str) -> bool {
        self.rooms.contains_key(chat_id)
    }

    /// Subscriber count for a chat's room.
    #[must_use]
    pub fn subscriber_count(&self, chat_id: &str) -> usize {
        self.rooms
            .get(chat_id)
            .map(|r| r.subscriber_count())
            .unwrap_or(0)
    }

    /// Whether a connection is subscribed to a chat's room.
    #[must_use]
    pub fn is_subscribed(&self, connection_id: &ConnectionId, chat_id: &str) -> bool {
        self.subscriptions
            .get(connection_id)
            .map(|subs| subs.contains(chat_id))
            .unwrap_or(false)
    }

    /// The chats a connection is subscribed to.
    #[must_use]
    pub fn connection_chats(&self, connection_id: &ConnectionId) -> Vec<ChatId> {
        self.subscriptions
            .get(connection_id)
            .map(|subs| subs.iter().map(|c| c.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of connections with at least one subscription.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}

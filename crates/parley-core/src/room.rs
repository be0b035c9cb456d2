//! Room abstraction for Parley.
//!
//! A room is the broadcast group of connections currently subscribed to
//! one chat. Fan-out uses a tokio broadcast channel; each subscriber's
//! forwarder applies the event's delivery filter before queueing it for
//! the connection.

use crate::model::ChatId;
use crate::registry::ConnectionId;
use parley_protocol::ServerFrame;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default broadcast channel capacity.
const DEFAULT_ROOM_CAPACITY: usize = 1024;

/// An event published into a room.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// Connection that produced the event, if any.
    pub source: Option<ConnectionId>,
    /// Skip delivery back to `source` (typing relays).
    pub exclude_source: bool,
    /// The frame to deliver, shared across all subscribers.
    pub frame: Arc<ServerFrame>,
}

impl RoomEvent {
    /// An event for every subscriber, the source included.
    #[must_use]
    pub fn to_all(frame: Arc<ServerFrame>) -> Self {
        Self {
            source: None,
            exclude_source: false,
            frame,
        }
    }

    /// An event for every subscriber except the originating connection.
    #[must_use]
    pub fn excluding(source: ConnectionId, frame: Arc<ServerFrame>) -> Self {
        Self {
            source: Some(source),
            exclude_source: true,
            frame,
        }
    }

    /// Whether this event should be delivered to `connection_id`.
    #[must_use]
    pub fn should_deliver(&self, connection_id: &ConnectionId) -> bool {
        !(self.exclude_source && self.source.as_ref() == Some(connection_id))
    }
}

/// A chat-scoped broadcast group.
#[derive(Debug)]
pub struct Room {
    /// The chat this room fans out for.
    chat_id: ChatId,
    /// Broadcast sender for this room.
    sender: broadcast::Sender<RoomEvent>,
    /// Set of subscribed connection IDs.
    subscribers: HashSet<ConnectionId>,
}

impl Room {
    /// Create a new room.
    #[must_use]
    pub fn new(chat_id: impl Into<ChatId>) -> Self {
        Self::with_capacity(chat_id, DEFAULT_ROOM_CAPACITY)
    }

    /// Create a new room with a specific channel capacity.
    #[must_use]
    pub fn with_capacity(chat_id: impl Into<ChatId>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            chat_id: chat_id.into(),
            sender,
            subscribers: HashSet::new(),
        }
    }

    /// The chat this room belongs to.
    #[must_use]
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Number of subscribed connections.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a connection is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, connection_id: &ConnectionId) -> bool {
        self.subscribers.contains(connection_id)
    }

    /// Subscribe a connection, returning a receiver for room events.
    pub fn subscribe(&mut self, connection_id: ConnectionId) -> broadcast::Receiver<RoomEvent> {
        debug!(chat = %self.chat_id, connection = %connection_id, "Connection subscribed");
        self.subscribers.insert(connection_id);
        self.sender.subscribe()
    }

    /// Unsubscribe a connection.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.subscribers.remove(connection_id);
        if removed {
            debug!(chat = %self.chat_id, connection = %connection_id, "Connection unsubscribed");
        }
        removed
    }

    /// Publish an event to this room.
    ///
    /// Returns the number of receivers the event reached before
    /// per-connection filtering.
    pub fn publish(&self, event: RoomEvent) -> usize {
        trace!(chat = %self.chat_id, event = %event.frame.name(), "Publishing room event");
        self.sender.send(event).unwrap_or_default()
    }

    /// Check if the room has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

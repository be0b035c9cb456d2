//! The Parley engine.
//!
//! The engine is the single entry point for every operation a live
//! connection can perform: connect/disconnect, room join, message send,
//! typing relay, and read receipts. It validates and authorizes against
//! the durable store, persists, and fans out through the room router
//! and the connection registry.
//!
//! One connection's failure never crosses to another: every operation
//! returns an error scoped to the calling connection, and storage
//! failures surface only after the retry budget is spent.

use crate::model::{now_millis, Message, MessageId, User};
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::room::RoomEvent;
use crate::router::{RoomRouter, RouterConfig, RouterError};
use crate::sequence::ChatSequencer;
use crate::store::{with_retry, RetryPolicy, Store, StoreError};
use crate::typing::TypingGate;
use parley_protocol::{MessagePayload, ServerFrame};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Engine errors, delivered to the originating connection only.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or empty input; nothing was persisted or broadcast.
    #[error("{0}")]
    Validation(String),

    /// The caller is not a participant of the chat.
    #[error("{0}")]
    Authorization(String),

    /// The referenced chat or message does not exist (or is hidden
    /// from the caller).
    #[error("{0}")]
    NotFound(String),

    /// A persistence call failed after the retry budget was spent.
    #[error("Storage failure")]
    Storage(#[source] StoreError),
}

impl EngineError {
    /// The message delivered to the client. Storage internals are never
    /// leaked.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            EngineError::Validation(m)
            | EngineError::Authorization(m)
            | EngineError::NotFound(m) => m.clone(),
            EngineError::Storage(_) => "Temporary server error, please try again".to_string(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserNotFound(_) => EngineError::NotFound("User not found".to_string()),
            StoreError::ChatNotFound(_) => EngineError::NotFound("Chat not found".to_string()),
            StoreError::MessageNotFound(_) => {
                EngineError::NotFound("Message not found".to_string())
            }
            StoreError::InvalidParticipants => {
                EngineError::Validation("Chat participants must be two distinct users".to_string())
            }
            err @ StoreError::Unavailable(_) => EngineError::Storage(err),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Room router limits.
    pub router: RouterConfig,
    /// Minimum interval between typing relays per (user, chat).
    pub typing_min_interval_ms: u64,
    /// Maximum message content length after trimming.
    pub max_content_length: usize,
    /// Retry budget for store calls.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            typing_min_interval_ms: 1_000,
            max_content_length: 4_096,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a successful room join.
pub struct JoinOutcome {
    /// Receiver for the room's events. `None` when the connection was
    /// already subscribed (re-joins are idempotent).
    pub receiver: Option<broadcast::Receiver<RoomEvent>>,
    /// Messages the catch-up flush transitioned to read.
    pub flushed: Vec<MessageId>,
}

/// The realtime session and fan-out engine.
pub struct Engine {
    store: Arc<dyn Store>,
    router: RoomRouter,
    registry: Arc<ConnectionRegistry>,
    presence: PresenceBroadcaster,
    sequencer: ChatSequencer,
    typing: TypingGate,
    retry: RetryPolicy,
    max_content_length: usize,
}

impl Engine {
    /// Create an engine over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            store,
            router: RoomRouter::with_config(config.router),
            presence: PresenceBroadcaster::new(Arc::clone(&registry)),
            registry,
            sequencer: ChatSequencer::new(),
            typing: TypingGate::new(config.typing_min_interval_ms),
            retry: config.retry,
            max_content_length: config.max_content_length,
        }
    }

    /// The live connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The room-subscription table.
    #[must_use]
    pub fn router(&self) -> &RoomRouter {
        &self.router
    }

    /// The durable store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Register an authenticated connection.
    ///
    /// Persists the online transition, stores the registry mapping
    /// (silently replacing a previous connection for the same user),
    /// and announces the transition to interested users.
    ///
    /// # Errors
    ///
    /// Returns an error if the user is unknown or the presence write
    /// fails; the connection should then be closed by the caller.
    pub async fn connect(
        &self,
        user_id: &str,
        connection_id: &ConnectionId,
        sender: mpsc::UnboundedSender<Arc<ServerFrame>>,
    ) -> Result<User, EngineError> {
        let now = now_millis();

        // Durable presence first, announcement after.
        let user = with_retry(&self.retry, || {
            self.store.set_presence(user_id, true, now)
        })
        .await?;

        let handle = ConnectionHandle::new(connection_id.clone(), user.name.clone(), sender);
        if let Some(previous) = self.registry.register(user_id, handle) {
            // The replaced connection is not closed here; its own close
            // path will find the mapping gone and skip the offline
            // transition.
            info!(
                user = %user_id,
                previous = %previous.connection_id,
                connection = %connection_id,
                "Replaced existing connection"
            );
        }

        match with_retry(&self.retry, || self.store.chats_with(user_id)).await {
            Ok(chats) => {
                self.presence.announce(&chats, user_id, true, now);
            }
            Err(err) => {
                warn!(user = %user_id, error = %err, "Online announcement skipped");
            }
        }

        info!(user = %user_id, connection = %connection_id, "User connected");
        Ok(user)
    }

    /// Tear down a closed connection.
    ///
    /// Always drops the connection's room subscriptions. The offline
    /// transition is persisted and announced only if this connection
    /// still owns the registry mapping; a stale close after a
    /// replacement leaves the live connection untouched. Storage
    /// failures here are logged, never propagated.
    pub async fn disconnect(&self, user_id: &str, connection_id: &ConnectionId) {
        self.router.unsubscribe_all(connection_id);

        if !self.registry.unregister(user_id, connection_id) {
            debug!(user = %user_id, connection = %connection_id, "Stale connection closed");
            return;
        }

        let now = now_millis();
        if let Err(err) = with_retry(&self.retry, || {
            self.store.set_presence(user_id, false, now)
        })
        .await
        {
            warn!(user = %user_id, error = %err, "Offline transition not persisted");
        }

        match with_retry(&self.retry, || self.store.chats_with(user_id)).await {
            Ok(chats) => {
                self.presence.announce(&chats, user_id, false, now);
            }
            Err(err) => {
                warn!(user = %user_id, error = %err, "Offline announcement skipped");
            }
        }

        info!(user = %user_id, connection = %connection_id, "User disconnected");
    }

    /// Subscribe a connection to a chat's room.
    ///
    /// Membership is checked before any subscription exists. On
    /// success, pending unread messages from the other participant are
    /// flushed to read and announced to the room as one batch event.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown chat and `Authorization` when
    /// the caller is not a participant.
    pub async fn join_room(
        &self,
        user_id: &str,
        connection_id: &ConnectionId,
        chat_id: &str,
    ) -> Result<JoinOutcome, EngineError> {
        let chat = with_retry(&self.retry, || self.store.get_chat(chat_id)).await?;

        if !chat.has_participant(user_id) {
            return Err(EngineError::Authorization(
                "Not a participant of this chat".to_string(),
            ));
        }

        let receiver = match self.router.subscribe(connection_id, chat_id) {
            Ok(rx) => Some(rx),
            // Re-joins are idempotent; the catch-up flush still runs.
            Err(RouterError::AlreadySubscribed(_)) => None,
            Err(RouterError::MaxSubscriptionsReached) => {
                return Err(EngineError::Validation(
                    "Too many open chats on this connection".to_string(),
                ));
            }
            Err(err) => {
                return Err(EngineError::Validation(err.to_string()));
            }
        };

        let now = now_millis();
        let flushed = with_retry(&self.retry, || {
            self.store.flush_unread(chat_id, user_id, now)
        })
        .await?;

        if !flushed.is_empty() {
            let frame = Arc::new(ServerFrame::messages_flushed(chat_id, user_id));
            self.router.publish(chat_id, RoomEvent::to_all(frame));
        }

        debug!(
            user = %user_id,
            chat = %chat_id,
            flushed = flushed.len(),
            "Joined room"
        );

        Ok(JoinOutcome { receiver, flushed })
    }

    /// Validate, persist, and fan out a new message.
    ///
    /// The chat's sequencing permit is held across persist and
    /// broadcast, so delivery order matches commit order and
    /// `created_at` is strictly increasing within the chat.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty or oversized content, `NotFound`
    /// when the chat is missing or the caller is not a participant, and
    /// `Storage` when persistence fails.
    pub async fn send_message(
        &self,
        user_id: &str,
        chat_id: &str,
        content: &str,
    ) -> Result<MessagePayload, EngineError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(EngineError::Validation(
                "Message content cannot be empty".to_string(),
            ));
        }
        if content.len() > self.max_content_length {
            return Err(EngineError::Validation(
                "Message content too long".to_string(),
            ));
        }

        let chat = with_retry(&self.retry, || self.store.get_chat(chat_id)).await?;
        if !chat.has_participant(user_id) {
            // Do not reveal the chat's existence to outsiders.
            return Err(EngineError::NotFound("Chat not found".to_string()));
        }

        let sender = with_retry(&self.retry, || self.store.get_user(user_id)).await?;

        let mut permit = self.sequencer.acquire(chat_id).await;
        let created_at = permit.next(now_millis());

        let message = Message {
            id: crate::model::generate_id(),
            chat: chat_id.to_string(),
            sender: user_id.to_string(),
            content: content.to_string(),
            is_read: false,
            read_at: None,
            created_at,
        };

        with_retry(&self.retry, || {
            self.store.insert_message(message.clone())
        })
        .await?;
        with_retry(&self.retry, || {
            self.store.set_last_message(chat_id, &message.id, created_at)
        })
        .await?;

        let payload = message.hydrate(&sender);
        let frame = Arc::new(ServerFrame::ReceiveMessage(payload.clone()));
        let recipients = self.router.publish(chat_id, RoomEvent::to_all(frame));
        drop(permit);

        debug!(
            user = %user_id,
            chat = %chat_id,
            message = %payload.id,
            recipients,
            "Message sent"
        );

        Ok(payload)
    }

    /// Relay a typing signal to the chat's other subscribers.
    ///
    /// Pure relay: no persistence and no membership lookup. A
    /// minimum-interval gate per (user, chat) absorbs client re-send
    /// storms. Returns the number of receivers the relay reached.
    pub fn typing(&self, user_id: &str, connection_id: &ConnectionId, chat_id: &str) -> usize {
        if !self.typing.allow(user_id, chat_id, now_millis()) {
            return 0;
        }

        let user_name = self.registry.user_name(user_id).unwrap_or_default();
        let frame = Arc::new(ServerFrame::typing(chat_id, user_id, user_name));
        self.router
            .publish(chat_id, RoomEvent::excluding(connection_id.clone(), frame))
    }

    /// Relay a stop-typing signal to the chat's other subscribers.
    ///
    /// Never gated, and reopens the pair's typing gate.
    pub fn stop_typing(&self, user_id: &str, connection_id: &ConnectionId, chat_id: &str) -> usize {
        self.typing.reset(user_id, chat_id);

        let frame = Arc::new(ServerFrame::stop_typing(chat_id, user_id));
        self.router
            .publish(chat_id, RoomEvent::excluding(connection_id.clone(), frame))
    }

    /// Transition a single message to read and announce it.
    ///
    /// Idempotent from the caller's view: a repeat call re-announces
    /// but the stored `read_at` keeps its first value.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the message does not exist or does not
    /// belong to the given chat.
    pub async fn mark_seen(
        &self,
        user_id: &str,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Message, EngineError> {
        let message = with_retry(&self.retry, || self.store.get_message(message_id)).await?;
        if message.chat != chat_id {
            return Err(EngineError::NotFound("Message not found".to_string()));
        }

        let now = now_millis();
        let updated = with_retry(&self.retry, || self.store.mark_read(message_id, now)).await?;

        let frame = Arc::new(ServerFrame::message_seen(chat_id, user_id, message_id));
        self.router.publish(chat_id, RoomEvent::to_all(frame));

        debug!(user = %user_id, chat = %chat_id, message = %message_id, "Message seen");
        Ok(updated)
    }
}

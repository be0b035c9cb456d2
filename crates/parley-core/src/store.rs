//! Durable-store abstraction for Parley.
//!
//! The engine talks to storage exclusively through the [`Store`] trait,
//! so the backing database is swappable. Every engine call site wraps
//! store operations in [`with_retry`], which adds a bounded timeout and
//! a small retry budget with exponential backoff; transient failures
//! surface to callers only after the budget is exhausted.

use crate::model::{Chat, ChatId, Message, MessageId, User, UserId};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No such user.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// No such chat.
    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    /// No such message.
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// A chat needs exactly two distinct participants.
    #[error("Chat participants must be two distinct users")]
    InvalidParticipants,

    /// The backend failed or timed out; retryable.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the operation could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Atomic read/update operations over the durable records.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load a user by id.
    async fn get_user(&self, user_id: &str) -> Result<User, StoreError>;

    /// Persist a presence transition, returning the updated user.
    async fn set_presence(
        &self,
        user_id: &str,
        is_online: bool,
        at: u64,
    ) -> Result<User, StoreError>;

    /// Load a chat by id.
    async fn get_chat(&self, chat_id: &str) -> Result<Chat, StoreError>;

    /// Find the chat for an unordered participant pair, creating it on
    /// first contact. Argument order does not matter.
    async fn get_or_create_chat(&self, a: &str, b: &str) -> Result<Chat, StoreError>;

    /// All chats a user participates in.
    async fn chats_with(&self, user_id: &str) -> Result<Vec<Chat>, StoreError>;

    /// Persist a new message.
    async fn insert_message(&self, message: Message) -> Result<(), StoreError>;

    /// Update a chat's summary fields to point at its newest message.
    async fn set_last_message(
        &self,
        chat_id: &str,
        message_id: &str,
        at: u64,
    ) -> Result<(), StoreError>;

    /// Load a message by id.
    async fn get_message(&self, message_id: &str) -> Result<Message, StoreError>;

    /// Transition a message to read. Idempotent: the stored `read_at`
    /// keeps the timestamp of the first transition.
    async fn mark_read(&self, message_id: &str, at: u64) -> Result<Message, StoreError>;

    /// Transition every unread message in a chat not sent by `reader_id`
    /// to read, returning the ids that changed.
    async fn flush_unread(
        &self,
        chat_id: &str,
        reader_id: &str,
        at: u64,
    ) -> Result<Vec<MessageId>, StoreError>;
}

/// Retry budget applied to every store call the engine makes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubles per retry.
    pub base_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Run a store operation under a retry policy.
///
/// Non-transient errors (not-found, validation) return immediately;
/// transient failures and timeouts are retried with backoff until the
/// budget runs out.
///
/// # Errors
///
/// Returns the last error once the budget is exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if !err.is_transient() => return Err(err),
            Ok(Err(err)) => {
                if attempt >= policy.attempts.max(1) {
                    return Err(err);
                }
                warn!(attempt, error = %err, "Transient store failure, retrying");
            }
            Err(_) => {
                if attempt >= policy.attempts.max(1) {
                    return Err(StoreError::Unavailable("operation timed out".to_string()));
                }
                warn!(attempt, "Store call timed out, retrying");
            }
        }

        tokio::time::sleep(delay).await;
        delay *= 2;
    }
}

//! Typing-relay gate.
//!
//! Clients re-send `typing` on every keystroke, so the relay enforces a
//! minimum interval per (user, chat) pair to keep event storms off the
//! wire. `stop_typing` is never gated and clears the pair's slot so the
//! next `typing` passes immediately.

use crate::model::{ChatId, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

/// Minimum-interval gate for typing relays.
#[derive(Debug)]
pub struct TypingGate {
    last_relay: DashMap<(UserId, ChatId), u64>,
    min_interval_ms: u64,
}

impl TypingGate {
    /// Create a gate. An interval of zero disables gating.
    #[must_use]
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_relay: DashMap::new(),
            min_interval_ms,
        }
    }

    /// Whether a typing relay from this user in this chat may go out
    /// now. Records the relay time when allowed.
    pub fn allow(&self, user_id: &str, chat_id: &str, now: u64) -> bool {
        if self.min_interval_ms == 0 {
            return true;
        }

        let key = (user_id.to_string(), chat_id.to_string());
        match self.last_relay.entry(key) {
            Entry::Occupied(mut entry) => {
                if now.saturating_sub(*entry.get()) < self.min_interval_ms {
                    trace!(user = %user_id, chat = %chat_id, "Typing relay gated");
                    return false;
                }
                entry.insert(now);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Clear the slot for a pair, typically on `stop_typing`.
    pub fn reset(&self, user_id: &str, chat_id: &str) {
        self.last_relay
            .remove(&(user_id.to_string(), chat_id.to_string()));
    }
}

//! Presence fan-out for Parley.
//!
//! Presence transitions are announced to the users who can see them:
//! every participant of every chat the transitioning user belongs to,
//! the user included (so their other connections stay consistent).
//! Delivery goes through the connection registry, so only currently
//! connected interested users receive anything.

use crate::model::{Chat, UserId};
use crate::registry::ConnectionRegistry;
use parley_protocol::{PresencePayload, ServerFrame};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Interest-scoped presence announcer.
#[derive(Debug)]
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    /// Create a broadcaster over the given registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The users who should hear about a presence change: participants
    /// of the user's chats, plus the user themself.
    #[must_use]
    pub fn interest_set(chats: &[Chat], user_id: &str) -> HashSet<UserId> {
        let mut interested: HashSet<UserId> = chats
            .iter()
            .flat_map(|chat| chat.participants.iter().cloned())
            .collect();
        interested.insert(user_id.to_string());
        interested
    }

    /// Announce a transition, returning how many live connections
    /// received it.
    pub fn announce(&self, chats: &[Chat], user_id: &str, is_online: bool, last_seen: u64) -> usize {
        let payload = PresencePayload {
            user_id: user_id.to_string(),
            is_online,
            last_seen,
        };
        let frame = Arc::new(if is_online {
            ServerFrame::UserOnline(payload)
        } else {
            ServerFrame::UserOffline(payload)
        });

        let interested = Self::interest_set(chats, user_id);
        let delivered = self.registry.send_to_many(interested.iter(), &frame);

        debug!(
            user = %user_id,
            online = is_online,
            interested = interested.len(),
            delivered,
            "Announced presence transition"
        );
        delivered
    }
}

//! Per-chat message sequencing.
//!
//! Wall-clock timestamps alone cannot totally order messages from
//! concurrent senders in the same chat. The sequencer hands out one
//! permit per chat; the pipeline holds it across persist and broadcast,
//! so ties are broken by arrival order and `created_at` is strictly
//! increasing within a chat.

use crate::model::ChatId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-chat sequencing permits and timestamp cursors.
#[derive(Debug, Default)]
pub struct ChatSequencer {
    cursors: DashMap<ChatId, Arc<Mutex<u64>>>,
}

impl ChatSequencer {
    /// Create a new sequencer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the sequencing permit for a chat.
    ///
    /// Holders of the permit are the only writers of that chat's
    /// timeline until the guard drops.
    pub async fn acquire(&self, chat_id: &str) -> SequenceGuard {
        let cursor = self
            .cursors
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone();

        SequenceGuard {
            cursor: cursor.lock_owned().await,
        }
    }
}

/// Exclusive permit over one chat's timeline.
pub struct SequenceGuard {
    cursor: OwnedMutexGuard<u64>,
}

impl SequenceGuard {
    /// Issue the next timestamp: the current wall clock, bumped past the
    /// previously issued value if the clock has not advanced.
    pub fn next(&mut self, now: u64) -> u64 {
        let issued = now.max(*self.cursor + 1);
        *self.cursor = issued;
        issued
    }
}

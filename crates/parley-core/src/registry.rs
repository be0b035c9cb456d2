//! Connection registry for Parley.
//!
//! Maps each authenticated user to their live connection handle. The
//! registry is the source of presence truth while a connection is open;
//! durable presence is reconciled through the store on each transition.

use crate::model::UserId;
use dashmap::DashMap;
use parley_protocol::ServerFrame;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Unique identifier for a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID from a known value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        Self(format!("conn_{timestamp:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A registered connection: its id, the user's cached display name, and
/// the outbound event queue feeding the connection's write loop.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Identifier of the underlying connection.
    pub connection_id: ConnectionId,
    /// Display name cached at registration, used for typing relays.
    pub user_name: String,
    sender: mpsc::UnboundedSender<Arc<ServerFrame>>,
}

impl ConnectionHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        user_name: impl Into<String>,
        sender: mpsc::UnboundedSender<Arc<ServerFrame>>,
    ) -> Self {
        Self {
            connection_id,
            user_name: user_name.into(),
            sender,
        }
    }

    /// Queue a frame for delivery. Returns `false` if the connection's
    /// write loop has already gone away.
    pub fn send(&self, frame: Arc<ServerFrame>) -> bool {
        self.sender.send(frame).is_ok()
    }
}

/// Live user → connection mapping.
///
/// A second registration for an already-connected user replaces the
/// previous mapping; the registry never closes the stale connection
/// itself. Unregistration is guarded by connection identity so a stale
/// close arriving after a replacement cannot evict the live mapping.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no user is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether a user currently has a live connection.
    #[must_use]
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    /// Cached display name for a connected user.
    #[must_use]
    pub fn user_name(&self, user_id: &str) -> Option<String> {
        self.connections.get(user_id).map(|h| h.user_name.clone())
    }

    /// Store the mapping for a user, returning the handle it replaced.
    pub fn register(&self, user_id: impl Into<UserId>, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = user_id.into();
        let previous = self.connections.insert(user_id.clone(), handle);
        debug!(
            user = %user_id,
            replaced = previous.is_some(),
            "Connection registered"
        );
        previous
    }

    /// Remove the mapping for a user, but only if it still points at
    /// `connection_id`. Returns whether the mapping was removed.
    pub fn unregister(&self, user_id: &str, connection_id: &ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, handle| handle.connection_id == *connection_id)
            .is_some();
        if removed {
            debug!(user = %user_id, connection = %connection_id, "Connection unregistered");
        }
        removed
    }

    /// Queue a frame for a single user. Returns whether it was queued.
    pub fn send_to(&self, user_id: &str, frame: Arc<ServerFrame>) -> bool {
        self.connections
            .get(user_id)
            .map(|handle| handle.send(frame))
            .unwrap_or(false)
    }

    /// Queue a frame for each given user, returning how many were live.
    pub fn send_to_many<'a, I>(&self, user_ids: I, frame: &Arc<ServerFrame>) -> usize
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        user_ids
            .into_iter()
            .filter(|id| self.send_to(id, Arc::clone(frame)))
            .count()
    }

    /// Ids of all currently connected users.
    #[must_use]
    pub fn connected_users(&self) -> Vec<UserId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(conn: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<Arc<ServerFrame>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(ConnectionId::new(conn), "Alice", tx), rx)
    }

    #[test]
    fn test_register_returns_previous_handle() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle("conn-1");
        let (second, _rx2) = handle("conn-2");

        assert!(registry.register("alice", first).is_none());
        let replaced = registry.register("alice", second).unwrap();
        assert_eq!(replaced.connection_id, ConnectionId::new("conn-1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_unregister_keeps_live_mapping() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle("conn-1");
        let (second, _rx2) = handle("conn-2");

        registry.register("alice", first);
        registry.register("alice", second);

        // The stale connection closes after being replaced.
        assert!(!registry.unregister("alice", &ConnectionId::new("conn-1")));
        assert!(registry.is_connected("alice"));

        assert!(registry.unregister("alice", &ConnectionId::new("conn-2")));
        assert!(!registry.is_connected("alice"));
    }

    #[test]
    fn test_send_to_queues_frames() {
        let registry = ConnectionRegistry::new();
        let (h, mut rx) = handle("conn-1");
        registry.register("alice", h);

        let frame = Arc::new(ServerFrame::error("boom"));
        assert!(registry.send_to("alice", Arc::clone(&frame)));
        assert!(!registry.send_to("nobody", frame));

        assert!(matches!(*rx.try_recv().unwrap(), ServerFrame::Error { .. }));
    }

    #[test]
    fn test_send_to_many_counts_live_receivers() {
        let registry = ConnectionRegistry::new();
        let (ha, _rxa) = handle("conn-1");
        let (hb, _rxb) = handle("conn-2");
        registry.register("alice", ha);
        registry.register("bob", hb);

        let targets = vec![
            "alice".to_string(),
            "bob".to_string(),
            "carol".to_string(),
        ];
        let frame = Arc::new(ServerFrame::error("x"));
        assert_eq!(registry.send_to_many(&targets, &frame), 2);
    }

    #[test]
    fn test_user_name_cache() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle("conn-1");
        registry.register("alice", h);

        assert_eq!(registry.user_name("alice").as_deref(), Some("Alice"));
        assert!(registry.user_name("bob").is_none());
    }
}

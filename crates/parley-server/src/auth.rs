//! Authentication boundary.
//!
//! Token issuance and validation belong to the credential collaborator;
//! by the time a connection reaches the engine its identity is settled.
//! The [`Authenticator`] trait is the seam where a JWT or session-token
//! verifier plugs in.

use async_trait::async_trait;
use parley_core::{Store, UserId};
use std::sync::Arc;
use tracing::debug;

/// Resolves a presented token to a user id, or rejects it.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a token. `None` rejects the connection.
    async fn authenticate(&self, token: &str) -> Option<UserId>;
}

/// Treats the presented token as an already-verified subject id and
/// confirms the account exists in the store.
///
/// Suitable behind a gateway that has validated the credential and
/// forwards the subject; unknown subjects are rejected.
pub struct SubjectAuth {
    store: Arc<dyn Store>,
}

impl SubjectAuth {
    /// Create an authenticator over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Authenticator for SubjectAuth {
    async fn authenticate(&self, token: &str) -> Option<UserId> {
        match self.store.get_user(token).await {
            Ok(user) => Some(user.id),
            Err(err) => {
                debug!(error = %err, "Rejected connection token");
                None
            }
        }
    }
}

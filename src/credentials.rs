//! Credential provider seam.
//!
//! Token storage and refresh live outside this crate; the client only asks
//! "who am I right now" when it opens a link, filters per-recipient topics,
//! or issues a confirmation request.

use feedsync_shared::ActorId;
use parking_lot::RwLock;

/// Locally authenticated user plus the opaque credential presented to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub actor_id: ActorId,
    pub token: String,
}

impl Identity {
    pub fn new(actor_id: impl Into<ActorId>, token: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            token: token.into(),
        }
    }
}

pub trait CredentialProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
}

/// In-memory session, switched on login/logout by the host application.
#[derive(Debug, Default)]
pub struct SessionCredentials {
    session: RwLock<Option<Identity>>,
}

impl SessionCredentials {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            session: RwLock::new(identity),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        crate::log_info!("Session switched to {}", identity.actor_id);
        *self.session.write() = Some(identity);
    }

    pub fn sign_out(&self) {
        *self.session.write() = None;
    }
}

impl CredentialProvider for SessionCredentials {
    fn current_identity(&self) -> Option<Identity> {
        self.session.read().clone()
    }
}

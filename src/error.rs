//! Error types for the sync client.

use feedsync_shared::RequestError;
use thiserror::Error;

/// Failure of the underlying duplex link. Retried with backoff unless it is
/// an authentication failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("handshake timed out")]
    Timeout,
    #[error("i/o error: {0}")]
    Io(String),
    #[error("connection closed (code {code}): {reason}")]
    Closed { code: u16, reason: String },
    #[error("no keepalive received for {0:?}")]
    Dead(std::time::Duration),
    #[error("credential rejected: {0}")]
    Auth(String),
}

impl TransportError {
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::Auth(_))
    }
}

/// A single malformed inbound frame. The frame is dropped; the link stays up.
#[derive(Debug, Error)]
#[error("malformed frame: {0}")]
pub struct ParseError(#[from] pub serde_json::Error);

/// Failure of a user-initiated reconciled mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The previous toggle on this instance has not been confirmed yet.
    #[error("a mutation is already in flight for this entity")]
    Busy,
    #[error("no authenticated identity")]
    NotAuthenticated,
    /// The request failed; the optimistic change has been rolled back.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Errors from the sync service handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("sync service has shut down")]
    ShutDown,
}

//! Real-time sync client.
//!
//! One shared event link per process ([`ws::SyncManager`]), fanned out to any
//! number of UI handlers, with optimistic counters ([`reconcile`]) that
//! reconcile against the server and suppress the echo of the user's own
//! actions ([`dedup`]).

pub mod logging;

pub mod api_client;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dedup;
pub mod error;
#[cfg(feature = "ui")]
pub mod hooks;
pub mod reconcile;
pub mod ws;

pub use feedsync_shared as shared;

pub use api_client::{HttpMutationClient, MutationClient, MutationRequest};
pub use config::SyncConfig;
pub use context::SyncContext;
pub use credentials::{CredentialProvider, Identity, SessionCredentials};
pub use dedup::{DedupLedger, SharedLedger};
pub use error::{ParseError, ReconcileError, SyncError, TransportError};
pub use reconcile::{Comments, EntityView, Followers, Intent, Likes, Phase, ReconciledEntity, Unread};
pub use ws::{ConnectionState, LifecycleEvent, LifecycleKind, RecipientFilter, SyncHandle, SyncManager};

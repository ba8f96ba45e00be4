//! Shared types for the feedsync real-time client.
//!
//! Identifiers, the inbound event union, authoritative snapshots, wire
//! envelopes and the request-layer error taxonomy.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;

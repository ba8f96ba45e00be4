//! Real-time link: lifecycle, subscriptions, routing and fan-out.

pub mod connection;
pub mod dispatcher;
mod driver;
pub mod manager;
pub mod subscriptions;
pub mod transport;

pub use connection::{
    CloseCause, ConnectionManager, ConnectionState, Effect, LifecycleEvent, LifecycleKind,
    ReconnectPolicy,
};
pub use dispatcher::{Dispatcher, EventHandler, HandlerId, LifecycleHandler, Registration};
pub use manager::{SyncHandle, SyncManager};
pub use subscriptions::{DropReason, RecipientFilter, Routed, Subscription, SubscriptionRegistry};
pub use transport::{endpoint_url, Connector, FrameSink, FrameStream, Incoming, Link, TungsteniteConnector};

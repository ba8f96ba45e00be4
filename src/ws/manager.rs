//! Service entry point: one shared link per process, driven in the background.

use std::sync::Arc;

use feedsync_shared::{EventCategory, InboundEvent, Topic};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::connection::{ConnectionManager, ConnectionState, LifecycleEvent, LifecycleKind};
use super::dispatcher::{Dispatcher, Registration};
use super::driver::{Command, Driver, TimerSlot};
use super::subscriptions::{RecipientFilter, SubscriptionRegistry};
use super::transport::Connector;
use crate::config::SyncConfig;
use crate::credentials::CredentialProvider;
use crate::dedup::{DedupLedger, SharedLedger};
use crate::error::SyncError;

/// Cheap cloneable handle for talking to the sync service.
#[derive(Clone)]
pub struct SyncHandle {
    commands: UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    dispatcher: Arc<Dispatcher>,
    ledger: SharedLedger,
}

impl SyncHandle {
    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .unbounded_send(command)
            .map_err(|_| SyncError::ShutDown)
    }

    /// Idempotent; a no-op while connected or connecting.
    pub fn request_connect(&self) -> Result<(), SyncError> {
        self.send(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.send(Command::Disconnect)
    }

    pub fn declare(&self, topic: Topic, filter: RecipientFilter) -> Result<(), SyncError> {
        self.send(Command::Declare { topic, filter })
    }

    /// Declare a topic that only carries events addressed to the signed-in user.
    pub fn declare_personal(&self, topic: Topic) -> Result<(), SyncError> {
        self.send(Command::DeclarePersonal(topic))
    }

    pub fn register<F>(&self, category: EventCategory, handler: F) -> Registration
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.dispatcher.register(category, handler)
    }

    pub fn register_lifecycle<F>(&self, kind: LifecycleKind, handler: F) -> Registration
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.dispatcher.register_lifecycle(kind, handler)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Owns the background driver task.
pub struct SyncManager {
    handle: SyncHandle,
    task: JoinHandle<()>,
}

impl SyncManager {
    /// Spawn the driver on the current tokio runtime. The entity-event topic
    /// and the per-user notification topic are declared up front; nothing
    /// connects until [`SyncHandle::request_connect`].
    pub fn init(
        config: SyncConfig,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new());
        let ledger = DedupLedger::shared(config.dedup.clone());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (commands, receiver) = unbounded();

        let mut registry = SubscriptionRegistry::new();
        registry.declare(Topic::entity_events(), RecipientFilter::None);
        registry.declare_personal(Topic::notifications());

        let driver = Driver {
            manager: ConnectionManager::new(&config.reconnect, &config.heartbeat),
            config,
            registry,
            dispatcher: Arc::clone(&dispatcher),
            ledger: Arc::clone(&ledger),
            connector,
            credentials,
            state_tx,
            link: None,
            opening: None,
            reconnect_timer: TimerSlot::default(),
            cooldown_timer: TimerSlot::default(),
            heartbeat_timer: TimerSlot::default(),
        };
        let task = tokio::spawn(driver.run(receiver));

        Self {
            handle: SyncHandle {
                commands,
                state: state_rx,
                dispatcher,
                ledger,
            },
            task,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Disconnect cleanly and wait for the driver to exit.
    pub async fn shutdown(self) {
        if self.handle.send(Command::Shutdown).is_err() {
            crate::log_debug!("Sync driver already stopped");
        }
        if let Err(error) = self.task.await {
            crate::log_error!("Sync driver task failed: {}", error);
        }
    }
}

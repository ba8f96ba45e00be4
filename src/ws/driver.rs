//! Background task that owns the link and carries out [`Effect`]s.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use feedsync_shared::{is_auth_error_code, ClientFrame, Topic, WsEnvelope};
use futures_channel::mpsc::UnboundedReceiver;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::time::Sleep;

use super::connection::{CloseCause, ConnectionManager, ConnectionState, Effect};
use super::dispatcher::Dispatcher;
use super::subscriptions::{RecipientFilter, Routed, SubscriptionRegistry};
use super::transport::{endpoint_url, Connector, Incoming, Link};
use crate::config::SyncConfig;
use crate::credentials::CredentialProvider;
use crate::dedup::SharedLedger;
use crate::error::TransportError;

pub(crate) enum Command {
    Connect,
    Disconnect,
    Declare {
        topic: Topic,
        filter: RecipientFilter,
    },
    DeclarePersonal(Topic),
    Shutdown,
}

type OpenFuture = Pin<Box<dyn Future<Output = Result<Link, TransportError>> + Send>>;

/// One cancellable one-shot timer. A disarmed slot never fires.
#[derive(Default)]
pub(crate) struct TimerSlot {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TimerSlot {
    pub(crate) fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(after)));
    }

    pub(crate) fn cancel(&mut self) {
        self.sleep = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    pub(crate) async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.await;
                self.sleep = None;
            }
            None => std::future::pending().await,
        }
    }
}

async fn next_open(opening: &mut Option<OpenFuture>) -> Result<Link, TransportError> {
    match opening.as_mut() {
        Some(fut) => {
            let result = fut.await;
            *opening = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn next_incoming(link: &mut Option<Link>) -> Option<Result<Incoming, TransportError>> {
    match link.as_mut() {
        Some(link) => link.stream.next().await,
        None => std::future::pending().await,
    }
}

/// Reads the paused-aware tokio clock so heartbeat checks follow test time.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

pub(crate) struct Driver {
    pub(crate) config: SyncConfig,
    pub(crate) manager: ConnectionManager,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) ledger: SharedLedger,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) link: Option<Link>,
    pub(crate) opening: Option<OpenFuture>,
    pub(crate) reconnect_timer: TimerSlot,
    pub(crate) cooldown_timer: TimerSlot,
    pub(crate) heartbeat_timer: TimerSlot,
}

impl Driver {
    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        crate::log_debug!("Sync driver started for {}", self.config.ws_url);
        loop {
            let effects = tokio::select! {
                command = commands.next() => match command {
                    Some(Command::Connect) => self.manager.request_connect(),
                    Some(Command::Disconnect) => self.manager.disconnect(),
                    Some(Command::Declare { topic, filter }) => {
                        if self.registry.declare(topic, filter) {
                            self.resubscribe().await;
                        }
                        Vec::new()
                    }
                    Some(Command::DeclarePersonal(topic)) => {
                        self.registry.declare_personal(topic);
                        if let Some(identity) = self.credentials.current_identity() {
                            if self.registry.bind_identity(&identity.actor_id) {
                                self.resubscribe().await;
                            }
                        }
                        Vec::new()
                    }
                    Some(Command::Shutdown) | None => {
                        let effects = self.manager.disconnect();
                        self.apply(effects).await;
                        crate::log_debug!("Sync driver stopped");
                        return;
                    }
                },
                opened = next_open(&mut self.opening) => match opened {
                    Ok(link) => {
                        self.link = Some(link);
                        self.manager.on_open(now())
                    }
                    Err(error) => {
                        crate::log_warn!("Open attempt failed: {}", error);
                        self.manager.on_closed(CloseCause::Failed(error))
                    }
                },
                incoming = next_incoming(&mut self.link) => self.on_incoming(incoming).await,
                _ = self.reconnect_timer.fired() => self.manager.on_reconnect_due(),
                _ = self.cooldown_timer.fired() => {
                    self.manager.on_cooldown_elapsed();
                    Vec::new()
                }
                _ = self.heartbeat_timer.fired() => self.manager.on_heartbeat_tick(now()),
            };
            self.apply(effects).await;
        }
    }

    /// Effects may yield further effects (a failed send path, a missing
    /// credential), so they are drained through a queue in order.
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::State(state) => {
                    self.state_tx.send_replace(state);
                }
                Effect::OpenTransport => queue.extend(self.open()),
                Effect::CloseTransport => {
                    self.opening = None;
                    if let Some(mut link) = self.link.take() {
                        let close = tokio::time::timeout(self.config.open_timeout, link.sink.close());
                        if !matches!(close.await, Ok(Ok(()))) {
                            crate::log_debug!("Link did not close cleanly; dropped");
                        }
                    }
                    queue.extend(self.manager.on_closed(CloseCause::Clean));
                }
                Effect::DropTransport => {
                    self.opening = None;
                    self.link = None;
                }
                Effect::ScheduleReconnect(delay) => self.reconnect_timer.arm(delay),
                Effect::CancelReconnect => self.reconnect_timer.cancel(),
                Effect::ScheduleCooldown(delay) => self.cooldown_timer.arm(delay),
                Effect::CancelCooldown => self.cooldown_timer.cancel(),
                Effect::ActivateSubscriptions => {
                    for frame in self.registry.activate_all() {
                        self.send(frame).await;
                    }
                }
                Effect::DeactivateSubscriptions => {
                    for frame in self.registry.deactivate_all() {
                        self.send(frame).await;
                    }
                }
                Effect::ArmHeartbeat => self.heartbeat_timer.arm(self.config.heartbeat.interval),
                Effect::StopHeartbeat => self.heartbeat_timer.cancel(),
                Effect::SendHeartbeat => self.send(ClientFrame::Heartbeat).await,
                Effect::Lifecycle(event) => {
                    self.dispatcher.dispatch_lifecycle(&event);
                }
            }
        }
    }

    /// Starts one open attempt. The credential is re-read every time so a
    /// reconnect always uses the current identity.
    fn open(&mut self) -> Vec<Effect> {
        let Some(identity) = self.credentials.current_identity() else {
            return self.manager.on_closed(CloseCause::Failed(TransportError::Auth(
                "no credential available".to_string(),
            )));
        };
        self.registry.bind_identity(&identity.actor_id);

        let url = match endpoint_url(&self.config.ws_url, &identity.token) {
            Ok(url) => url,
            Err(error) => return self.manager.on_closed(CloseCause::Failed(error)),
        };

        crate::log_info!("Opening link to {} as {}", self.config.ws_url, identity.actor_id);
        let connector = Arc::clone(&self.connector);
        let timeout = self.config.open_timeout;
        self.opening = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        }));
        Vec::new()
    }

    async fn on_incoming(&mut self, incoming: Option<Result<Incoming, TransportError>>) -> Vec<Effect> {
        match incoming {
            Some(Ok(Incoming::Text(text))) => {
                self.manager.on_inbound(now());
                self.follow_identity().await;
                self.route(&text)
            }
            Some(Ok(Incoming::Activity)) => {
                self.manager.on_inbound(now());
                Vec::new()
            }
            Some(Ok(Incoming::Closed(cause))) => {
                self.link = None;
                self.manager.on_closed(cause)
            }
            Some(Err(error)) => {
                self.link = None;
                self.manager.on_closed(CloseCause::Failed(error))
            }
            None => {
                self.link = None;
                self.manager.on_closed(CloseCause::Failed(TransportError::Closed {
                    code: 1006,
                    reason: "stream ended".to_string(),
                }))
            }
        }
    }

    /// Dedup happens once per inbound event, before fan-out, so every mounted
    /// consumer of the same entity sees the same admitted stream.
    fn route(&mut self, text: &str) -> Vec<Effect> {
        match self.registry.route(text) {
            Ok(Routed::Event(event)) => {
                let admitted = self.ledger.lock().admit_event(&event);
                if admitted {
                    self.dispatcher.dispatch(&event);
                } else {
                    crate::log_debug!(
                        "Suppressed duplicate {} on {}",
                        event.category(),
                        event.entity_id
                    );
                }
                Vec::new()
            }
            Ok(Routed::Heartbeat) => Vec::new(),
            Ok(Routed::ServerError { code, message }) if is_auth_error_code(&code) => {
                self.link = None;
                self.manager
                    .on_closed(CloseCause::Failed(TransportError::Auth(message)))
            }
            Ok(Routed::ServerError { code, message }) => {
                crate::log_warn!("Server reported {}: {}", code, message);
                Vec::new()
            }
            Ok(Routed::Dropped(reason)) => {
                crate::log_debug!("Dropped frame: {:?}", reason);
                Vec::new()
            }
            Err(error) => {
                crate::log_warn!("Dropping frame: {}", error);
                Vec::new()
            }
        }
    }

    /// Personal topics filter on whoever is signed in right now, not on who
    /// opened the link. A switch rebinds and resubscribes before routing.
    async fn follow_identity(&mut self) {
        let current = self.credentials.current_identity().map(|identity| identity.actor_id);
        if current.as_ref() == self.registry.identity() {
            return;
        }
        let changed = match &current {
            Some(actor) => {
                crate::log_info!("Identity changed to {}; rebinding personal topics", actor);
                self.registry.bind_identity(actor)
            }
            None => {
                crate::log_info!("Signed out; personal topics paused");
                self.registry.unbind_identity()
            }
        };
        if changed {
            self.resubscribe().await;
        }
    }

    async fn resubscribe(&mut self) {
        if self.manager.state().is_connected() {
            for frame in self.registry.activate_all() {
                self.send(frame).await;
            }
        }
    }

    /// Best effort: a failed write surfaces through the read half.
    async fn send(&mut self, frame: ClientFrame) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        match serde_json::to_string(&WsEnvelope::new(frame)) {
            Ok(json) => {
                if let Err(error) = link.sink.send(json).await {
                    crate::log_warn!("Send failed: {}", error);
                }
            }
            Err(error) => crate::log_error!("Failed to encode frame: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_slot_fires_once_and_cancels() {
        let mut slot = TimerSlot::default();
        slot.arm(Duration::from_secs(5));
        assert!(slot.is_armed());
        slot.fired().await;
        assert!(!slot.is_armed());

        slot.arm(Duration::from_secs(5));
        slot.cancel();
        let waited = tokio::time::timeout(Duration::from_secs(60), slot.fired()).await;
        assert!(waited.is_err());
    }
}

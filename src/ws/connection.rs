//! Connection lifecycle state machine with exponential-backoff reconnect.
//!
//! [`ConnectionManager`] performs no I/O. Every input (connect request, open,
//! close, timer, heartbeat tick) returns the [`Effect`]s the driver must carry
//! out, in order. This keeps every transition testable without a socket.

use std::time::{Duration, Instant};

use crate::config::{HeartbeatConfig, ReconnectConfig};
use crate::error::TransportError;

/// Connection state for the single shared link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }
}

/// Why the link went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Intentional close by either side; never retried.
    Clean,
    Failed(TransportError),
}

/// Connection meta-events delivered to lifecycle handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    ConnectionEstablished,
    ConnectionClosed {
        error: Option<TransportError>,
        will_retry: bool,
    },
    /// The credential was rejected; no retry until `request_connect` is called
    /// again with refreshed credentials.
    AuthRejected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecycleKind {
    ConnectionEstablished,
    ConnectionClosed,
    AuthRejected,
}

impl LifecycleEvent {
    pub fn kind(&self) -> LifecycleKind {
        match self {
            LifecycleEvent::ConnectionEstablished => LifecycleKind::ConnectionEstablished,
            LifecycleEvent::ConnectionClosed { .. } => LifecycleKind::ConnectionClosed,
            LifecycleEvent::AuthRejected { .. } => LifecycleKind::AuthRejected,
        }
    }
}

/// Backoff state: `delay(n) = min(base * 2^(n-1), max)` for attempt `n >= 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt: 0,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            max_attempts: config.max_attempts,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Advance to the next attempt, or `None` once `max_attempts` is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.delay_for_attempt(self.attempt))
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    State(ConnectionState),
    /// Start exactly one open attempt.
    OpenTransport,
    /// Close gracefully, then report back with [`CloseCause::Clean`].
    CloseTransport,
    /// Abandon the link without a close handshake.
    DropTransport,
    ScheduleReconnect(Duration),
    CancelReconnect,
    ScheduleCooldown(Duration),
    CancelCooldown,
    ActivateSubscriptions,
    DeactivateSubscriptions,
    ArmHeartbeat,
    StopHeartbeat,
    SendHeartbeat,
    Lifecycle(LifecycleEvent),
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    policy: ReconnectPolicy,
    cooldown: Duration,
    liveness_timeout: Duration,
    last_inbound: Option<Instant>,
    connect_after_close: bool,
    reconnect_scheduled: bool,
}

impl ConnectionManager {
    pub fn new(reconnect: &ReconnectConfig, heartbeat: &HeartbeatConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy: ReconnectPolicy::new(reconnect),
            cooldown: reconnect.cooldown,
            liveness_timeout: heartbeat.liveness_timeout(),
            last_inbound: None,
            connect_after_close: false,
            reconnect_scheduled: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Idempotent: while connected or connecting this is a no-op, so an
    /// attempt in flight is never duplicated. An explicit request also
    /// revives a policy that had given up.
    pub fn request_connect(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                crate::log_debug!("Connect requested while {:?}; ignoring", self.state);
            }
            ConnectionState::Closing => {
                self.connect_after_close = true;
            }
            ConnectionState::Disconnected => {
                effects.push(Effect::CancelReconnect);
                effects.push(Effect::CancelCooldown);
                self.reconnect_scheduled = false;
                self.policy.reset();
                self.begin_open(&mut effects);
            }
        }
        effects
    }

    pub fn on_open(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state != ConnectionState::Connecting {
            crate::log_warn!("Link opened while {:?}; dropping it", self.state);
            effects.push(Effect::DropTransport);
            return effects;
        }
        self.policy.reset();
        self.last_inbound = Some(now);
        self.transition(ConnectionState::Connected, &mut effects);
        effects.push(Effect::ActivateSubscriptions);
        effects.push(Effect::ArmHeartbeat);
        effects.push(Effect::Lifecycle(LifecycleEvent::ConnectionEstablished));
        effects
    }

    /// The link (or an open attempt) ended.
    pub fn on_closed(&mut self, cause: CloseCause) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            ConnectionState::Disconnected => return effects,
            ConnectionState::Closing => {
                self.finish_close(&mut effects);
                return effects;
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        let was_connected = self.state.is_connected();
        self.transition(ConnectionState::Disconnected, &mut effects);
        self.last_inbound = None;
        if was_connected {
            effects.push(Effect::DeactivateSubscriptions);
            effects.push(Effect::StopHeartbeat);
        }

        match cause {
            CloseCause::Clean => {
                self.policy.reset();
                if was_connected {
                    effects.push(Effect::Lifecycle(LifecycleEvent::ConnectionClosed {
                        error: None,
                        will_retry: false,
                    }));
                }
            }
            CloseCause::Failed(TransportError::Auth(reason)) => {
                crate::log_warn!("Credential rejected ({}); waiting for re-authentication", reason);
                if was_connected {
                    effects.push(Effect::Lifecycle(LifecycleEvent::ConnectionClosed {
                        error: Some(TransportError::Auth(reason.clone())),
                        will_retry: false,
                    }));
                }
                effects.push(Effect::Lifecycle(LifecycleEvent::AuthRejected { reason }));
            }
            CloseCause::Failed(error) => {
                let retry = self.policy.next_delay();
                if was_connected {
                    effects.push(Effect::Lifecycle(LifecycleEvent::ConnectionClosed {
                        error: Some(error.clone()),
                        will_retry: retry.is_some(),
                    }));
                }
                match retry {
                    Some(delay) => {
                        crate::log_info!(
                            "Link lost ({}); reconnecting in {}ms (attempt {})",
                            error,
                            delay.as_millis(),
                            self.policy.attempt()
                        );
                        self.reconnect_scheduled = true;
                        effects.push(Effect::ScheduleReconnect(delay));
                    }
                    None => {
                        crate::log_warn!(
                            "Link lost ({}); giving up after {} attempts, cooldown {}s",
                            error,
                            self.policy.attempt(),
                            self.cooldown.as_secs()
                        );
                        effects.push(Effect::ScheduleCooldown(self.cooldown));
                    }
                }
            }
        }
        effects
    }

    /// Ignored unless a reconnect is actually scheduled, so a timer that
    /// fires after `disconnect` cannot revive the link.
    pub fn on_reconnect_due(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        let scheduled = std::mem::take(&mut self.reconnect_scheduled);
        if scheduled && self.state == ConnectionState::Disconnected {
            self.begin_open(&mut effects);
        }
        effects
    }

    pub fn on_cooldown_elapsed(&mut self) {
        crate::log_info!("Reconnect cooldown elapsed; attempt counter reset");
        self.policy.reset();
    }

    /// Explicit disconnect. Nothing reconnects automatically afterwards.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::CancelReconnect, Effect::CancelCooldown];
        self.policy.reset();
        self.connect_after_close = false;
        self.reconnect_scheduled = false;
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Closing => {}
            ConnectionState::Connecting => {
                self.transition(ConnectionState::Closing, &mut effects);
                effects.push(Effect::CloseTransport);
            }
            ConnectionState::Connected => {
                effects.push(Effect::DeactivateSubscriptions);
                effects.push(Effect::StopHeartbeat);
                self.transition(ConnectionState::Closing, &mut effects);
                effects.push(Effect::CloseTransport);
                effects.push(Effect::Lifecycle(LifecycleEvent::ConnectionClosed {
                    error: None,
                    will_retry: false,
                }));
            }
        }
        effects
    }

    /// Any inbound frame (data, heartbeat, ping) proves the link is alive.
    pub fn on_inbound(&mut self, now: Instant) {
        if self.state.is_connected() {
            self.last_inbound = Some(now);
        }
    }

    pub fn on_heartbeat_tick(&mut self, now: Instant) -> Vec<Effect> {
        if !self.state.is_connected() {
            return Vec::new();
        }
        let silent = self
            .last_inbound
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        if silent > self.liveness_timeout {
            crate::log_warn!("No keepalive for {}ms; treating link as dead", silent.as_millis());
            let mut effects = vec![Effect::DropTransport];
            effects.extend(self.on_closed(CloseCause::Failed(TransportError::Dead(silent))));
            return effects;
        }
        vec![Effect::SendHeartbeat, Effect::ArmHeartbeat]
    }

    fn begin_open(&mut self, effects: &mut Vec<Effect>) {
        self.transition(ConnectionState::Connecting, effects);
        effects.push(Effect::OpenTransport);
    }

    fn finish_close(&mut self, effects: &mut Vec<Effect>) {
        self.transition(ConnectionState::Disconnected, effects);
        self.last_inbound = None;
        if std::mem::take(&mut self.connect_after_close) {
            self.begin_open(effects);
        }
    }

    fn transition(&mut self, next: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != next {
            crate::log_info!("Connection state {:?} -> {:?}", self.state, next);
            self.state = next;
            effects.push(Effect::State(next));
        }
    }
}

//! Client configuration with defaults and environment overrides.

use std::time::Duration;

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound for any single retry delay.
    pub max_delay: Duration,
    /// Scheduled retries stop once this many have been made.
    pub max_attempts: u32,
    /// After retries are exhausted, the attempt counter resets once this elapses.
    pub cooldown: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Intervals without any inbound frame before the link is declared dead.
    pub missed_limit: u32,
}

impl HeartbeatConfig {
    pub fn liveness_timeout(&self) -> Duration {
        self.interval.saturating_mul(self.missed_limit.max(1))
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            missed_limit: 3,
        }
    }
}

/// Dedup windows. The bucket width is a heuristic: it must absorb clock skew
/// between the local action timestamp and the server's echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupConfig {
    pub retention: Duration,
    pub bucket: Duration,
    /// Neighbouring buckets an own-action marker still matches.
    pub echo_tolerance_buckets: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(5),
            bucket: Duration::from_secs(1),
            echo_tolerance_buckets: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Event endpoint, e.g. `wss://api.example.com/api/ws`.
    pub ws_url: String,
    /// Base URL of the REST API used for confirmations.
    pub api_url: String,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub dedup: DedupConfig,
    /// A handshake still pending after this long counts as a transport failure.
    pub open_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/api/ws".to_string(),
            api_url: "http://localhost:8080".to_string(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            dedup: DedupConfig::default(),
            open_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Build a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FEEDSYNC_WS_URL`: event endpoint (default: "ws://localhost:8080/api/ws")
    /// - `FEEDSYNC_API_URL`: REST base URL (default: "http://localhost:8080")
    /// - `FEEDSYNC_RECONNECT_BASE_MS`, `FEEDSYNC_RECONNECT_MAX_MS`,
    ///   `FEEDSYNC_RECONNECT_MAX_ATTEMPTS`, `FEEDSYNC_RECONNECT_COOLDOWN_MS`
    /// - `FEEDSYNC_HEARTBEAT_MS`: keepalive interval
    /// - `FEEDSYNC_DEDUP_BUCKET_MS`: dedup timestamp bucket width
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.as_millis() as u64).map_or(default, Duration::from_millis)
        };

        Self {
            ws_url: lookup("FEEDSYNC_WS_URL").unwrap_or(defaults.ws_url),
            api_url: lookup("FEEDSYNC_API_URL").unwrap_or(defaults.api_url),
            reconnect: ReconnectConfig {
                base_delay: millis("FEEDSYNC_RECONNECT_BASE_MS", defaults.reconnect.base_delay),
                max_delay: millis("FEEDSYNC_RECONNECT_MAX_MS", defaults.reconnect.max_delay),
                max_attempts: parse_or(
                    &lookup,
                    "FEEDSYNC_RECONNECT_MAX_ATTEMPTS",
                    defaults.reconnect.max_attempts,
                )
                .unwrap_or(defaults.reconnect.max_attempts),
                cooldown: millis("FEEDSYNC_RECONNECT_COOLDOWN_MS", defaults.reconnect.cooldown),
            },
            heartbeat: HeartbeatConfig {
                interval: millis("FEEDSYNC_HEARTBEAT_MS", defaults.heartbeat.interval),
                ..defaults.heartbeat
            },
            dedup: DedupConfig {
                bucket: millis("FEEDSYNC_DEDUP_BUCKET_MS", defaults.dedup.bucket),
                ..defaults.dedup
            },
            open_timeout: defaults.open_timeout,
        }
    }
}

/// Parse `key` if set; unset yields `Some(default)`, garbage yields `None`
/// after a warning so the caller keeps its default.
fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Option<T> {
    match lookup(key) {
        None => Some(default),
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                crate::log_warn!("Ignoring invalid {}={:?}, using default", key, raw);
                None
            }
        },
    }
}

//! Wire envelopes, topics and close codes for the event connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{ActorId, InboundEvent};

/// Broadcast topic carrying likes, comments and follows for every entity.
pub const ENTITY_EVENTS: &str = "entities";
/// Per-recipient topic carrying notifications and unread counts.
pub const NOTIFICATIONS: &str = "notifications";

/// Normal closure: the peer closed on purpose.
pub const CLOSE_NORMAL: u16 = 1000;
/// Policy violation, used by some gateways for rejected credentials.
pub const CLOSE_POLICY: u16 = 1008;
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
pub const CLOSE_FORBIDDEN: u16 = 4403;

/// Whether a close code means the credential was rejected.
pub fn is_auth_close_code(code: u16) -> bool {
    matches!(code, CLOSE_POLICY | CLOSE_UNAUTHORIZED | CLOSE_FORBIDDEN)
}

/// Whether a server `error` frame code means the credential was rejected.
pub fn is_auth_error_code(code: &str) -> bool {
    matches!(code, "unauthorized" | "forbidden" | "token_expired")
}

/// A named logical stream within the shared connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn entity_events() -> Self {
        Self::new(ENTITY_EVENTS)
    }

    pub fn notifications() -> Self {
        Self::new(NOTIFICATIONS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every frame in either direction is wrapped in an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope<T> {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,
    #[serde(flatten)]
    pub payload: T,
    #[serde(default = "Utc::now")]
    pub ts: DateTime<Utc>,
}

impl<T> WsEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: None,
            payload,
            ts: Utc::now(),
        }
    }

    pub fn on_topic(mut self, topic: Topic) -> Self {
        self.topic = Some(topic);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    Event(InboundEvent),
    Heartbeat,
    Error { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    Subscribe {
        topic: Topic,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<ActorId>,
    },
    Unsubscribe {
        topic: Topic,
    },
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventCategory;

    #[test]
    fn test_server_event_frame_parses() {
        let json = r#"{
            "id": "f-1",
            "topic": "entities",
            "type": "event",
            "data": {
                "entityId": "post-1",
                "actorId": "u2",
                "occurredAt": "2026-03-01T12:00:00Z",
                "category": "entityUnliked"
            },
            "ts": "2026-03-01T12:00:00Z"
        }"#;
        let envelope: WsEnvelope<ServerFrame> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.topic, Some(Topic::entity_events()));
        match envelope.payload {
            ServerFrame::Event(event) => assert_eq!(event.category(), EventCategory::EntityUnliked),
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_without_ts_or_id() {
        let envelope: WsEnvelope<ServerFrame> =
            serde_json::from_str(r#"{"type": "heartbeat"}"#).unwrap();
        assert!(matches!(envelope.payload, ServerFrame::Heartbeat));
        assert!(envelope.topic.is_none());
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = WsEnvelope::new(ClientFrame::Subscribe {
            topic: Topic::notifications(),
            recipient: Some(ActorId::new("u1")),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["data"]["topic"], "notifications");
        assert_eq!(value["data"]["recipient"], "u1");
    }

    #[test]
    fn test_auth_close_codes() {
        assert!(is_auth_close_code(CLOSE_UNAUTHORIZED));
        assert!(is_auth_close_code(CLOSE_POLICY));
        assert!(!is_auth_close_code(CLOSE_NORMAL));
        assert!(!is_auth_close_code(1006));
    }
}

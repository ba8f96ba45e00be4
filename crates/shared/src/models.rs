//! Identifiers, inbound events and authoritative snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// A feed entity (post, comment thread, user profile, inbox).
    EntityId
);
string_id!(
    /// A user acting on or receiving events.
    ActorId
);
string_id!(
    /// A member of a set that is not an actor, e.g. a comment or notification.
    ItemId
);

/// Which reconciled counter a `CountUpdated` event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CounterKind {
    Likes,
    Comments,
    Followers,
    Unread,
}

/// Category-specific part of an inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum EventKind {
    EntityLiked,
    EntityUnliked,
    #[serde(rename_all = "camelCase")]
    CommentAdded { comment_id: ItemId },
    #[serde(rename_all = "camelCase")]
    CommentRemoved { comment_id: ItemId },
    UserFollowed,
    UserUnfollowed,
    #[serde(rename_all = "camelCase")]
    NotificationCreated {
        notification_id: ItemId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    NotificationRead { notification_id: ItemId },
    /// Server-side recount. `members`, when present, is the full authoritative set.
    #[serde(rename_all = "camelCase")]
    CountUpdated {
        counter: CounterKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        members: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u64>,
    },
}

/// Fieldless mirror of [`EventKind`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventCategory {
    EntityLiked,
    EntityUnliked,
    CommentAdded,
    CommentRemoved,
    UserFollowed,
    UserUnfollowed,
    NotificationCreated,
    NotificationRead,
    CountUpdated,
}

impl EventCategory {
    pub const ALL: [EventCategory; 9] = [
        EventCategory::EntityLiked,
        EventCategory::EntityUnliked,
        EventCategory::CommentAdded,
        EventCategory::CommentRemoved,
        EventCategory::UserFollowed,
        EventCategory::UserUnfollowed,
        EventCategory::NotificationCreated,
        EventCategory::NotificationRead,
        EventCategory::CountUpdated,
    ];
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl EventKind {
    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::EntityLiked => EventCategory::EntityLiked,
            EventKind::EntityUnliked => EventCategory::EntityUnliked,
            EventKind::CommentAdded { .. } => EventCategory::CommentAdded,
            EventKind::CommentRemoved { .. } => EventCategory::CommentRemoved,
            EventKind::UserFollowed => EventCategory::UserFollowed,
            EventKind::UserUnfollowed => EventCategory::UserUnfollowed,
            EventKind::NotificationCreated { .. } => EventCategory::NotificationCreated,
            EventKind::NotificationRead { .. } => EventCategory::NotificationRead,
            EventKind::CountUpdated { .. } => EventCategory::CountUpdated,
        }
    }
}

/// A server-pushed event, as delivered to UI handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(entity_id: impl Into<EntityId>, kind: EventKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            actor_id: None,
            recipient_id: None,
            occurred_at: Utc::now(),
            kind,
        }
    }

    pub fn by(mut self, actor: impl Into<ActorId>) -> Self {
        self.actor_id = Some(actor.into());
        self
    }

    pub fn to(mut self, recipient: impl Into<ActorId>) -> Self {
        self.recipient_id = Some(recipient.into());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn category(&self) -> EventCategory {
        self.kind.category()
    }

    /// Item identity carried in the payload, if the category has one.
    ///
    /// Two comments by the same actor within one second are distinct events.
    pub fn item_id(&self) -> Option<&ItemId> {
        match &self.kind {
            EventKind::CommentAdded { comment_id } | EventKind::CommentRemoved { comment_id } => {
                Some(comment_id)
            }
            EventKind::NotificationCreated {
                notification_id, ..
            }
            | EventKind::NotificationRead { notification_id } => Some(notification_id),
            _ => None,
        }
    }
}

/// Authoritative state returned by the request layer (or carried by a recount).
///
/// A membership set, when present, always takes precedence over `count`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl Snapshot {
    pub fn from_members<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: Some(members.into_iter().map(Into::into).collect()),
            count: None,
        }
    }

    pub fn from_count(count: u64) -> Self {
        Self {
            members: None,
            count: Some(count),
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parses_with_flattened_category() {
        let json = r#"{
            "entityId": "post-1",
            "actorId": "u2",
            "occurredAt": "2026-03-01T12:00:00Z",
            "category": "entityLiked"
        }"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.entity_id.as_str(), "post-1");
        assert_eq!(event.actor_id, Some(ActorId::new("u2")));
        assert_eq!(event.recipient_id, None);
        assert_eq!(event.category(), EventCategory::EntityLiked);
    }

    #[test]
    fn test_payload_fields_are_camel_case() {
        let json = r#"{
            "entityId": "inbox-u1",
            "recipientId": "u1",
            "occurredAt": "2026-03-01T12:00:00Z",
            "category": "notificationCreated",
            "notificationId": "n-9"
        }"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.item_id(), Some(&ItemId::new("n-9")));
        assert!(matches!(
            event.kind,
            EventKind::NotificationCreated { summary: None, .. }
        ));
    }

    #[test]
    fn test_count_updated_members_optional() {
        let json = r#"{
            "entityId": "post-1",
            "occurredAt": "2026-03-01T12:00:00Z",
            "category": "countUpdated",
            "counter": "likes",
            "count": 5
        }"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.kind,
            EventKind::CountUpdated {
                counter: CounterKind::Likes,
                members: None,
                count: Some(5),
            }
        );
    }

    #[test]
    fn test_snapshot_deserializes_partial_bodies() {
        let only_count: Snapshot = serde_json::from_str(r#"{"count": 3}"#).unwrap();
        assert_eq!(only_count, Snapshot::from_count(3));

        let both: Snapshot = serde_json::from_str(r#"{"members": ["a", "b"], "count": 7}"#).unwrap();
        assert_eq!(both, Snapshot::from_members(["a", "b"]).with_count(7));
    }
}

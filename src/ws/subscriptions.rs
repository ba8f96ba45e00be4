//! Topics declared on the shared link and routing of inbound frames.

use std::collections::{BTreeMap, BTreeSet};

use feedsync_shared::{ActorId, ClientFrame, InboundEvent, ServerFrame, Topic, WsEnvelope};

use crate::error::ParseError;

/// Restricts a topic to events addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientFilter {
    None,
    Recipient(ActorId),
}

impl RecipientFilter {
    pub fn admits(&self, event: &InboundEvent) -> bool {
        match self {
            RecipientFilter::None => true,
            RecipientFilter::Recipient(me) => event.recipient_id.as_ref() == Some(me),
        }
    }

    fn recipient(&self) -> Option<ActorId> {
        match self {
            RecipientFilter::None => None,
            RecipientFilter::Recipient(actor) => Some(actor.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: Topic,
    pub filter: RecipientFilter,
    active: bool,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn subscribe_frame(&self) -> ClientFrame {
        ClientFrame::Subscribe {
            topic: self.topic.clone(),
            recipient: self.filter.recipient(),
        }
    }
}

/// Why an inbound frame was not delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnknownTopic(Option<Topic>),
    InactiveTopic(Topic),
    NotAddressedToSelf(Topic),
}

/// Outcome of routing one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Event(InboundEvent),
    Heartbeat,
    ServerError { code: String, message: String },
    Dropped(DropReason),
}

/// Declared subscriptions survive reconnects; only their `active` flag tracks
/// the current link.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: BTreeMap<Topic, Subscription>,
    /// Topics filtered to whoever is currently signed in.
    personal: BTreeSet<Topic>,
    identity: Option<ActorId>,
    /// Unsubscribes owed for filters replaced while the link was up.
    retired: Vec<ClientFrame>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or re-declare) a topic. Returns true when a (re)subscribe is
    /// now owed: a new topic, or an existing one whose filter changed.
    pub fn declare(&mut self, topic: Topic, filter: RecipientFilter) -> bool {
        match self.subscriptions.get_mut(&topic) {
            Some(existing) if existing.filter == filter => false,
            Some(existing) => {
                crate::log_debug!("Filter for {} changed; resubscribe pending", topic);
                if existing.active {
                    self.retired.push(ClientFrame::Unsubscribe {
                        topic: existing.topic.clone(),
                    });
                }
                existing.filter = filter;
                existing.active = false;
                true
            }
            None => {
                self.subscriptions.insert(
                    topic.clone(),
                    Subscription {
                        topic,
                        filter,
                        active: false,
                    },
                );
                true
            }
        }
    }

    /// Declare a topic restricted to the current identity. It stays unrouted
    /// until [`bind_identity`](Self::bind_identity) supplies the recipient.
    pub fn declare_personal(&mut self, topic: Topic) {
        self.personal.insert(topic);
    }

    /// The recipient personal topics are currently bound to.
    pub fn identity(&self) -> Option<&ActorId> {
        self.identity.as_ref()
    }

    /// Point every personal topic at `actor`. Called on each open attempt and
    /// whenever the signed-in user changes, so a sign-in as another user never
    /// receives the previous user's events.
    pub fn bind_identity(&mut self, actor: &ActorId) -> bool {
        self.identity = Some(actor.clone());
        let topics: Vec<Topic> = self.personal.iter().cloned().collect();
        let mut changed = false;
        for topic in topics {
            changed |= self.declare(topic, RecipientFilter::Recipient(actor.clone()));
        }
        changed
    }

    /// Nobody is signed in: personal topics go quiet until the next bind.
    pub fn unbind_identity(&mut self) -> bool {
        self.identity = None;
        let mut changed = false;
        for topic in &self.personal {
            if let Some(sub) = self.subscriptions.get_mut(topic) {
                if sub.active {
                    self.retired.push(ClientFrame::Unsubscribe { topic: topic.clone() });
                    sub.active = false;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Frames bringing the link in line with the declarations: owed
    /// unsubscribes first, then a subscribe for every inactive topic.
    /// Personal topics stay down while no identity is bound.
    pub fn activate_all(&mut self) -> Vec<ClientFrame> {
        let unbound = self.identity.is_none();
        let personal = &self.personal;
        let mut frames = std::mem::take(&mut self.retired);
        frames.extend(
            self.subscriptions
                .values_mut()
                .filter(|sub| !sub.active && !(unbound && personal.contains(&sub.topic)))
                .map(|sub| {
                    sub.active = true;
                    sub.subscribe_frame()
                }),
        );
        frames
    }

    /// Marks everything inactive, keeping the declarations for the next link.
    pub fn deactivate_all(&mut self) -> Vec<ClientFrame> {
        self.retired.clear();
        self.subscriptions
            .values_mut()
            .filter(|sub| sub.active)
            .map(|sub| {
                sub.active = false;
                ClientFrame::Unsubscribe {
                    topic: sub.topic.clone(),
                }
            })
            .collect()
    }

    pub fn get(&self, topic: &Topic) -> Option<&Subscription> {
        self.subscriptions.get(topic)
    }

    pub fn active_topics(&self) -> Vec<Topic> {
        self.subscriptions
            .values()
            .filter(|sub| sub.active)
            .map(|sub| sub.topic.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Parse one inbound frame and decide whether it reaches the dispatcher.
    pub fn route(&self, raw: &str) -> Result<Routed, ParseError> {
        let envelope: WsEnvelope<ServerFrame> = serde_json::from_str(raw)?;
        let event = match envelope.payload {
            ServerFrame::Heartbeat => return Ok(Routed::Heartbeat),
            ServerFrame::Error { code, message } => {
                return Ok(Routed::ServerError { code, message })
            }
            ServerFrame::Event(event) => event,
        };

        let Some(sub) = envelope.topic.as_ref().and_then(|t| self.subscriptions.get(t)) else {
            return Ok(Routed::Dropped(DropReason::UnknownTopic(envelope.topic)));
        };
        if !sub.active {
            return Ok(Routed::Dropped(DropReason::InactiveTopic(sub.topic.clone())));
        }
        if self.identity.is_none() && self.personal.contains(&sub.topic) {
            return Ok(Routed::Dropped(DropReason::NotAddressedToSelf(sub.topic.clone())));
        }
        if !sub.filter.admits(&event) {
            return Ok(Routed::Dropped(DropReason::NotAddressedToSelf(sub.topic.clone())));
        }
        Ok(Routed::Event(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_shared::{EventKind, ItemId};

    fn event_frame(topic: &str, event: InboundEvent) -> String {
        serde_json::to_string(&WsEnvelope::new(ServerFrame::Event(event)).on_topic(Topic::new(topic)))
            .unwrap()
    }

    fn notification_for(recipient: &str) -> InboundEvent {
        InboundEvent::new(
            recipient,
            EventKind::NotificationCreated {
                notification_id: ItemId::new("n-1"),
                summary: None,
            },
        )
        .to(recipient)
    }

    #[test]
    fn test_activation_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        registry.declare(Topic::entity_events(), RecipientFilter::None);
        registry.declare(Topic::entity_events(), RecipientFilter::None);

        assert_eq!(registry.activate_all().len(), 1);
        assert!(registry.activate_all().is_empty());
        assert_eq!(registry.active_topics(), vec![Topic::entity_events()]);
    }

    #[test]
    fn test_deactivate_keeps_declarations() {
        let mut registry = SubscriptionRegistry::new();
        registry.declare(Topic::entity_events(), RecipientFilter::None);
        registry.activate_all();

        let frames = registry.deactivate_all();
        assert_eq!(
            frames,
            vec![ClientFrame::Unsubscribe {
                topic: Topic::entity_events()
            }]
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.active_topics().is_empty());
        assert_eq!(registry.activate_all().len(), 1);
    }

    #[test]
    fn test_filter_change_forces_resubscribe() {
        let mut registry = SubscriptionRegistry::new();
        registry.declare_personal(Topic::notifications());
        assert!(registry.is_empty());

        assert!(registry.bind_identity(&ActorId::new("alice")));
        registry.activate_all();
        assert!(!registry.bind_identity(&ActorId::new("alice")));

        assert!(registry.bind_identity(&ActorId::new("bob")));
        let frames = registry.activate_all();
        assert_eq!(
            frames,
            vec![
                ClientFrame::Unsubscribe {
                    topic: Topic::notifications()
                },
                ClientFrame::Subscribe {
                    topic: Topic::notifications(),
                    recipient: Some(ActorId::new("bob")),
                },
            ]
        );
    }

    #[test]
    fn test_filter_change_while_down_sends_no_unsubscribe() {
        let mut registry = SubscriptionRegistry::new();
        registry.declare_personal(Topic::notifications());
        registry.bind_identity(&ActorId::new("alice"));
        registry.activate_all();
        registry.deactivate_all();

        registry.bind_identity(&ActorId::new("bob"));
        assert_eq!(
            registry.activate_all(),
            vec![ClientFrame::Subscribe {
                topic: Topic::notifications(),
                recipient: Some(ActorId::new("bob")),
            }]
        );
    }

    #[test]
    fn test_unbound_identity_silences_personal_topics() {
        let mut registry = SubscriptionRegistry::new();
        registry.declare(Topic::entity_events(), RecipientFilter::None);
        registry.declare_personal(Topic::notifications());
        registry.bind_identity(&ActorId::new("alice"));
        registry.activate_all();

        assert!(registry.unbind_identity());
        assert_eq!(registry.identity(), None);
        assert_eq!(
            registry.activate_all(),
            vec![ClientFrame::Unsubscribe {
                topic: Topic::notifications()
            }]
        );
        assert!(registry.activate_all().is_empty());
        assert_eq!(registry.active_topics(), vec![Topic::entity_events()]);

        let mine = event_frame("notifications", notification_for("alice"));
        assert!(matches!(registry.route(&mine).unwrap(), Routed::Dropped(_)));
    }

    #[test]
    fn test_routes_only_active_topics() {
        let mut registry = SubscriptionRegistry::new();
        registry.declare(Topic::entity_events(), RecipientFilter::None);
        let frame = event_frame("entities", InboundEvent::new("p1", EventKind::EntityLiked).by("u1"));

        assert!(matches!(
            registry.route(&frame).unwrap(),
            Routed::Dropped(DropReason::InactiveTopic(_))
        ));
        registry.activate_all();
        assert!(matches!(registry.route(&frame).unwrap(), Routed::Event(_)));

        let stray = event_frame("presence", InboundEvent::new("p1", EventKind::EntityLiked));
        assert!(matches!(
            registry.route(&stray).unwrap(),
            Routed::Dropped(DropReason::UnknownTopic(Some(_)))
        ));
    }

    #[test]
    fn test_personal_topic_drops_other_recipients() {
        let mut registry = SubscriptionRegistry::new();
        registry.declare_personal(Topic::notifications());
        registry.bind_identity(&ActorId::new("alice"));
        registry.activate_all();

        let mine = event_frame("notifications", notification_for("alice"));
        let theirs = event_frame("notifications", notification_for("bob"));
        assert!(matches!(registry.route(&mine).unwrap(), Routed::Event(_)));
        assert_eq!(
            registry.route(&theirs).unwrap(),
            Routed::Dropped(DropReason::NotAddressedToSelf(Topic::notifications()))
        );
    }

    #[test]
    fn test_heartbeat_and_errors_are_routed() {
        let registry = SubscriptionRegistry::new();
        let heartbeat = serde_json::to_string(&WsEnvelope::new(ServerFrame::Heartbeat)).unwrap();
        assert_eq!(registry.route(&heartbeat).unwrap(), Routed::Heartbeat);

        let error = r#"{"type":"error","data":{"code":"token_expired","message":"expired"}}"#;
        assert_eq!(
            registry.route(error).unwrap(),
            Routed::ServerError {
                code: "token_expired".into(),
                message: "expired".into()
            }
        );
    }

    #[test]
    fn test_malformed_frame_is_parse_error() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.route("{not json").is_err());
        assert!(registry.route(r#"{"type":"mystery"}"#).is_err());
    }
}

//! Dedup ledger.
//!
//! Suppresses an event that arrives twice (e.g. replayed after a reconnect)
//! and the server echo of an action this client already applied locally.
//! Timestamps are bucketed so a locally recorded "I just did this" and the
//! server's timestamp for the same action compare equal despite minor skew;
//! this is an accepted approximation, tuned through [`DedupConfig`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use feedsync_shared::{ActorId, EntityId, EventCategory, EventKind, InboundEvent, ItemId};
use parking_lot::Mutex;

use crate::config::DedupConfig;

/// The process-wide ledger, shared by the driver and every reconciled entity.
pub type SharedLedger = Arc<Mutex<DedupLedger>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub category: EventCategory,
    pub entity_id: EntityId,
    pub actor_id: Option<ActorId>,
    pub item_id: Option<ItemId>,
    pub bucket: i64,
}

impl DedupKey {
    fn same_action(&self, own: &OwnAction, tolerance: u32) -> bool {
        self.category == own.category
            && self.entity_id == own.entity_id
            && self.actor_id.as_ref() == Some(&own.actor_id)
            && self.bucket.abs_diff(own.bucket) <= u64::from(tolerance)
    }
}

#[derive(Debug, Clone)]
struct OwnAction {
    category: EventCategory,
    entity_id: EntityId,
    actor_id: ActorId,
    bucket: i64,
    marked_at: Instant,
}

#[derive(Debug)]
pub struct DedupLedger {
    config: DedupConfig,
    seen: HashMap<DedupKey, Instant>,
    own_actions: Vec<OwnAction>,
}

impl DedupLedger {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            seen: HashMap::new(),
            own_actions: Vec::new(),
        }
    }

    pub fn shared(config: DedupConfig) -> SharedLedger {
        Arc::new(Mutex::new(Self::new(config)))
    }

    pub fn bucket_of(&self, at: DateTime<Utc>) -> i64 {
        let width = self.config.bucket.as_millis().max(1) as i64;
        at.timestamp_millis().div_euclid(width)
    }

    /// Deterministic key for one logical action.
    pub fn key(
        &self,
        category: EventCategory,
        entity_id: &EntityId,
        actor_id: Option<&ActorId>,
        occurred_at: DateTime<Utc>,
    ) -> DedupKey {
        DedupKey {
            category,
            entity_id: entity_id.clone(),
            actor_id: actor_id.cloned(),
            item_id: None,
            bucket: self.bucket_of(occurred_at),
        }
    }

    /// Key for an inbound event, or `None` for snapshot-bearing recounts,
    /// which are idempotent and must never be suppressed.
    pub fn key_for_event(&self, event: &InboundEvent) -> Option<DedupKey> {
        if matches!(event.kind, EventKind::CountUpdated { .. }) {
            return None;
        }
        let mut key = self.key(
            event.category(),
            &event.entity_id,
            event.actor_id.as_ref(),
            event.occurred_at,
        );
        key.item_id = event.item_id().cloned();
        Some(key)
    }

    pub fn admit(&mut self, key: DedupKey) -> bool {
        self.admit_at(key, Instant::now())
    }

    /// Returns `true` and records the key if it has not been seen within the
    /// retention window; `false` means drop.
    pub fn admit_at(&mut self, key: DedupKey, now: Instant) -> bool {
        self.evict(now);

        let tolerance = self.config.echo_tolerance_buckets;
        if let Some(pos) = self
            .own_actions
            .iter()
            .position(|own| key.same_action(own, tolerance))
        {
            // Only the first echo is absorbed by a marker.
            self.own_actions.remove(pos);
            self.seen.insert(key, now);
            return false;
        }

        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, now);
        true
    }

    /// Admit an inbound event. Events without a dedup identity always pass.
    pub fn admit_event(&mut self, event: &InboundEvent) -> bool {
        self.admit_event_at(event, Instant::now())
    }

    pub fn admit_event_at(&mut self, event: &InboundEvent, now: Instant) -> bool {
        match self.key_for_event(event) {
            Some(key) => self.admit_at(key, now),
            None => true,
        }
    }

    pub fn mark_own_action(
        &mut self,
        actor_id: &ActorId,
        category: EventCategory,
        entity_id: &EntityId,
        at: DateTime<Utc>,
    ) {
        self.mark_own_action_at(actor_id, category, entity_id, at, Instant::now());
    }

    /// Record a locally applied action so its server echo is skipped once.
    pub fn mark_own_action_at(
        &mut self,
        actor_id: &ActorId,
        category: EventCategory,
        entity_id: &EntityId,
        at: DateTime<Utc>,
        now: Instant,
    ) {
        self.evict(now);
        self.own_actions.push(OwnAction {
            category,
            entity_id: entity_id.clone(),
            actor_id: actor_id.clone(),
            bucket: self.bucket_of(at),
            marked_at: now,
        });
    }

    /// Forget a marker whose local change was rolled back, so the server's
    /// echo (if the action landed after all) is admitted like any other event.
    /// Returns whether a marker was removed.
    pub fn withdraw_own_action(
        &mut self,
        actor_id: &ActorId,
        category: EventCategory,
        entity_id: &EntityId,
        at: DateTime<Utc>,
    ) -> bool {
        let bucket = self.bucket_of(at);
        match self.own_actions.iter().position(|own| {
            own.category == category
                && own.bucket == bucket
                && &own.entity_id == entity_id
                && &own.actor_id == actor_id
        }) {
            Some(pos) => {
                self.own_actions.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len() + self.own_actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything, e.g. on sign-out.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.own_actions.clear();
    }

    fn evict(&mut self, now: Instant) {
        let retention = self.config.retention;
        let fresh = |at: Instant| now.saturating_duration_since(at) < retention;
        self.seen.retain(|_, at| fresh(*at));
        self.own_actions.retain(|own| fresh(own.marked_at));
    }

    pub fn retention(&self) -> Duration {
        self.config.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ledger(tolerance: u32) -> DedupLedger {
        DedupLedger::new(DedupConfig {
            retention: Duration::from_secs(5),
            bucket: Duration::from_secs(1),
            echo_tolerance_buckets: tolerance,
        })
    }

    fn at_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_767_225_600_000 + ms).unwrap()
    }

    fn like(entity: &str, actor: &str, ms: i64) -> InboundEvent {
        InboundEvent::new(entity, EventKind::EntityLiked)
            .by(actor)
            .at(at_millis(ms))
    }

    #[test]
    fn test_duplicate_event_dropped() {
        let mut ledger = ledger(1);
        let now = Instant::now();
        assert!(ledger.admit_event_at(&like("e", "u2", 100), now));
        assert!(!ledger.admit_event_at(&like("e", "u2", 400), now));
    }

    #[test]
    fn test_own_echo_suppressed_other_actor_admitted() {
        let mut ledger = ledger(1);
        let now = Instant::now();
        let me = ActorId::new("self");
        let entity = EntityId::new("E");
        ledger.mark_own_action_at(&me, EventCategory::EntityLiked, &entity, at_millis(200), now);

        assert!(!ledger.admit_event_at(&like("E", "self", 700), now));
        assert!(ledger.admit_event_at(&like("E", "u2", 700), now));
    }

    #[test]
    fn test_marker_matches_only_its_category() {
        let mut ledger = ledger(1);
        let now = Instant::now();
        let me = ActorId::new("self");
        let entity = EntityId::new("E");
        ledger.mark_own_action_at(&me, EventCategory::EntityLiked, &entity, at_millis(0), now);

        let unlike = InboundEvent::new("E", EventKind::EntityUnliked)
            .by("self")
            .at(at_millis(100));
        assert!(ledger.admit_event_at(&unlike, now));
        assert!(!ledger.admit_event_at(&like("E", "self", 100), now));
    }

    #[test]
    fn test_bucket_boundary_depends_on_tolerance() {
        let me = ActorId::new("self");
        let entity = EntityId::new("E");
        let now = Instant::now();

        // Local stamp at .900 of one second, echo at .100 of the next.
        let mut strict = ledger(0);
        strict.mark_own_action_at(&me, EventCategory::EntityLiked, &entity, at_millis(900), now);
        assert!(strict.admit_event_at(&like("E", "self", 1_100), now));

        let mut tolerant = ledger(1);
        tolerant.mark_own_action_at(&me, EventCategory::EntityLiked, &entity, at_millis(900), now);
        assert!(!tolerant.admit_event_at(&like("E", "self", 1_100), now));

        let mut far = ledger(1);
        far.mark_own_action_at(&me, EventCategory::EntityLiked, &entity, at_millis(900), now);
        assert!(far.admit_event_at(&like("E", "self", 2_100), now));
    }

    #[test]
    fn test_withdrawn_marker_admits_echo() {
        let mut ledger = ledger(1);
        let now = Instant::now();
        let me = ActorId::new("self");
        let entity = EntityId::new("E");
        ledger.mark_own_action_at(&me, EventCategory::EntityLiked, &entity, at_millis(200), now);

        assert!(!ledger.withdraw_own_action(&me, EventCategory::EntityUnliked, &entity, at_millis(200)));
        assert!(ledger.withdraw_own_action(&me, EventCategory::EntityLiked, &entity, at_millis(200)));
        assert!(ledger.is_empty());
        assert!(ledger.admit_event_at(&like("E", "self", 700), now));
    }

    #[test]
    fn test_entries_expire_after_retention() {
        let mut ledger = ledger(1);
        let start = Instant::now();
        assert!(ledger.admit_event_at(&like("e", "u2", 0), start));
        assert_eq!(ledger.len(), 1);

        let later = start + Duration::from_secs(6);
        assert!(ledger.admit_event_at(&like("e", "u2", 0), later));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_expired_marker_no_longer_suppresses() {
        let mut ledger = ledger(1);
        let start = Instant::now();
        let me = ActorId::new("self");
        let entity = EntityId::new("E");
        ledger.mark_own_action_at(&me, EventCategory::EntityLiked, &entity, at_millis(0), start);

        let later = start + Duration::from_secs(5);
        assert!(ledger.admit_event_at(&like("E", "self", 0), later));
    }

    #[test]
    fn test_distinct_comments_in_same_bucket_both_admitted() {
        let mut ledger = ledger(1);
        let now = Instant::now();
        let first = InboundEvent::new(
            "post",
            EventKind::CommentAdded {
                comment_id: ItemId::new("c1"),
            },
        )
        .by("u2")
        .at(at_millis(10));
        let second = InboundEvent::new(
            "post",
            EventKind::CommentAdded {
                comment_id: ItemId::new("c2"),
            },
        )
        .by("u2")
        .at(at_millis(20));
        assert!(ledger.admit_event_at(&first, now));
        assert!(ledger.admit_event_at(&second, now));
    }

    #[test]
    fn test_recounts_bypass_ledger() {
        let mut ledger = ledger(1);
        let now = Instant::now();
        let recount = InboundEvent::new(
            "post",
            EventKind::CountUpdated {
                counter: feedsync_shared::CounterKind::Likes,
                members: None,
                count: Some(3),
            },
        )
        .at(at_millis(0));
        assert!(ledger.admit_event_at(&recount, now));
        assert!(ledger.admit_event_at(&recount, now));
        assert!(ledger.is_empty());
    }
}

//! Optimistic set/counter reconciliation.
//!
//! A [`ReconcilingSet`] holds the authoritative membership (when the server
//! has ever provided one) or a bare fallback count. Local intents apply
//! optimistically, then either a confirmation replaces the state wholesale or
//! a rollback restores the pre-optimistic snapshot and replays whatever other
//! actors did in the meantime.

mod entity;
mod features;

use std::collections::BTreeSet;

use feedsync_shared::Snapshot;

use crate::error::ReconcileError;

pub use entity::{EntityView, ReconciledEntity};
pub use features::{Comments, Feature, Followers, Likes, Unread};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    OptimisticPending,
    Reconciled,
}

/// A local user intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent<M> {
    Add(M),
    Remove(M),
    /// Empty the set, e.g. mark every notification read.
    Clear,
}

impl<M> Intent<M> {
    pub fn action(&self) -> &'static str {
        match self {
            Intent::Add(_) => "add",
            Intent::Remove(_) => "remove",
            Intent::Clear => "clear",
        }
    }

    pub fn member(&self) -> Option<&M> {
        match self {
            Intent::Add(member) | Intent::Remove(member) => Some(member),
            Intent::Clear => None,
        }
    }
}

/// Authoritative state in member form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authoritative<M> {
    pub members: Option<BTreeSet<M>>,
    pub count: Option<u64>,
}

impl<M: Ord + From<String>> From<Snapshot> for Authoritative<M> {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            members: snapshot
                .members
                .map(|members| members.into_iter().map(M::from).collect()),
            count: snapshot.count,
        }
    }
}

/// A change observed from another actor (or a server recount).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<M> {
    Add(M),
    Remove(M),
    Replace(Authoritative<M>),
}

/// Identifies the one in-flight optimistic change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingToken(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Values<M: Ord> {
    /// Once a set has been observed it is always preferred over `count`.
    members: Option<BTreeSet<M>>,
    count: u64,
}

impl<M: Ord + Clone> Values<M> {
    fn display(&self) -> u64 {
        match &self.members {
            Some(members) => members.len() as u64,
            None => self.count,
        }
    }

    fn add(&mut self, member: M) {
        match &mut self.members {
            Some(members) => {
                members.insert(member);
            }
            None => self.count = self.count.saturating_add(1),
        }
    }

    fn remove(&mut self, member: &M) {
        match &mut self.members {
            Some(members) => {
                members.remove(member);
            }
            None => self.count = self.count.saturating_sub(1),
        }
    }

    fn clear(&mut self) {
        if let Some(members) = &mut self.members {
            members.clear();
        }
        self.count = 0;
    }

    fn replace(&mut self, authoritative: Authoritative<M>) {
        match (authoritative.members, authoritative.count) {
            (Some(members), count) => {
                self.count = count.unwrap_or(members.len() as u64);
                self.members = Some(members);
            }
            // A bare count never discards a known set.
            (None, Some(count)) => self.count = count,
            (None, None) => {}
        }
    }

    fn apply_change(&mut self, change: Change<M>) {
        match change {
            Change::Add(member) => self.add(member),
            Change::Remove(member) => self.remove(&member),
            Change::Replace(authoritative) => self.replace(authoritative),
        }
    }

    fn apply_intent(&mut self, intent: Intent<M>) {
        match intent {
            Intent::Add(member) => self.add(member),
            Intent::Remove(member) => self.remove(&member),
            Intent::Clear => self.clear(),
        }
    }
}

#[derive(Debug, Clone)]
struct Pending<M: Ord> {
    token: PendingToken,
    before: Values<M>,
    /// Remote changes seen while pending; replayed over `before` on rollback.
    foreign: Vec<Change<M>>,
}

#[derive(Debug, Clone)]
pub struct ReconcilingSet<M: Ord> {
    current: Values<M>,
    phase: Phase,
    pending: Option<Pending<M>>,
    next_token: u64,
}

impl<M: Ord + Clone> Default for ReconcilingSet<M> {
    fn default() -> Self {
        Self {
            current: Values {
                members: None,
                count: 0,
            },
            phase: Phase::Idle,
            pending: None,
            next_token: 0,
        }
    }
}

impl<M: Ord + Clone> ReconcilingSet<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(authoritative: Authoritative<M>) -> Self {
        let mut set = Self::new();
        set.current.replace(authoritative);
        set
    }

    /// Membership size when a set is known, else the fallback count.
    pub fn display_value(&self) -> u64 {
        self.current.display()
    }

    pub fn members(&self) -> Option<&BTreeSet<M>> {
        self.current.members.as_ref()
    }

    pub fn contains(&self, member: &M) -> bool {
        self.current
            .members
            .as_ref()
            .is_some_and(|members| members.contains(member))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Apply an intent optimistically. Only one may be in flight at a time.
    pub fn begin(&mut self, intent: Intent<M>) -> Result<PendingToken, ReconcileError> {
        if self.pending.is_some() {
            return Err(ReconcileError::Busy);
        }
        self.next_token += 1;
        let token = PendingToken(self.next_token);
        self.pending = Some(Pending {
            token,
            before: self.current.clone(),
            foreign: Vec::new(),
        });
        self.current.apply_intent(intent);
        self.phase = Phase::OptimisticPending;
        Ok(token)
    }

    /// Adopt the server's answer wholesale. Returns false for a stale token.
    pub fn confirm(&mut self, token: PendingToken, authoritative: Authoritative<M>) -> bool {
        if !self.owns(token) {
            return false;
        }
        self.pending = None;
        self.current.replace(authoritative);
        self.phase = Phase::Reconciled;
        true
    }

    /// Restore the pre-optimistic snapshot, then replay foreign changes that
    /// arrived while pending. Returns false for a stale token.
    pub fn rollback(&mut self, token: PendingToken) -> bool {
        if !self.owns(token) {
            return false;
        }
        if let Some(pending) = self.pending.take() {
            let mut restored = pending.before;
            for change in pending.foreign {
                restored.apply_change(change);
            }
            self.current = restored;
        }
        self.phase = Phase::Idle;
        true
    }

    /// Apply a change pushed by the server for another actor.
    pub fn apply_remote(&mut self, change: Change<M>) {
        if let Some(pending) = &mut self.pending {
            pending.foreign.push(change.clone());
        }
        self.current.apply_change(change);
    }

    /// Leave the `Reconciled` phase once the UI has acknowledged it.
    pub fn settle(&mut self) {
        if self.phase == Phase::Reconciled {
            self.phase = Phase::Idle;
        }
    }

    fn owns(&self, token: PendingToken) -> bool {
        self.pending.as_ref().is_some_and(|p| p.token == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_shared::ActorId;

    fn actor(id: &str) -> ActorId {
        ActorId::new(id)
    }

    fn set_of(ids: &[&str]) -> ReconcilingSet<ActorId> {
        ReconcilingSet::seeded(Snapshot::from_members(ids.iter().copied()).into())
    }

    #[test]
    fn test_optimistic_like_then_confirm() {
        let mut likes: ReconcilingSet<ActorId> = ReconcilingSet::new();
        assert_eq!(likes.display_value(), 0);

        let token = likes.begin(Intent::Add(actor("u1"))).unwrap();
        assert_eq!(likes.display_value(), 1);
        assert_eq!(likes.phase(), Phase::OptimisticPending);

        assert!(likes.confirm(token, Snapshot::from_members(["u1"]).into()));
        assert_eq!(likes.display_value(), 1);
        assert!(likes.contains(&actor("u1")));
        assert_eq!(likes.phase(), Phase::Reconciled);

        likes.settle();
        assert_eq!(likes.phase(), Phase::Idle);
    }

    #[test]
    fn test_remote_add_from_other_actor() {
        let mut likes = set_of(&["u1"]);
        likes.apply_remote(Change::Add(actor("u2")));
        assert_eq!(likes.display_value(), 2);
        assert_eq!(
            likes.members().unwrap().iter().cloned().collect::<Vec<_>>(),
            vec![actor("u1"), actor("u2")]
        );
    }

    #[test]
    fn test_remote_add_is_idempotent_for_known_member() {
        let mut likes = set_of(&["u1"]);
        likes.apply_remote(Change::Add(actor("u1")));
        assert_eq!(likes.display_value(), 1);
    }

    #[test]
    fn test_failure_restores_snapshot() {
        let mut likes = set_of(&["u1", "u2"]);
        let token = likes.begin(Intent::Remove(actor("u1"))).unwrap();
        assert_eq!(likes.display_value(), 1);

        assert!(likes.rollback(token));
        assert_eq!(likes.display_value(), 2);
        assert!(likes.contains(&actor("u1")));
        assert_eq!(likes.phase(), Phase::Idle);
        assert!(!likes.is_pending());
    }

    #[test]
    fn test_rollback_replays_foreign_changes() {
        let mut likes = set_of(&["u1"]);
        let token = likes.begin(Intent::Add(actor("me"))).unwrap();
        likes.apply_remote(Change::Add(actor("u2")));
        assert_eq!(likes.display_value(), 3);

        likes.rollback(token);
        assert_eq!(likes.display_value(), 2);
        assert!(likes.contains(&actor("u2")));
        assert!(!likes.contains(&actor("me")));
    }

    #[test]
    fn test_concurrent_intent_is_busy() {
        let mut likes = set_of(&[]);
        let token = likes.begin(Intent::Add(actor("me"))).unwrap();
        assert_eq!(likes.begin(Intent::Remove(actor("me"))), Err(ReconcileError::Busy));
        likes.confirm(token, Snapshot::from_members(["me"]).into());
        assert!(likes.begin(Intent::Remove(actor("me"))).is_ok());
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let mut likes = set_of(&[]);
        let first = likes.begin(Intent::Add(actor("me"))).unwrap();
        likes.rollback(first);
        let second = likes.begin(Intent::Add(actor("me"))).unwrap();

        assert!(!likes.confirm(first, Snapshot::from_members(Vec::<String>::new()).into()));
        assert!(!likes.rollback(first));
        assert_eq!(likes.display_value(), 1);
        assert!(likes.confirm(second, Snapshot::from_members(["me"]).into()));
    }

    #[test]
    fn test_count_never_goes_negative() {
        let mut unread: ReconcilingSet<ActorId> = ReconcilingSet::seeded(Snapshot::from_count(0).into());
        unread.apply_remote(Change::Remove(actor("x")));
        assert_eq!(unread.display_value(), 0);

        let token = unread.begin(Intent::Remove(actor("x"))).unwrap();
        assert_eq!(unread.display_value(), 0);
        unread.rollback(token);
        assert_eq!(unread.display_value(), 0);
    }

    #[test]
    fn test_count_fallback_until_set_observed() {
        let mut likes: ReconcilingSet<ActorId> = ReconcilingSet::seeded(Snapshot::from_count(41).into());
        assert!(likes.members().is_none());
        likes.apply_remote(Change::Add(actor("u9")));
        assert_eq!(likes.display_value(), 42);

        likes.apply_remote(Change::Replace(Snapshot::from_members(["a", "b", "c"]).into()));
        assert_eq!(likes.display_value(), 3);

        // A later bare count does not displace the known set.
        likes.apply_remote(Change::Replace(Snapshot::from_count(100).into()));
        assert_eq!(likes.display_value(), 3);
    }

    #[test]
    fn test_set_wins_over_count_in_same_snapshot() {
        let both = Snapshot {
            members: Some(vec!["a".into(), "b".into()]),
            count: Some(5),
        };
        let seeded: ReconcilingSet<ActorId> = ReconcilingSet::seeded(both.clone().into());
        assert_eq!(seeded.display_value(), 2);

        let mut likes: ReconcilingSet<ActorId> = ReconcilingSet::seeded(Snapshot::from_count(9).into());
        likes.apply_remote(Change::Replace(both.clone().into()));
        assert_eq!(likes.display_value(), 2);

        let token = likes.begin(Intent::Add(actor("me"))).unwrap();
        likes.confirm(token, both.into());
        assert_eq!(likes.display_value(), 2);
        assert!(!likes.contains(&actor("me")));
    }

    #[test]
    fn test_removing_absent_member_leaves_set_unchanged() {
        let mut likes = set_of(&["u1"]);
        likes.apply_remote(Change::Remove(actor("ghost")));
        likes.apply_remote(Change::Remove(actor("ghost")));
        assert_eq!(likes.display_value(), 1);

        likes.apply_remote(Change::Remove(actor("u1")));
        likes.apply_remote(Change::Remove(actor("u1")));
        assert_eq!(likes.display_value(), 0);
        assert!(likes.members().unwrap().is_empty());

        let token = likes.begin(Intent::Remove(actor("u1"))).unwrap();
        assert_eq!(likes.display_value(), 0);
        likes.rollback(token);
        assert_eq!(likes.display_value(), 0);
    }

    #[test]
    fn test_confirmation_replaces_wholesale() {
        let mut likes = set_of(&["u1", "u2"]);
        let token = likes.begin(Intent::Add(actor("me"))).unwrap();
        likes.confirm(token, Snapshot::from_members(["me", "u3"]).into());
        assert_eq!(
            likes.members().unwrap().iter().cloned().collect::<Vec<_>>(),
            vec![actor("me"), actor("u3")]
        );
    }

    #[test]
    fn test_clear_empties_set_and_count() {
        let mut unread = set_of(&["n1", "n2"]);
        let token = unread.begin(Intent::Clear).unwrap();
        assert_eq!(unread.display_value(), 0);
        unread.rollback(token);
        assert_eq!(unread.display_value(), 2);
    }

    #[test]
    fn test_intent_action_names() {
        assert_eq!(Intent::Add(1).action(), "add");
        assert_eq!(Intent::Remove(1).action(), "remove");
        assert_eq!(Intent::<u8>::Clear.action(), "clear");
        assert_eq!(Intent::<u8>::Clear.member(), None);
    }
}

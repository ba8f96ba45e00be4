//! A mounted reconciled counter bound to the shared dispatcher.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use feedsync_shared::{ActorId, EntityId, EventCategory, Snapshot};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::features::Feature;
use super::{Authoritative, Intent, PendingToken, Phase, ReconcilingSet};
use crate::api_client::MutationRequest;
use crate::context::SyncContext;
use crate::dedup::SharedLedger;
use crate::error::ReconcileError;
use crate::ws::Registration;

/// What a view renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityView {
    pub value: u64,
    pub phase: Phase,
}

type Cell<M> = Arc<Mutex<ReconcilingSet<M>>>;

fn publish<M: Ord + Clone>(view: &watch::Sender<EntityView>, set: &ReconcilingSet<M>) -> EntityView {
    let next = EntityView {
        value: set.display_value(),
        phase: set.phase(),
    };
    view.send_replace(next);
    next
}

/// Own-action marker recorded for one submitted intent.
struct EchoMarker<'a> {
    ledger: &'a SharedLedger,
    actor_id: ActorId,
    category: EventCategory,
    entity_id: &'a EntityId,
    at: DateTime<Utc>,
}

impl EchoMarker<'_> {
    /// A rolled-back change no longer matches what is displayed, so its
    /// echo must be applied rather than absorbed.
    fn withdraw(&self) {
        self.ledger
            .lock()
            .withdraw_own_action(&self.actor_id, self.category, self.entity_id, self.at);
    }
}

/// Rolls the optimistic change back if the mutation future is dropped
/// before it resolves (e.g. the component unmounted mid-request).
struct PendingGuard<'a, M: Ord + Clone> {
    cell: &'a Cell<M>,
    view: &'a watch::Sender<EntityView>,
    marker: Option<EchoMarker<'a>>,
    token: PendingToken,
    armed: bool,
}

impl<M: Ord + Clone> PendingGuard<'_, M> {
    fn roll_back(&self, set: &mut ReconcilingSet<M>) -> bool {
        if let Some(marker) = &self.marker {
            marker.withdraw();
        }
        set.rollback(self.token)
    }
}

impl<M: Ord + Clone> Drop for PendingGuard<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            let mut set = self.cell.lock();
            if self.roll_back(&mut set) {
                crate::log_debug!("Abandoned mutation rolled back");
                publish(self.view, &*set);
            }
        }
    }
}

/// Unmounting is dropping: the registrations go with it.
pub struct ReconciledEntity<F: Feature> {
    entity_id: EntityId,
    cell: Cell<F::Member>,
    view: Arc<watch::Sender<EntityView>>,
    ctx: SyncContext,
    _registrations: Vec<Registration>,
    _feature: PhantomData<F>,
}

impl<F: Feature> ReconciledEntity<F> {
    pub fn mount(ctx: &SyncContext, entity_id: impl Into<EntityId>, seed: Snapshot) -> Self {
        let entity_id = entity_id.into();
        let set: ReconcilingSet<F::Member> = ReconcilingSet::seeded(Authoritative::from(seed));
        let (view, _) = watch::channel(EntityView {
            value: set.display_value(),
            phase: set.phase(),
        });
        let cell = Arc::new(Mutex::new(set));
        let view = Arc::new(view);

        let handler = {
            let cell = Arc::clone(&cell);
            let view = Arc::clone(&view);
            let entity_id = entity_id.clone();
            move |event: &feedsync_shared::InboundEvent| {
                if let Some(change) = F::interpret(event, &entity_id) {
                    let mut set = cell.lock();
                    set.apply_remote(change);
                    publish(&view, &*set);
                }
            }
        };
        let registrations = F::CATEGORIES
            .iter()
            .map(|category| ctx.handle().register(*category, handler.clone()))
            .collect();

        Self {
            entity_id,
            cell,
            view,
            ctx: ctx.clone(),
            _registrations: registrations,
            _feature: PhantomData,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn value(&self) -> u64 {
        self.cell.lock().display_value()
    }

    pub fn phase(&self) -> Phase {
        self.cell.lock().phase()
    }

    pub fn contains(&self, member: &F::Member) -> bool {
        self.cell.lock().contains(member)
    }

    pub fn members(&self) -> Option<Vec<F::Member>> {
        self.cell
            .lock()
            .members()
            .map(|members| members.iter().cloned().collect())
    }

    /// Receiver that changes whenever the displayed value or phase does.
    pub fn watch(&self) -> watch::Receiver<EntityView> {
        self.view.subscribe()
    }

    pub fn settle(&self) {
        let mut set = self.cell.lock();
        set.settle();
        publish(&self.view, &*set);
    }

    /// Apply optimistically, request confirmation, then adopt the server's
    /// snapshot or roll back.
    pub async fn submit(&self, intent: Intent<F::Member>) -> Result<EntityView, ReconcileError> {
        let identity = self
            .ctx
            .credentials()
            .current_identity()
            .ok_or(ReconcileError::NotAuthenticated)?;

        let request = MutationRequest {
            feature: F::NAME,
            entity_id: self.entity_id.clone(),
            action: intent.action(),
            member: intent.member().map(ToString::to_string),
        };
        let echo = F::echo_category(&intent);

        let token = {
            let mut set = self.cell.lock();
            let token = set.begin(intent)?;
            publish(&self.view, &*set);
            token
        };
        let marker = echo.map(|category| {
            let marker = EchoMarker {
                ledger: self.ctx.handle().ledger(),
                actor_id: identity.actor_id,
                category,
                entity_id: &self.entity_id,
                at: Utc::now(),
            };
            marker
                .ledger
                .lock()
                .mark_own_action(&marker.actor_id, category, marker.entity_id, marker.at);
            marker
        });

        let mut guard = PendingGuard {
            cell: &self.cell,
            view: &self.view,
            marker,
            token,
            armed: true,
        };
        let result = self.ctx.mutations().mutate(request).await;
        guard.armed = false;

        let mut set = self.cell.lock();
        match result {
            Ok(snapshot) => {
                set.confirm(token, Authoritative::from(snapshot));
                Ok(publish(&self.view, &*set))
            }
            Err(error) => {
                crate::log_warn!(
                    "{} on {} failed ({}); rolling back",
                    F::NAME,
                    self.entity_id,
                    error
                );
                guard.roll_back(&mut set);
                publish(&self.view, &*set);
                Err(error.into())
            }
        }
    }
}

impl<F: Feature<Member = ActorId>> ReconciledEntity<F> {
    /// Add or remove the signed-in user, depending on current membership.
    pub async fn toggle(&self) -> Result<EntityView, ReconcileError> {
        let me = self
            .ctx
            .credentials()
            .current_identity()
            .ok_or(ReconcileError::NotAuthenticated)?
            .actor_id;
        let intent = if self.contains(&me) {
            Intent::Remove(me)
        } else {
            Intent::Add(me)
        };
        self.submit(intent).await
    }
}

//! Dioxus hooks binding handler registrations to component lifetime.
//!
//! Provide a [`SyncContext`] near the root with `use_context_provider`; every
//! hook below reads it from there.

use std::cell::RefCell;
use std::rc::Rc;

use dioxus::prelude::*;
use feedsync_shared::{EntityId, EventCategory, InboundEvent, Snapshot};

use crate::context::SyncContext;
use crate::reconcile::{EntityView, Feature, ReconciledEntity};
use crate::ws::{ConnectionState, Registration};

pub fn use_sync_context() -> SyncContext {
    use_context::<SyncContext>()
}

/// Register `handler` on mount and unregister on unmount. The handler given
/// on the first render is the one that stays registered.
pub fn use_sync_event<H>(category: EventCategory, handler: H)
where
    H: Fn(&InboundEvent) + Send + Sync + 'static,
{
    let ctx = use_sync_context();
    let registration: Rc<RefCell<Option<Registration>>> =
        use_hook(|| Rc::new(RefCell::new(Some(ctx.handle().register(category, handler)))));
    use_drop(move || {
        registration.borrow_mut().take();
    });
}

/// Reactive connection state.
pub fn use_connection_state() -> Signal<ConnectionState> {
    let ctx = use_sync_context();
    let mut state = use_signal(|| ctx.handle().state());
    use_hook(|| {
        let mut changes = ctx.handle().state_changes();
        spawn(async move {
            while changes.changed().await.is_ok() {
                let next = *changes.borrow_and_update();
                state.set(next);
            }
        });
    });
    state
}

/// A mounted reconciled entity plus its reactive view.
pub struct UseReconciled<F: Feature> {
    pub entity: Rc<ReconciledEntity<F>>,
    pub view: Signal<EntityView>,
}

impl<F: Feature> Clone for UseReconciled<F> {
    fn clone(&self) -> Self {
        Self {
            entity: Rc::clone(&self.entity),
            view: self.view,
        }
    }
}

/// Mount a reconciled counter for `entity_id`, seeded from the page's
/// initial load. Dropped (and unregistered) with the component.
pub fn use_reconciled<F: Feature>(entity_id: impl Into<EntityId>, seed: Snapshot) -> UseReconciled<F> {
    let ctx = use_sync_context();
    let entity = use_hook(|| Rc::new(ReconciledEntity::<F>::mount(&ctx, entity_id, seed)));
    let mut view = use_signal(|| *entity.watch().borrow());
    use_hook(|| {
        let mut changes = entity.watch();
        spawn(async move {
            while changes.changed().await.is_ok() {
                let next = *changes.borrow_and_update();
                view.set(next);
            }
        });
    });
    UseReconciled { entity, view }
}

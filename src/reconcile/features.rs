//! How each feature reads inbound events into set changes.

use std::fmt;

use feedsync_shared::{ActorId, CounterKind, EntityId, EventCategory, EventKind, InboundEvent, ItemId};

use super::{Authoritative, Change, Intent};

/// A reconciled counter feature: what its members are, which events move it,
/// and which echo a local intent will produce.
pub trait Feature: Send + Sync + 'static {
    type Member: Ord + Clone + fmt::Debug + fmt::Display + From<String> + Send + Sync + 'static;

    /// Path segment used for confirmation requests.
    const NAME: &'static str;
    const COUNTER: CounterKind;
    const CATEGORIES: &'static [EventCategory];

    /// The change an event implies for `entity_id`, if any.
    fn interpret(event: &InboundEvent, entity_id: &EntityId) -> Option<Change<Self::Member>>;

    /// The category of the server echo the local intent will cause.
    fn echo_category(intent: &Intent<Self::Member>) -> Option<EventCategory>;
}

/// Server recount for `counter` on this entity.
fn recount<M: Ord + From<String>>(
    event: &InboundEvent,
    entity_id: &EntityId,
    expected: CounterKind,
) -> Option<Change<M>> {
    if &event.entity_id != entity_id {
        return None;
    }
    match &event.kind {
        EventKind::CountUpdated {
            counter,
            members,
            count,
        } if *counter == expected => Some(Change::Replace(Authoritative {
            members: members
                .clone()
                .map(|members| members.into_iter().map(M::from).collect()),
            count: *count,
        })),
        _ => None,
    }
}

/// Likes on a post; members are the liking actors.
#[derive(Debug, Clone, Copy)]
pub struct Likes;

impl Feature for Likes {
    type Member = ActorId;

    const NAME: &'static str = "likes";
    const COUNTER: CounterKind = CounterKind::Likes;
    const CATEGORIES: &'static [EventCategory] = &[
        EventCategory::EntityLiked,
        EventCategory::EntityUnliked,
        EventCategory::CountUpdated,
    ];

    fn interpret(event: &InboundEvent, entity_id: &EntityId) -> Option<Change<ActorId>> {
        if &event.entity_id != entity_id {
            return None;
        }
        match (&event.kind, &event.actor_id) {
            (EventKind::EntityLiked, Some(actor)) => Some(Change::Add(actor.clone())),
            (EventKind::EntityUnliked, Some(actor)) => Some(Change::Remove(actor.clone())),
            _ => recount(event, entity_id, Self::COUNTER),
        }
    }

    fn echo_category(intent: &Intent<ActorId>) -> Option<EventCategory> {
        match intent {
            Intent::Add(_) => Some(EventCategory::EntityLiked),
            Intent::Remove(_) => Some(EventCategory::EntityUnliked),
            Intent::Clear => None,
        }
    }
}

/// Followers of a profile; the entity id is the followed user's id.
#[derive(Debug, Clone, Copy)]
pub struct Followers;

impl Feature for Followers {
    type Member = ActorId;

    const NAME: &'static str = "followers";
    const COUNTER: CounterKind = CounterKind::Followers;
    const CATEGORIES: &'static [EventCategory] = &[
        EventCategory::UserFollowed,
        EventCategory::UserUnfollowed,
        EventCategory::CountUpdated,
    ];

    fn interpret(event: &InboundEvent, entity_id: &EntityId) -> Option<Change<ActorId>> {
        if &event.entity_id != entity_id {
            return None;
        }
        match (&event.kind, &event.actor_id) {
            (EventKind::UserFollowed, Some(follower)) => Some(Change::Add(follower.clone())),
            (EventKind::UserUnfollowed, Some(follower)) => Some(Change::Remove(follower.clone())),
            _ => recount(event, entity_id, Self::COUNTER),
        }
    }

    fn echo_category(intent: &Intent<ActorId>) -> Option<EventCategory> {
        match intent {
            Intent::Add(_) => Some(EventCategory::UserFollowed),
            Intent::Remove(_) => Some(EventCategory::UserUnfollowed),
            Intent::Clear => None,
        }
    }
}

/// Comments on a post, keyed by comment id.
#[derive(Debug, Clone, Copy)]
pub struct Comments;

impl Feature for Comments {
    type Member = ItemId;

    const NAME: &'static str = "comments";
    const COUNTER: CounterKind = CounterKind::Comments;
    const CATEGORIES: &'static [EventCategory] = &[
        EventCategory::CommentAdded,
        EventCategory::CommentRemoved,
        EventCategory::CountUpdated,
    ];

    fn interpret(event: &InboundEvent, entity_id: &EntityId) -> Option<Change<ItemId>> {
        if &event.entity_id != entity_id {
            return None;
        }
        match &event.kind {
            EventKind::CommentAdded { comment_id } => Some(Change::Add(comment_id.clone())),
            EventKind::CommentRemoved { comment_id } => Some(Change::Remove(comment_id.clone())),
            _ => recount(event, entity_id, Self::COUNTER),
        }
    }

    fn echo_category(intent: &Intent<ItemId>) -> Option<EventCategory> {
        match intent {
            Intent::Add(_) => Some(EventCategory::CommentAdded),
            Intent::Remove(_) => Some(EventCategory::CommentRemoved),
            Intent::Clear => None,
        }
    }
}

/// Unread notifications in an inbox; the entity id is the inbox owner's id.
#[derive(Debug, Clone, Copy)]
pub struct Unread;

impl Feature for Unread {
    type Member = ItemId;

    const NAME: &'static str = "notifications";
    const COUNTER: CounterKind = CounterKind::Unread;
    const CATEGORIES: &'static [EventCategory] = &[
        EventCategory::NotificationCreated,
        EventCategory::NotificationRead,
        EventCategory::CountUpdated,
    ];

    fn interpret(event: &InboundEvent, entity_id: &EntityId) -> Option<Change<ItemId>> {
        if &event.entity_id != entity_id {
            return None;
        }
        match &event.kind {
            EventKind::NotificationCreated {
                notification_id, ..
            } => Some(Change::Add(notification_id.clone())),
            EventKind::NotificationRead { notification_id } => {
                Some(Change::Remove(notification_id.clone()))
            }
            _ => recount(event, entity_id, Self::COUNTER),
        }
    }

    /// Mark-all-read is confirmed by the response alone; the server sends no
    /// per-notification echo for it.
    fn echo_category(intent: &Intent<ItemId>) -> Option<EventCategory> {
        match intent {
            Intent::Remove(_) => Some(EventCategory::NotificationRead),
            Intent::Add(_) | Intent::Clear => None,
        }
    }
}

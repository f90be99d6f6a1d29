//! Outbound notification delivery.
//!
//! The engine hands every notification to a [`NotificationChannel`] and moves
//! on: delivery is fire-and-forget, at-least-once, and unordered. Receivers
//! feed what arrives into
//! [`ConsistencyEngine::receive_notification`](crate::ConsistencyEngine::receive_notification).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::notification::{Notification, NotificationBacklog};

/// Sends notifications to the other replicas of an entity.
pub trait NotificationChannel<E> {
    /// Queue `notification` for every other replica. Never blocks, never fails.
    fn send(&self, notification: Notification<E>);
}

/// A channel that drops everything, for entities with a single replica.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChannel;

impl<E> NotificationChannel<E> for NoopChannel {
    fn send(&self, _notification: Notification<E>) {}
}

/// In-process broadcast between the replicas of one entity.
///
/// Each registered replica has a [`NotificationBacklog`], so notifications
/// that pile up before the replica drains them are coalesced the same way a
/// network transport would batch them.
#[derive(Debug)]
pub struct InMemoryBroadcast<E> {
    backlogs: RefCell<BTreeMap<String, NotificationBacklog<E>>>,
    max_entries: usize,
}

impl<E> InMemoryBroadcast<E> {
    /// Create a hub whose backlogs merge up to `max_entries` entries.
    pub fn new(max_entries: usize) -> Rc<Self> {
        Rc::new(Self {
            backlogs: RefCell::new(BTreeMap::new()),
            max_entries,
        })
    }

    /// Register `replica` and return the channel it sends through.
    pub fn endpoint(self: &Rc<Self>, replica: impl Into<String>) -> BroadcastEndpoint<E> {
        let replica = replica.into();
        self.backlogs
            .borrow_mut()
            .entry(replica.clone())
            .or_insert_with(|| NotificationBacklog::new(self.max_entries));
        BroadcastEndpoint {
            hub: Rc::clone(self),
            origin: replica,
        }
    }

    /// Take whatever is queued for `replica`.
    pub fn take(&self, replica: &str) -> Option<Notification<E>> {
        self.backlogs.borrow_mut().get_mut(replica)?.take()
    }

    /// Drop whatever is queued for `replica`, as if the messages were lost.
    pub fn discard(&self, replica: &str) -> bool {
        self.take(replica).is_some()
    }

    fn broadcast(&self, origin: &str, notification: Notification<E>)
    where
        E: Clone,
    {
        let mut backlogs = self.backlogs.borrow_mut();
        for (replica, backlog) in backlogs.iter_mut() {
            if replica != origin {
                backlog.push(notification.clone());
            }
        }
    }
}

/// One replica's sending side of an [`InMemoryBroadcast`].
#[derive(Debug)]
pub struct BroadcastEndpoint<E> {
    hub: Rc<InMemoryBroadcast<E>>,
    origin: String,
}

impl<E: Clone> NotificationChannel<E> for BroadcastEndpoint<E> {
    fn send(&self, notification: Notification<E>) {
        tracing::trace!(origin = %self.origin, version = notification.version(), "broadcast");
        self.hub.broadcast(&self.origin, notification);
    }
}

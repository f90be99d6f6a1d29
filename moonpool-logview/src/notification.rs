//! Cross-replica notifications: merging, buffering, and backlog coalescing.
//!
//! After a successful write a replica broadcasts the entries it committed.
//! Receivers apply them directly when they line up with their confirmed
//! version, which saves a read of the primary. Delivery is at-least-once and
//! unordered, so inbound notifications are buffered by their precondition
//! version (`version - updates.len()`) until the gap before them closes.
//!
//! Notifications are an optimisation only. Whenever something cannot be
//! applied exactly, the receiver falls back to reading the primary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default cap on entries carried by one merged notification.
pub const DEFAULT_MAX_ENTRIES_IN_NOTIFICATIONS: usize = 200;

/// Entries committed by `origin`, moving the global version to `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotification<E> {
    /// Global version after the updates.
    pub version: u64,
    /// Replica that performed the write.
    pub origin: String,
    /// `origin`'s write-vector bit after the write. Receivers set this bit
    /// rather than toggling it, since a merged notification may cover
    /// several writes.
    pub origin_bit: bool,
    /// The committed entries, in order.
    pub updates: Vec<E>,
    /// ETag of the primary record after the write.
    pub etag: Option<String>,
}

impl<E> UpdateNotification<E> {
    /// The global version this notification applies on top of.
    pub fn precondition_version(&self) -> u64 {
        self.version.saturating_sub(self.updates.len() as u64)
    }
}

/// A message from one replica of an entity to the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification<E> {
    /// Committed entries that can be applied without reading the primary.
    Update(UpdateNotification<E>),
    /// The global version reached `version`; contents must be read from the primary.
    Version {
        /// The notified global version.
        version: u64,
    },
    /// Several notifications delivered together.
    Batch(Vec<Notification<E>>),
}

impl<E> Notification<E> {
    /// Highest global version this notification announces.
    pub fn version(&self) -> u64 {
        match self {
            Notification::Update(u) => u.version,
            Notification::Version { version } => *version,
            Notification::Batch(items) => items.iter().map(Notification::version).max().unwrap_or(0),
        }
    }
}

/// Coalesce two notifications queued for the same destination.
///
/// Two updates from the same origin that are adjacent in version and fit in
/// `max_entries` combine into one. Anything else degrades to a version-only
/// notification, which makes the receiver read the primary.
pub fn merge<E>(earlier: Notification<E>, later: Notification<E>, max_entries: usize) -> Notification<E> {
    match (earlier, later) {
        (Notification::Update(mut earlier), Notification::Update(later))
            if earlier.origin == later.origin
                && earlier.version + later.updates.len() as u64 == later.version
                && earlier.updates.len() + later.updates.len() < max_entries =>
        {
            earlier.updates.extend(later.updates);
            Notification::Update(UpdateNotification {
                version: later.version,
                origin: later.origin,
                origin_bit: later.origin_bit,
                updates: earlier.updates,
                etag: later.etag,
            })
        }
        (_, later) => Notification::Version {
            version: later.version(),
        },
    }
}

/// Inbound notifications waiting to be applied.
#[derive(Debug)]
pub struct NotificationBuffer<E> {
    updates: BTreeMap<u64, UpdateNotification<E>>,
    last_version_notified: u64,
    refresh_requested: bool,
}

impl<E> Default for NotificationBuffer<E> {
    fn default() -> Self {
        Self {
            updates: BTreeMap::new(),
            last_version_notified: 0,
            refresh_requested: false,
        }
    }
}

impl<E> NotificationBuffer<E> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an inbound notification.
    pub fn receive(&mut self, notification: Notification<E>) {
        match notification {
            Notification::Update(update) => self.receive_update(update),
            Notification::Version { version } => {
                self.last_version_notified = self.last_version_notified.max(version);
            }
            Notification::Batch(items) => {
                for item in items {
                    self.receive(item);
                }
            }
        }
    }

    fn receive_update(&mut self, update: UpdateNotification<E>) {
        if update.updates.len() as u64 > update.version {
            tracing::warn!(
                version = update.version,
                entries = update.updates.len(),
                origin = %update.origin,
                "notification carries more entries than its version, forcing refresh"
            );
            self.refresh_requested = true;
            return;
        }
        let key = update.precondition_version();
        match self.updates.get(&key) {
            None => {
                self.updates.insert(key, update);
            }
            // A merged notification covering more entries supersedes a
            // shorter one from the same origin.
            Some(existing) if existing.origin == update.origin && update.version > existing.version => {
                self.updates.insert(key, update);
            }
            // Redelivery.
            Some(existing) if existing.origin == update.origin => {}
            Some(existing) => {
                tracing::debug!(
                    key,
                    buffered_origin = %existing.origin,
                    origin = %update.origin,
                    "conflicting notifications for one precondition version, forcing refresh"
                );
                self.refresh_requested = true;
            }
        }
    }

    /// Drop notifications whose precondition is already behind `global_version`.
    pub fn discard_stale(&mut self, global_version: u64) -> usize {
        let keep = self.updates.split_off(&global_version);
        std::mem::replace(&mut self.updates, keep).len()
    }

    /// Remove and return the notification that applies on top of `global_version`.
    pub fn pop_ready(&mut self, global_version: u64) -> Option<UpdateNotification<E>> {
        let (&key, _) = self.updates.first_key_value()?;
        if key == global_version {
            self.updates.remove(&key)
        } else {
            None
        }
    }

    /// Whether the primary must be read to catch up with `confirmed_version`.
    /// Clears the conflict flag.
    pub fn take_refresh_needed(&mut self, confirmed_version: u64) -> bool {
        let conflict = std::mem::take(&mut self.refresh_requested);
        conflict || self.last_version_notified > confirmed_version
    }

    /// Number of buffered update notifications.
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Whether no update notifications are buffered.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Precondition versions of the buffered notifications, ascending.
    pub fn buffered_keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.updates.keys().copied()
    }
}

/// Outbound notifications for one destination that have not been delivered.
///
/// Pushing while a notification is already queued merges the two, so a slow
/// destination receives one coalesced message instead of a growing queue.
#[derive(Debug)]
pub struct NotificationBacklog<E> {
    pending: Option<Notification<E>>,
    max_entries: usize,
}

impl<E> NotificationBacklog<E> {
    /// Create an empty backlog merging up to `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            pending: None,
            max_entries,
        }
    }

    /// Queue `notification`, merging it into whatever is already queued.
    pub fn push(&mut self, notification: Notification<E>) {
        self.pending = Some(match self.pending.take() {
            None => notification,
            Some(queued) => merge(queued, notification, self.max_entries),
        });
    }

    /// Take the queued notification for delivery.
    pub fn take(&mut self) -> Option<Notification<E>> {
        self.pending.take()
    }

    /// Whether anything is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_none()
    }
}

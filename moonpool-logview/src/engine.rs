//! The consistency engine: one replica's view of one entity.
//!
//! The engine queues submitted entries, keeps the tentative view (confirmed
//! view plus everything queued), and moves batches to the primary store
//! through a [`StorageAdapter`]. A write whose outcome is unknown is
//! resolved by reading the primary back and comparing the local bit of the
//! write vector with the value the write would have stored.
//!
//! # Work cycle
//!
//! [`work`](ConsistencyEngine::work) runs one cycle:
//!
//! 1. apply buffered notifications that line up with the confirmed version
//! 2. read the primary if this is the first cycle, or if a refresh is due
//!    and there is nothing to write
//! 3. write the queued entries as one batch, retrying until it commits
//!
//! Every operation takes `&mut self`, so at most one read or write is ever in
//! flight for an engine. Wrap the engine in a
//! [`LogViewActor`](crate::LogViewActor) to drive cycles from a task.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::adapter::{StorageAdapter, StorageKind, WriteRequest};
use crate::channel::NotificationChannel;
use crate::config::EngineConfig;
use crate::error::{LogViewError, PrimaryStoreError};
use crate::host::{apply_entries, notify_view_changed, ViewUpdater};
use crate::issue::{IssueKind, IssueTracker, PrimaryIssue};
use crate::notification::{Notification, NotificationBuffer, UpdateNotification};
use crate::stats::LogViewStats;
use crate::store::PrimaryStore;
use crate::time::{TimeProvider, TokioTimeProvider};
use crate::write_vector::WriteVector;

/// What the engine is doing with the primary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No storage operation in progress.
    Idle,
    /// Reading the global state.
    Reading,
    /// Writing a batch.
    Writing,
}

/// A queued, unconfirmed entry.
#[derive(Debug)]
struct Submission<E> {
    entry: E,
    submitted_at: Duration,
    /// Resolved when the entry commits or is dropped as stale.
    ticket: Option<oneshot::Sender<bool>>,
    /// For conditional entries, the log position the entry must land at.
    position: Option<u64>,
}

/// One replica's consistency engine for one entity.
pub struct ConsistencyEngine<V, E, T = TokioTimeProvider> {
    config: EngineConfig,
    adapter: Box<dyn StorageAdapter<V, E>>,
    updater: Rc<dyn ViewUpdater<V, E>>,
    channel: Rc<dyn NotificationChannel<E>>,
    time: T,
    issues: IssueTracker,
    pending: Vec<Submission<E>>,
    tentative: Option<V>,
    notifications: NotificationBuffer<E>,
    need_refresh: bool,
    need_initial_read: bool,
    phase: Phase,
    stats: RefCell<Option<LogViewStats>>,
}

impl<V, E, T> ConsistencyEngine<V, E, T>
where
    V: Clone + Default + Serialize + DeserializeOwned + 'static,
    E: Clone + Serialize + DeserializeOwned + 'static,
    T: TimeProvider,
{
    /// Build an engine that stores its state in `store` with strategy `kind`.
    pub fn with_storage(
        config: EngineConfig,
        kind: StorageKind,
        store: Rc<dyn PrimaryStore>,
        updater: Rc<dyn ViewUpdater<V, E>>,
        channel: Rc<dyn NotificationChannel<E>>,
        time: T,
    ) -> Self {
        let adapter = kind.adapter(store, config.key());
        Self::new(config, adapter, updater, channel, time)
    }
}

impl<V, E, T> ConsistencyEngine<V, E, T>
where
    V: Clone + 'static,
    E: Clone + 'static,
    T: TimeProvider,
{
    /// Assemble an engine from its parts.
    pub fn new(
        config: EngineConfig,
        adapter: Box<dyn StorageAdapter<V, E>>,
        updater: Rc<dyn ViewUpdater<V, E>>,
        channel: Rc<dyn NotificationChannel<E>>,
        time: T,
    ) -> Self {
        let stats = config.stats_enabled().then(LogViewStats::new);
        Self {
            config,
            adapter,
            updater,
            channel,
            time,
            issues: IssueTracker::new(),
            pending: Vec::new(),
            tentative: None,
            notifications: NotificationBuffer::new(),
            need_refresh: false,
            need_initial_read: false,
            phase: Phase::Idle,
            stats: RefCell::new(stats),
        }
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The storage strategy in use.
    pub fn storage_kind(&self) -> StorageKind {
        self.adapter.kind()
    }

    /// What the engine is doing with the primary store.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    // ---- lifecycle ----

    /// Load the entity from the primary store.
    pub async fn activate(&mut self) {
        tracing::debug!(key = %self.config.key(), replica = %self.config.replica_id(), "activating");
        self.need_initial_read = true;
        self.work().await;
    }

    /// Persist everything still queued, then drop the engine.
    pub async fn deactivate(mut self) {
        while self.has_pending_work() {
            self.work().await;
        }
        tracing::debug!(
            key = %self.config.key(),
            replica = %self.config.replica_id(),
            version = self.adapter.global_version(),
            "deactivated"
        );
    }

    /// Whether a work cycle has anything to do.
    pub fn has_pending_work(&self) -> bool {
        !self.pending.is_empty() || self.need_initial_read || self.need_refresh
    }

    // ---- submissions ----

    /// Queue `entry` unconditionally.
    pub fn submit(&mut self, entry: E) {
        self.count("submit");
        tracing::trace!(key = %self.config.key(), "submit");
        let now = self.time.now();
        self.submit_internal(entry, now, None, None);
    }

    /// Queue several entries unconditionally, in order.
    pub fn submit_range(&mut self, entries: impl IntoIterator<Item = E>) {
        self.count("submit_range");
        tracing::trace!(key = %self.config.key(), "submit_range");
        let now = self.time.now();
        for entry in entries {
            self.submit_internal(entry, now, None, None);
        }
    }

    /// Queue `entry` on the condition that it lands right after the entries
    /// seen so far. The ticket resolves `true` once the entry is confirmed at
    /// that position and `false` if another write got there first.
    pub fn try_append(&mut self, entry: E) -> oneshot::Receiver<bool> {
        self.count("try_append");
        tracing::trace!(key = %self.config.key(), "try_append");
        let (tx, rx) = oneshot::channel();
        let position = self.adapter.global_version() + self.pending.len() as u64;
        let now = self.time.now();
        self.submit_internal(entry, now, Some(position), Some(tx));
        rx
    }

    /// Conditional append of several entries, confirmed or rejected together.
    pub fn try_append_range(&mut self, entries: impl IntoIterator<Item = E>) -> oneshot::Receiver<bool> {
        self.count("try_append_range");
        tracing::trace!(key = %self.config.key(), "try_append_range");
        let (tx, rx) = oneshot::channel();
        let mut ticket = Some(tx);
        let mut position = self.adapter.global_version() + self.pending.len() as u64;
        let now = self.time.now();
        for entry in entries {
            self.submit_internal(entry, now, Some(position), ticket.take());
            position += 1;
        }
        // An empty range has nothing that could conflict.
        if let Some(tx) = ticket {
            let _ = tx.send(true);
        }
        rx
    }

    fn submit_internal(
        &mut self,
        entry: E,
        submitted_at: Duration,
        position: Option<u64>,
        ticket: Option<oneshot::Sender<bool>>,
    ) {
        if let Some(view) = self.tentative.as_mut() {
            apply_entries(self.updater.as_ref(), view, [&entry], "submit");
        }
        self.pending.push(Submission {
            entry,
            submitted_at,
            ticket,
            position,
        });
        notify_view_changed(self.updater.as_ref(), true, false, "submit");
    }

    // ---- views ----

    /// The confirmed view with every queued entry applied.
    pub fn tentative_view(&mut self) -> &V {
        self.count("tentative_view");
        let view = match self.tentative.take() {
            Some(view) => view,
            None => {
                let mut view = self.adapter.confirmed_view().clone();
                apply_entries(
                    self.updater.as_ref(),
                    &mut view,
                    self.pending.iter().map(|s| &s.entry),
                    "tentative_view",
                );
                view
            }
        };
        self.tentative.insert(view)
    }

    /// The view of the entries known to be durable.
    pub fn confirmed_view(&self) -> &V {
        self.count("confirmed_view");
        self.adapter.confirmed_view()
    }

    /// Number of entries known to be durable.
    pub fn confirmed_version(&self) -> u64 {
        self.count("confirmed_version");
        self.adapter.global_version()
    }

    /// Queued entries not yet confirmed, in submission order.
    pub fn unconfirmed_suffix(&self) -> impl Iterator<Item = &E> + '_ {
        self.pending.iter().map(|s| &s.entry)
    }

    /// Confirmed entries at positions `from..to`. Log strategy only.
    pub fn retrieve_log_segment(&self, from: u64, to: u64) -> Result<Vec<E>, LogViewError> {
        self.adapter.retrieve_log_segment(from, to)
    }

    /// The latest failure against the primary, until an operation succeeds.
    pub fn unresolved_issue(&self) -> Option<&PrimaryIssue> {
        self.issues.current()
    }

    /// Write vector of the confirmed global state.
    pub fn write_vector(&self) -> &WriteVector {
        self.adapter.write_vector()
    }

    /// ETag of the confirmed global state.
    pub fn etag(&self) -> Option<&str> {
        self.adapter.etag()
    }

    // ---- notifications ----

    /// Buffer a notification from another replica. It is applied by the
    /// next [`process_notifications`](Self::process_notifications).
    pub fn receive_notification(&mut self, notification: Notification<E>) {
        tracing::debug!(
            key = %self.config.key(),
            replica = %self.config.replica_id(),
            version = notification.version(),
            "notification received"
        );
        self.notifications.receive(notification);
    }

    /// Number of buffered update notifications.
    pub fn buffered_notifications(&self) -> usize {
        self.notifications.len()
    }

    /// Apply buffered notifications that follow the confirmed version without
    /// a gap, drop the ones already covered, and schedule a refresh read if a
    /// notification announced a version that was not reached. The host hears
    /// about any confirmed change.
    pub fn process_notifications(&mut self) {
        let mut version = self.adapter.global_version();
        self.apply_notifications();
        self.notify_view_changes(&mut version, 0);
    }

    fn apply_notifications(&mut self) {
        let before = self.adapter.global_version();
        loop {
            let version = self.adapter.global_version();
            let stale = self.notifications.discard_stale(version);
            if stale > 0 {
                tracing::trace!(key = %self.config.key(), version, stale, "discarded stale notifications");
            }
            let Some(update) = self.notifications.pop_ready(version) else {
                break;
            };
            tracing::trace!(
                key = %self.config.key(),
                origin = %update.origin,
                from = version,
                to = update.version,
                "applying notification"
            );
            self.adapter.apply_notification(update, self.updater.as_ref());
        }

        let version = self.adapter.global_version();
        if version != before {
            self.tentative = None;
        }
        if self.notifications.take_refresh_needed(version) {
            tracing::debug!(key = %self.config.key(), version, "notification forces refresh");
            self.need_refresh = true;
        }
    }

    // ---- protocol ----

    /// Read the primary until a read succeeds and adopt its state.
    pub async fn read_async(&mut self) {
        self.phase = Phase::Reading;
        let before = self.adapter.global_version();
        self.read_until_success().await;
        if self.adapter.global_version() != before {
            self.tentative = None;
        }
        self.phase = Phase::Idle;
    }

    async fn read_until_success(&mut self) {
        loop {
            match self.adapter.read(self.updater.as_ref()).await {
                Ok(()) => {
                    self.resolve_issue();
                    return;
                }
                Err(e) => {
                    self.record_issue(IssueKind::ReadFromPrimaryFailed, e);
                    let delay = self.issues.delay_before_retry();
                    self.time.sleep(delay).await;
                }
            }
        }
    }

    /// Write every queued entry as one batch. Returns the number of entries
    /// committed: the whole batch, or 0 if it must be written again.
    ///
    /// Does not dequeue anything; see [`update_primary`](Self::update_primary).
    pub async fn write_async(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        self.phase = Phase::Writing;

        let updates: Vec<E> = self.pending.iter().map(|s| s.entry.clone()).collect();
        let replica = self.config.replica_id().to_string();
        let mut write_vector = self.adapter.write_vector().clone();
        let write_bit = write_vector.flip_bit(&replica);
        let tentative = match self.adapter.kind() {
            StorageKind::Snapshot => self.tentative.take(),
            StorageKind::Log => None,
        };

        let request = WriteRequest {
            updates: &updates,
            tentative,
            write_vector,
        };
        let result = self.adapter.write(request, self.updater.as_ref()).await;

        let committed = match result {
            Ok(()) => {
                self.resolve_issue();
                tracing::debug!(
                    key = %self.config.key(),
                    replica = %replica,
                    version = self.adapter.global_version(),
                    entries = updates.len(),
                    "batch written"
                );
                let count = updates.len();
                let version = self.adapter.global_version();
                // Batches too large to ship make peers read instead.
                let notification = if count < self.config.max_entries_in_notifications() {
                    Notification::Update(UpdateNotification {
                        version,
                        origin: replica,
                        origin_bit: write_bit,
                        updates,
                        etag: self.adapter.etag().map(str::to_string),
                    })
                } else {
                    Notification::Version { version }
                };
                self.channel.send(notification);
                count
            }
            Err(e) => {
                self.record_issue(IssueKind::WriteToPrimaryFailed, e);
                self.resolve_ambiguous_write(&replica, write_bit, updates.len()).await
            }
        };

        self.phase = Phase::Idle;
        committed
    }

    /// After a failed write, read the primary and use the write vector to
    /// tell whether the batch committed anyway.
    async fn resolve_ambiguous_write(&mut self, replica: &str, write_bit: bool, batch: usize) -> usize {
        let delay = self.issues.delay_before_retry();
        self.time.sleep(delay).await;
        self.read_until_success().await;

        let version = self.adapter.global_version();
        if self.adapter.write_vector().get_bit(replica) == write_bit {
            tracing::debug!(
                key = %self.config.key(),
                replica,
                version,
                entries = batch,
                "failed write was committed"
            );
            // The batch is no longer the last thing in the log, so peers get
            // a version signal and read.
            self.channel.send(Notification::Version { version });
            batch
        } else {
            tracing::debug!(key = %self.config.key(), replica, version, "failed write was not committed");
            0
        }
    }

    /// Write queued entries until a batch commits or nothing is left.
    /// Resolves the tickets of committed entries.
    pub async fn update_primary(&mut self) {
        let mut version = self.adapter.global_version();
        loop {
            self.remove_stale_conditional_updates();
            if self.pending.is_empty() {
                return;
            }

            let written = self.write_async().await;
            self.notify_view_changes(&mut version, written);
            if written == 0 {
                continue;
            }

            notify_view_changed(self.updater.as_ref(), false, true, "update_primary");
            let now = self.time.now();
            let mut stats = self.stats.borrow_mut();
            for submission in self.pending.drain(..written) {
                if let Some(ticket) = submission.ticket {
                    let _ = ticket.send(true);
                }
                if let Some(stats) = stats.as_mut() {
                    stats
                        .stabilization_latencies
                        .push(now.saturating_sub(submission.submitted_at));
                }
            }
            return;
        }
    }

    /// Drop conditional entries whose position is no longer reachable.
    ///
    /// Once one conditional entry is stale every conditional entry goes, and
    /// all their tickets resolve `false`.
    fn remove_stale_conditional_updates(&mut self) {
        let version = self.adapter.global_version();
        let stale = self
            .pending
            .iter()
            .enumerate()
            .any(|(pos, s)| matches!(s.position, Some(p) if p != version + pos as u64));
        if !stale {
            return;
        }

        let before = self.pending.len();
        self.pending.retain_mut(|s| {
            if s.position.is_none() {
                return true;
            }
            if let Some(ticket) = s.ticket.take() {
                let _ = ticket.send(false);
            }
            false
        });
        tracing::debug!(
            key = %self.config.key(),
            version,
            dropped = before - self.pending.len(),
            "dropped stale conditional entries"
        );
        self.tentative = None;
        notify_view_changed(self.updater.as_ref(), true, false, "remove_stale_conditional_updates");
    }

    /// Tell the host which views changed since `version` was observed.
    /// `written` entries of this replica's own were committed in between.
    fn notify_view_changes(&mut self, version: &mut u64, written: usize) {
        let current = self.adapter.global_version();
        let tentative_changed = current != *version + written as u64;
        let confirmed_changed = current != *version;
        if tentative_changed || confirmed_changed {
            self.tentative = None;
            notify_view_changed(
                self.updater.as_ref(),
                tentative_changed,
                confirmed_changed,
                "notify_view_changes",
            );
            *version = current;
        }
    }

    /// Run one work cycle.
    pub async fn work(&mut self) {
        self.process_notifications();
        let mut version = self.adapter.global_version();

        let have_to_write = !self.pending.is_empty();
        let have_to_read = self.need_initial_read || (self.need_refresh && !have_to_write);
        tracing::debug!(
            key = %self.config.key(),
            replica = %self.config.replica_id(),
            version,
            have_to_read,
            have_to_write,
            "work cycle"
        );

        if have_to_read {
            self.need_refresh = false;
            self.need_initial_read = false;
            self.read_async().await;
            self.notify_view_changes(&mut version, 0);
        }

        if have_to_write {
            self.need_refresh = false;
            self.need_initial_read = false;
            self.update_primary().await;
            self.count("writeback");
        }
    }

    /// Read the latest state from the primary, writing queued entries first
    /// if there are any.
    pub async fn synchronize(&mut self) {
        self.count("synchronize");
        tracing::debug!(key = %self.config.key(), "synchronize");
        self.need_refresh = true;
        self.work().await;
    }

    /// Return once every entry queued so far is confirmed.
    pub async fn confirm_submitted_entries(&mut self) {
        self.count("confirm_submitted_entries");
        while !self.pending.is_empty() {
            self.work().await;
        }
    }

    // ---- issues ----

    fn record_issue(&mut self, kind: IssueKind, error: PrimaryStoreError) {
        let now = self.time.now();
        let issue = self
            .issues
            .record(kind, error, now, self.config.backoff().as_ref());
        tracing::debug!(
            key = %self.config.key(),
            replica = %self.config.replica_id(),
            version = self.adapter.global_version(),
            issue = %issue,
            "primary operation failed"
        );
    }

    fn resolve_issue(&mut self) {
        if let Some(issue) = self.issues.resolve() {
            tracing::debug!(
                key = %self.config.key(),
                replica = %self.config.replica_id(),
                failures = issue.consecutive_failures,
                "primary issue resolved"
            );
        }
    }

    // ---- statistics ----

    /// Start collecting statistics, resetting any collected so far.
    pub fn enable_stats(&mut self) {
        *self.stats.get_mut() = Some(LogViewStats::new());
    }

    /// Stop collecting statistics.
    pub fn disable_stats(&mut self) {
        *self.stats.get_mut() = None;
    }

    /// Statistics collected so far, if enabled.
    pub fn stats(&self) -> Option<LogViewStats> {
        self.stats.borrow().clone()
    }

    fn count(&self, event: &'static str) {
        if let Some(stats) = self.stats.borrow_mut().as_mut() {
            stats.count(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::adapter::StorageKind;
    use crate::channel::NoopChannel;
    use crate::error::UpdateViewError;
    use crate::issue::FixedBackoff;
    use crate::store::InMemoryPrimaryStore;

    /// Records `on_view_changed` calls.
    #[derive(Default)]
    struct Recorder {
        changes: RefCell<Vec<(bool, bool)>>,
    }

    impl ViewUpdater<Vec<u32>, u32> for Recorder {
        fn update_view(&self, view: &mut Vec<u32>, entry: &u32) -> Result<(), UpdateViewError> {
            view.push(*entry);
            Ok(())
        }

        fn on_view_changed(&self, tentative: bool, confirmed: bool) -> Result<(), UpdateViewError> {
            self.changes.borrow_mut().push((tentative, confirmed));
            Ok(())
        }
    }

    fn config(replica: &str) -> EngineConfig {
        EngineConfig::builder("entity", replica)
            .backoff(Rc::new(FixedBackoff(Duration::ZERO)))
            .stats_enabled(true)
            .build()
            .expect("valid config")
    }

    fn engine(
        store: &Rc<InMemoryPrimaryStore>,
        replica: &str,
        kind: StorageKind,
    ) -> (ConsistencyEngine<Vec<u32>, u32>, Rc<Recorder>) {
        let recorder = Rc::new(Recorder::default());
        let engine = ConsistencyEngine::with_storage(
            config(replica),
            kind,
            store.clone(),
            recorder.clone(),
            Rc::new(NoopChannel),
            TokioTimeProvider::new(),
        );
        (engine, recorder)
    }

    #[tokio::test]
    async fn test_submit_updates_tentative_view_only() {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let (mut engine, recorder) = engine(&store, "r1", StorageKind::Log);
        engine.activate().await;

        assert!(engine.tentative_view().is_empty());
        engine.submit(1);
        engine.submit_range([2, 3]);
        assert_eq!(engine.tentative_view(), &vec![1, 2, 3]);
        assert!(engine.confirmed_view().is_empty());
        assert_eq!(engine.unconfirmed_suffix().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(recorder.changes.borrow().contains(&(true, false)));

        engine.confirm_submitted_entries().await;
        assert_eq!(engine.confirmed_version(), 3);
        assert_eq!(engine.confirmed_view(), &vec![1, 2, 3]);
        assert_eq!(engine.tentative_view(), &vec![1, 2, 3]);
        assert_eq!(engine.unconfirmed_suffix().count(), 0);
        assert!(recorder.changes.borrow().contains(&(false, true)));
        assert_eq!(store.successful_writes(), 1);
    }

    #[tokio::test]
    async fn test_try_append_resolves_tickets() {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let (mut engine, _) = engine(&store, "r1", StorageKind::Snapshot);
        engine.activate().await;

        let single = engine.try_append(1);
        let range = engine.try_append_range([2, 3]);
        engine.confirm_submitted_entries().await;
        assert_eq!(single.await, Ok(true));
        assert_eq!(range.await, Ok(true));
        assert_eq!(engine.confirmed_view(), &vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stale_conditional_entries_are_dropped() {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let (mut a, _) = engine(&store, "a", StorageKind::Log);
        let (mut b, _) = engine(&store, "b", StorageKind::Log);
        a.activate().await;
        b.activate().await;

        let ticket = a.try_append(10);
        a.submit(11);
        b.submit(20);
        b.confirm_submitted_entries().await;

        // `a` expected position 0, which `b` now holds.
        a.confirm_submitted_entries().await;
        assert_eq!(ticket.await, Ok(false));
        assert_eq!(a.confirmed_view(), &vec![20, 11]);
        assert_eq!(a.confirmed_version(), 2);
    }

    #[tokio::test]
    async fn test_applied_notification_reports_view_change() {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let (mut engine, recorder) = engine(&store, "r1", StorageKind::Snapshot);
        engine.activate().await;
        recorder.changes.borrow_mut().clear();

        engine.receive_notification(Notification::Update(UpdateNotification {
            version: 1,
            origin: "r2".to_string(),
            origin_bit: true,
            updates: vec![5],
            etag: None,
        }));
        engine.process_notifications();
        assert_eq!(engine.confirmed_view(), &vec![5]);
        assert_eq!(*recorder.changes.borrow(), vec![(true, true)]);

        // Nothing new to apply, nothing to report.
        engine.process_notifications();
        assert_eq!(recorder.changes.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_range_is_trivially_accepted() {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let (mut engine, _) = engine(&store, "r1", StorageKind::Log);
        let ticket = engine.try_append_range(Vec::new());
        assert_eq!(ticket.await, Ok(true));
        assert!(!engine.has_pending_work());
    }

    #[tokio::test]
    async fn test_stats_are_counted() {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let (mut engine, _) = engine(&store, "r1", StorageKind::Log);
        engine.activate().await;
        engine.submit(1);
        let _ = engine.confirmed_version();
        let _ = engine.tentative_view();
        engine.synchronize().await;

        let stats = engine.stats().expect("stats enabled");
        assert_eq!(stats.counter("submit"), 1);
        assert_eq!(stats.counter("confirmed_version"), 1);
        assert_eq!(stats.counter("tentative_view"), 1);
        assert_eq!(stats.counter("synchronize"), 1);
        assert_eq!(stats.counter("writeback"), 1);
        assert_eq!(stats.stabilization_latencies.len(), 1);

        engine.disable_stats();
        assert!(engine.stats().is_none());
        engine.enable_stats();
        assert_eq!(engine.stats().map(|s| s.counter("submit")), Some(0));
    }

    #[tokio::test]
    async fn test_synchronize_reads_remote_writes() {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let (mut a, _) = engine(&store, "a", StorageKind::Snapshot);
        let (mut b, recorder) = engine(&store, "b", StorageKind::Snapshot);
        a.activate().await;
        b.activate().await;

        a.submit_range([1, 2]);
        a.confirm_submitted_entries().await;
        assert_eq!(b.confirmed_version(), 0);

        b.synchronize().await;
        assert_eq!(b.confirmed_version(), 2);
        assert_eq!(b.confirmed_view(), &vec![1, 2]);
        assert!(recorder.changes.borrow().contains(&(true, true)));
    }

    #[tokio::test]
    async fn test_deactivate_flushes_pending() {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let (mut engine, _) = engine(&store, "r1", StorageKind::Log);
        engine.activate().await;
        engine.submit_range([4, 5, 6]);
        engine.deactivate().await;

        let (mut reloaded, _) = self::engine(&store, "r1", StorageKind::Log);
        reloaded.activate().await;
        assert_eq!(reloaded.confirmed_view(), &vec![4, 5, 6]);
        assert_eq!(reloaded.retrieve_log_segment(1, 3), Ok(vec![5, 6]));
    }
}

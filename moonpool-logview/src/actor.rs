//! Single-owner task wrapper around a [`ConsistencyEngine`].
//!
//! [`LogViewActor::spawn`] moves the engine into a `spawn_local` task that
//! owns it for its whole life. Callers talk to it through a cloneable handle
//! over an mpsc queue; commands are handled one at a time, and a work cycle
//! runs whenever the queue drains and the engine has something to do. Many
//! submissions that arrive while a write is in flight end up in one batch.
//!
//! Must be spawned from within a `tokio::task::LocalSet`.

use tokio::sync::{mpsc, oneshot};

use crate::engine::ConsistencyEngine;
use crate::error::LogViewError;
use crate::notification::Notification;
use crate::time::TimeProvider;

/// Capacity of the command queue of one actor.
pub const LOG_VIEW_QUEUE_SIZE: usize = 128;

/// Point-in-time copy of an engine's views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot<V> {
    /// The confirmed view.
    pub confirmed: V,
    /// The confirmed version.
    pub confirmed_version: u64,
    /// The tentative view.
    pub tentative: V,
    /// Number of unconfirmed entries.
    pub pending: usize,
}

enum Command<V, E> {
    Submit(E),
    SubmitRange(Vec<E>),
    TryAppend {
        entry: E,
        reply: oneshot::Sender<oneshot::Receiver<bool>>,
    },
    TryAppendRange {
        entries: Vec<E>,
        reply: oneshot::Sender<oneshot::Receiver<bool>>,
    },
    ConfirmSubmitted {
        reply: oneshot::Sender<()>,
    },
    Synchronize {
        reply: oneshot::Sender<()>,
    },
    Notify(Notification<E>),
    Snapshot {
        reply: oneshot::Sender<ViewSnapshot<V>>,
    },
    Segment {
        from: u64,
        to: u64,
        reply: oneshot::Sender<Result<Vec<E>, LogViewError>>,
    },
    Deactivate {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to an engine running in its own task.
pub struct LogViewActor<V, E> {
    sender: mpsc::Sender<Command<V, E>>,
}

impl<V, E> Clone for LogViewActor<V, E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<V, E> LogViewActor<V, E>
where
    V: Clone + 'static,
    E: Clone + 'static,
{
    /// Activate `engine` in a new local task and return its handle.
    pub fn spawn<T: TimeProvider + 'static>(engine: ConsistencyEngine<V, E, T>) -> Self {
        let (sender, receiver) = mpsc::channel(LOG_VIEW_QUEUE_SIZE);
        tokio::task::spawn_local(run_command_loop(engine, receiver));
        Self { sender }
    }

    /// Queue an entry.
    pub async fn submit(&self, entry: E) -> Result<(), LogViewError> {
        self.send(Command::Submit(entry)).await
    }

    /// Queue several entries.
    pub async fn submit_range(&self, entries: Vec<E>) -> Result<(), LogViewError> {
        self.send(Command::SubmitRange(entries)).await
    }

    /// Conditionally append an entry and wait for the outcome.
    pub async fn try_append(&self, entry: E) -> Result<bool, LogViewError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::TryAppend { entry, reply }).await?;
        let ticket = rx.await.map_err(|_| LogViewError::EngineStopped)?;
        ticket.await.map_err(|_| LogViewError::EngineStopped)
    }

    /// Conditionally append several entries and wait for the outcome.
    pub async fn try_append_range(&self, entries: Vec<E>) -> Result<bool, LogViewError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::TryAppendRange { entries, reply }).await?;
        let ticket = rx.await.map_err(|_| LogViewError::EngineStopped)?;
        ticket.await.map_err(|_| LogViewError::EngineStopped)
    }

    /// Wait until everything queued so far is confirmed.
    pub async fn confirm_submitted_entries(&self) -> Result<(), LogViewError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ConfirmSubmitted { reply }).await?;
        rx.await.map_err(|_| LogViewError::EngineStopped)
    }

    /// Catch up with the primary.
    pub async fn synchronize(&self) -> Result<(), LogViewError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Synchronize { reply }).await?;
        rx.await.map_err(|_| LogViewError::EngineStopped)
    }

    /// Deliver a notification from another replica.
    pub async fn notify(&self, notification: Notification<E>) -> Result<(), LogViewError> {
        self.send(Command::Notify(notification)).await
    }

    /// Copy the current views.
    pub async fn snapshot(&self) -> Result<ViewSnapshot<V>, LogViewError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| LogViewError::EngineStopped)
    }

    /// Confirmed entries at positions `from..to`.
    pub async fn retrieve_log_segment(&self, from: u64, to: u64) -> Result<Vec<E>, LogViewError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Segment { from, to, reply }).await?;
        rx.await.map_err(|_| LogViewError::EngineStopped)?
    }

    /// Flush queued entries and stop the task.
    pub async fn deactivate(self) -> Result<(), LogViewError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Deactivate { reply }).await?;
        rx.await.map_err(|_| LogViewError::EngineStopped)
    }

    async fn send(&self, command: Command<V, E>) -> Result<(), LogViewError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| LogViewError::EngineStopped)
    }
}

/// Whether the loop keeps going after a command.
enum Flow {
    Continue,
    Stop(oneshot::Sender<()>),
}

async fn run_command_loop<V, E, T>(
    mut engine: ConsistencyEngine<V, E, T>,
    mut receiver: mpsc::Receiver<Command<V, E>>,
) where
    V: Clone + 'static,
    E: Clone + 'static,
    T: TimeProvider,
{
    let key = engine.config().key().to_string();
    tracing::debug!(key = %key, "log view actor started");
    engine.activate().await;

    while let Some(command) = receiver.recv().await {
        let mut next = Some(command);
        while let Some(command) = next.take() {
            if let Flow::Stop(reply) = handle_command(&mut engine, command).await {
                engine.deactivate().await;
                let _ = reply.send(());
                tracing::debug!(key = %key, "log view actor stopped");
                return;
            }
            next = receiver.try_recv().ok();
        }

        if engine.has_pending_work() {
            engine.work().await;
        }
    }

    // Every handle is gone.
    engine.deactivate().await;
    tracing::debug!(key = %key, "log view actor stopped");
}

async fn handle_command<V, E, T>(engine: &mut ConsistencyEngine<V, E, T>, command: Command<V, E>) -> Flow
where
    V: Clone + 'static,
    E: Clone + 'static,
    T: TimeProvider,
{
    match command {
        Command::Submit(entry) => engine.submit(entry),
        Command::SubmitRange(entries) => engine.submit_range(entries),
        Command::TryAppend { entry, reply } => {
            let _ = reply.send(engine.try_append(entry));
        }
        Command::TryAppendRange { entries, reply } => {
            let _ = reply.send(engine.try_append_range(entries));
        }
        Command::ConfirmSubmitted { reply } => {
            engine.confirm_submitted_entries().await;
            let _ = reply.send(());
        }
        Command::Synchronize { reply } => {
            engine.synchronize().await;
            let _ = reply.send(());
        }
        Command::Notify(notification) => {
            engine.receive_notification(notification);
            engine.process_notifications();
        }
        Command::Snapshot { reply } => {
            let tentative = engine.tentative_view().clone();
            let _ = reply.send(ViewSnapshot {
                confirmed: engine.confirmed_view().clone(),
                confirmed_version: engine.confirmed_version(),
                tentative,
                pending: engine.unconfirmed_suffix().count(),
            });
        }
        Command::Segment { from, to, reply } => {
            let _ = reply.send(engine.retrieve_log_segment(from, to));
        }
        Command::Deactivate { reply } => return Flow::Stop(reply),
    }
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;
    use crate::adapter::StorageKind;
    use crate::channel::NoopChannel;
    use crate::config::EngineConfig;
    use crate::error::UpdateViewError;
    use crate::host::ViewUpdater;
    use crate::issue::FixedBackoff;
    use crate::notification::UpdateNotification;
    use crate::store::InMemoryPrimaryStore;
    use crate::time::TokioTimeProvider;

    fn add(view: &mut i64, entry: &i64) -> Result<(), UpdateViewError> {
        *view += *entry;
        Ok(())
    }

    fn spawn_actor(store: &Rc<InMemoryPrimaryStore>, replica: &str) -> LogViewActor<i64, i64> {
        let config = EngineConfig::builder("Counter/1", replica)
            .backoff(Rc::new(FixedBackoff(Duration::ZERO)))
            .build()
            .expect("valid config");
        let engine: ConsistencyEngine<i64, i64> = ConsistencyEngine::with_storage(
            config,
            StorageKind::Snapshot,
            store.clone(),
            Rc::new(add),
            Rc::new(NoopChannel),
            TokioTimeProvider::new(),
        );
        LogViewActor::spawn(engine)
    }

    #[tokio::test]
    async fn test_actor_confirms_submissions() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(InMemoryPrimaryStore::new());
                let actor = spawn_actor(&store, "r1");

                actor.submit(5).await.expect("submit");
                actor.submit_range(vec![1, 2]).await.expect("submit range");
                assert!(actor.try_append(10).await.expect("try append"));
                actor.confirm_submitted_entries().await.expect("confirm");

                let snapshot = actor.snapshot().await.expect("snapshot");
                assert_eq!(snapshot.confirmed, 18);
                assert_eq!(snapshot.confirmed_version, 4);
                assert_eq!(snapshot.tentative, 18);
                assert_eq!(snapshot.pending, 0);

                assert_eq!(
                    actor.retrieve_log_segment(0, 1).await,
                    Err(LogViewError::SegmentUnsupported("snapshot"))
                );
                actor.deactivate().await.expect("deactivate");
            })
            .await;
    }

    /// Sums entries and counts confirmed-view changes.
    #[derive(Default)]
    struct Counter {
        confirmed_changes: std::cell::Cell<usize>,
    }

    impl ViewUpdater<i64, i64> for Counter {
        fn update_view(&self, view: &mut i64, entry: &i64) -> Result<(), UpdateViewError> {
            add(view, entry)
        }

        fn on_view_changed(&self, _tentative: bool, confirmed: bool) -> Result<(), UpdateViewError> {
            if confirmed {
                self.confirmed_changes.set(self.confirmed_changes.get() + 1);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notified_actor_reports_view_change() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(InMemoryPrimaryStore::new());
                let counter = Rc::new(Counter::default());
                let config = EngineConfig::builder("Counter/1", "r1")
                    .backoff(Rc::new(FixedBackoff(Duration::ZERO)))
                    .build()
                    .expect("valid config");
                let engine: ConsistencyEngine<i64, i64> = ConsistencyEngine::with_storage(
                    config,
                    StorageKind::Snapshot,
                    store.clone(),
                    counter.clone(),
                    Rc::new(NoopChannel),
                    TokioTimeProvider::new(),
                );
                let actor = LogViewActor::spawn(engine);
                actor.synchronize().await.expect("sync");
                let before = counter.confirmed_changes.get();

                actor
                    .notify(Notification::Update(UpdateNotification {
                        version: 1,
                        origin: "r2".to_string(),
                        origin_bit: true,
                        updates: vec![5],
                        etag: None,
                    }))
                    .await
                    .expect("notify");
                let snapshot = actor.snapshot().await.expect("snapshot");
                assert_eq!(snapshot.confirmed, 5);
                assert_eq!(snapshot.confirmed_version, 1);
                assert_eq!(counter.confirmed_changes.get(), before + 1);

                actor.deactivate().await.expect("deactivate");
            })
            .await;
    }

    #[tokio::test]
    async fn test_stopped_actor_reports_engine_stopped() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(InMemoryPrimaryStore::new());
                let actor = spawn_actor(&store, "r1");
                let other = actor.clone();
                actor.deactivate().await.expect("deactivate");

                assert_eq!(other.submit(1).await, Err(LogViewError::EngineStopped));
                assert_eq!(other.snapshot().await, Err(LogViewError::EngineStopped));
            })
            .await;
    }
}

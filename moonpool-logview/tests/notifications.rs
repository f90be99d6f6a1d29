//! Replicas keeping up with each other through notifications.

mod common;

use std::rc::Rc;
use std::time::Duration;

use moonpool_logview::{
    ConsistencyEngine, EngineConfig, FixedBackoff, InMemoryBroadcast, InMemoryPrimaryStore,
    Notification, PrimaryStore, StorageKind, TokioTimeProvider, UpdateNotification,
    UpdateViewError,
};

type Engine = ConsistencyEngine<Vec<String>, String>;

fn append(view: &mut Vec<String>, entry: &String) -> Result<(), UpdateViewError> {
    view.push(entry.clone());
    Ok(())
}

fn engine(
    store: Rc<dyn PrimaryStore>,
    hub: &Rc<InMemoryBroadcast<String>>,
    replica: &str,
    kind: StorageKind,
    max_entries: usize,
) -> Engine {
    let config = EngineConfig::builder("Chat/room-1", replica)
        .backoff(Rc::new(FixedBackoff(Duration::ZERO)))
        .max_entries_in_notifications(max_entries)
        .build()
        .expect("valid config");
    ConsistencyEngine::with_storage(
        config,
        kind,
        store,
        Rc::new(append),
        Rc::new(hub.endpoint(replica)),
        TokioTimeProvider::new(),
    )
}

fn entries(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

#[tokio::test]
async fn test_notification_saves_a_read() {
    common::init_tracing();
    for kind in [StorageKind::Log, StorageKind::Snapshot] {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let hub = InMemoryBroadcast::new(200);
        let mut a = engine(store.clone(), &hub, "a", kind, 200);
        let mut b = engine(store.clone(), &hub, "b", kind, 200);
        a.activate().await;
        b.activate().await;

        a.submit_range(entries(&["hello", "world"]));
        a.confirm_submitted_entries().await;

        let notification = hub.take("b").expect("b was notified");
        assert_eq!(notification.version(), 2);
        b.receive_notification(notification);
        b.work().await;

        assert_eq!(b.confirmed_version(), 2, "{kind}");
        assert_eq!(b.confirmed_view(), &entries(&["hello", "world"]));
        assert_eq!(b.etag(), a.etag());

        // b can write on top without a conflict.
        b.submit("bye".to_string());
        b.confirm_submitted_entries().await;
        assert_eq!(store.successful_writes(), 2);
        assert!(b.unresolved_issue().is_none());
    }
}

#[tokio::test]
async fn test_notification_replay_is_idempotent() {
    common::init_tracing();
    let store = Rc::new(InMemoryPrimaryStore::new());
    let hub = InMemoryBroadcast::new(200);
    let mut a = engine(store.clone(), &hub, "a", StorageKind::Log, 200);
    let mut b = engine(store.clone(), &hub, "b", StorageKind::Log, 200);
    a.activate().await;
    b.activate().await;

    a.submit("x".to_string());
    a.confirm_submitted_entries().await;
    let notification = hub.take("b").expect("b was notified");

    for _ in 0..3 {
        b.receive_notification(notification.clone());
        b.process_notifications();
    }
    assert_eq!(b.confirmed_version(), 1);
    assert_eq!(b.confirmed_view(), &entries(&["x"]));
    assert_eq!(b.buffered_notifications(), 0);
}

#[tokio::test]
async fn test_backlog_merges_consecutive_writes() {
    common::init_tracing();
    let store = Rc::new(InMemoryPrimaryStore::new());
    let hub = InMemoryBroadcast::new(200);
    let mut a = engine(store.clone(), &hub, "a", StorageKind::Log, 200);
    let mut b = engine(store.clone(), &hub, "b", StorageKind::Log, 200);
    a.activate().await;
    b.activate().await;

    for word in ["one", "two", "three"] {
        a.submit(word.to_string());
        a.confirm_submitted_entries().await;
    }

    let Some(Notification::Update(update)) = hub.take("b") else {
        panic!("expected a merged update");
    };
    assert_eq!(update.version, 3);
    assert_eq!(update.updates, entries(&["one", "two", "three"]));

    b.receive_notification(Notification::Update(update));
    b.process_notifications();
    assert_eq!(b.confirmed_view(), a.confirmed_view());
}

#[tokio::test]
async fn test_oversized_backlog_degrades_to_refresh() {
    common::init_tracing();
    let store = Rc::new(InMemoryPrimaryStore::new());
    let hub = InMemoryBroadcast::new(2);
    let mut a = engine(store.clone(), &hub, "a", StorageKind::Snapshot, 2);
    let mut b = engine(store.clone(), &hub, "b", StorageKind::Snapshot, 2);
    a.activate().await;
    b.activate().await;

    for word in ["one", "two", "three"] {
        a.submit(word.to_string());
        a.confirm_submitted_entries().await;
    }

    let notification = hub.take("b").expect("b was notified");
    assert_eq!(notification, Notification::Version { version: 3 });

    b.receive_notification(notification);
    b.process_notifications();
    assert_eq!(b.confirmed_version(), 0, "version signals carry no entries");
    assert!(b.has_pending_work());

    b.work().await;
    assert_eq!(b.confirmed_version(), 3);
    assert_eq!(b.confirmed_view(), &entries(&["one", "two", "three"]));
}

#[tokio::test]
async fn test_gap_waits_for_missing_notification() {
    common::init_tracing();
    let store = Rc::new(InMemoryPrimaryStore::new());
    let hub = InMemoryBroadcast::new(200);
    let mut a = engine(store.clone(), &hub, "a", StorageKind::Log, 200);
    let mut b = engine(store.clone(), &hub, "b", StorageKind::Log, 200);
    let mut c = engine(store.clone(), &hub, "c", StorageKind::Log, 200);
    a.activate().await;
    b.activate().await;
    c.activate().await;

    a.submit("first".to_string());
    a.confirm_submitted_entries().await;
    let first = hub.take("c").expect("c was notified");
    hub.discard("b");

    b.synchronize().await;
    b.submit("second".to_string());
    b.confirm_submitted_entries().await;
    let second = hub.take("c").expect("c was notified");

    c.receive_notification(second);
    c.process_notifications();
    assert_eq!(c.confirmed_version(), 0);
    assert_eq!(c.buffered_notifications(), 1);

    c.receive_notification(first);
    c.process_notifications();
    assert_eq!(c.confirmed_version(), 2);
    assert_eq!(c.confirmed_view(), &entries(&["first", "second"]));
    assert_eq!(c.buffered_notifications(), 0);
}

#[tokio::test]
async fn test_merged_notification_keeps_origin_bit() {
    common::init_tracing();
    for kind in [StorageKind::Log, StorageKind::Snapshot] {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let hub = InMemoryBroadcast::new(200);
        let mut a = engine(store.clone(), &hub, "a", kind, 200);
        let mut b = engine(store.clone(), &hub, "b", kind, 200);
        a.activate().await;
        b.activate().await;

        // Two writes by `a` leave its bit cleared.
        a.submit("1".to_string());
        a.confirm_submitted_entries().await;
        a.submit("2".to_string());
        a.confirm_submitted_entries().await;
        assert!(!a.write_vector().get_bit("a"));

        let merged = hub.take("b").expect("b was notified");
        assert!(matches!(&merged, Notification::Update(u) if u.updates.len() == 2));
        b.receive_notification(merged);
        b.process_notifications();
        assert_eq!(b.confirmed_version(), 2, "{kind}");
        assert_eq!(b.write_vector(), a.write_vector());

        // `b` persists its copy of a's bit, then `a` writes on a stale etag.
        b.submit("3".to_string());
        b.confirm_submitted_entries().await;
        a.submit("4".to_string());
        a.confirm_submitted_entries().await;
        b.synchronize().await;

        let expected = entries(&["1", "2", "3", "4"]);
        assert_eq!(a.confirmed_view(), &expected, "{kind}: no entry lost");
        assert_eq!(b.confirmed_view(), &expected);
        assert_eq!(a.confirmed_version(), 4);
    }
}

#[tokio::test]
async fn test_update_with_too_many_entries_is_ignored() {
    common::init_tracing();
    for kind in [StorageKind::Log, StorageKind::Snapshot] {
        let store = Rc::new(InMemoryPrimaryStore::new());
        let hub = InMemoryBroadcast::new(200);
        let mut b = engine(store.clone(), &hub, "b", kind, 200);
        b.activate().await;

        b.receive_notification(Notification::Update(UpdateNotification {
            version: 1,
            origin: "a".to_string(),
            origin_bit: true,
            updates: entries(&["x", "y"]),
            etag: None,
        }));
        b.process_notifications();
        assert_eq!(b.confirmed_version(), 0, "{kind}");
        assert!(b.confirmed_view().is_empty());
        assert_eq!(b.buffered_notifications(), 0);
        assert!(b.has_pending_work(), "malformed update schedules a read");

        b.work().await;
        assert_eq!(b.confirmed_version(), 0);
        assert!(!b.has_pending_work());
    }
}

//! # moonpool-logview
//!
//! Primary-based replicated views for moonpool actors.
//!
//! An entity may be active on several replicas at once. Each replica keeps a
//! **view** of the entity's update log and applies its own updates to it
//! optimistically. Batches are persisted through one shared **primary
//! store** with conditional (ETag) writes, and the other replicas learn about
//! committed entries through **notifications**, falling back to reading the
//! primary whenever a notification cannot be applied exactly.
//!
//! No update is ever lost or applied twice, even when a write's response is
//! lost: every write toggles the writer's bit in a **write vector** stored
//! with the state, so reading the primary back tells whether the write
//! committed.
//!
//! ## Building blocks
//!
//! - [`ConsistencyEngine`]: the per-replica protocol state machine
//! - [`LogViewActor`]: runs an engine in its own local task
//! - [`StorageAdapter`]: log-structured ([`LogStorageAdapter`]) or
//!   snapshot ([`SnapshotStorageAdapter`]) layout of the global state
//! - [`PrimaryStore`]: the conditional key-value store everything goes through
//! - [`NotificationBuffer`] and [`merge`]: inbound ordering and outbound coalescing
//! - [`IssueTracker`] and [`BackoffPolicy`]: retry delays after failures
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use moonpool_logview::{
//!     ConsistencyEngine, EngineConfig, InMemoryPrimaryStore, NoopChannel, StorageKind,
//!     TokioTimeProvider, UpdateViewError,
//! };
//!
//! fn add(total: &mut i64, amount: &i64) -> Result<(), UpdateViewError> {
//!     *total += *amount;
//!     Ok(())
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().expect("runtime").block_on(async {
//! let config = EngineConfig::builder("Account/alice", "eu-west").build().expect("valid config");
//! let mut engine: ConsistencyEngine<i64, i64> = ConsistencyEngine::with_storage(
//!     config,
//!     StorageKind::Log,
//!     Rc::new(InMemoryPrimaryStore::new()),
//!     Rc::new(add),
//!     Rc::new(NoopChannel),
//!     TokioTimeProvider::new(),
//! );
//!
//! engine.activate().await;
//! engine.submit(50);
//! engine.submit(-20);
//! assert_eq!(*engine.tentative_view(), 30);
//!
//! engine.confirm_submitted_entries().await;
//! assert_eq!(*engine.confirmed_view(), 30);
//! assert_eq!(engine.confirmed_version(), 2);
//! # });
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod actor;
mod adapter;
mod channel;
mod config;
mod engine;
mod error;
mod host;
mod issue;
mod notification;
mod stats;
mod store;
mod time;
mod write_vector;

pub use actor::{LogViewActor, ViewSnapshot, LOG_VIEW_QUEUE_SIZE};
pub use adapter::{
    GlobalState, LogStorageAdapter, SnapshotStorageAdapter, StorageAdapter, StorageKind, WriteRequest,
};
pub use channel::{BroadcastEndpoint, InMemoryBroadcast, NoopChannel, NotificationChannel};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{ConsistencyEngine, Phase};
pub use error::{ConfigError, LogViewError, PrimaryStoreError, UpdateViewError};
pub use host::ViewUpdater;
pub use issue::{
    BackoffPolicy, ExponentialBackoff, FixedBackoff, IssueKind, IssueTracker, JitteredBackoff,
    PrimaryIssue,
};
pub use notification::{
    merge, Notification, NotificationBacklog, NotificationBuffer, UpdateNotification,
    DEFAULT_MAX_ENTRIES_IN_NOTIFICATIONS,
};
pub use stats::LogViewStats;
pub use store::{
    ChaosConfig, ChaosPrimaryStore, Fault, FaultCounts, InMemoryPrimaryStore, PrimaryStore,
    StoredRecord,
};
pub use time::{TimeProvider, TokioTimeProvider};
pub use write_vector::WriteVector;

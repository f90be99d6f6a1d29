//! Storage strategies: how global state is laid out in the primary store.
//!
//! Both strategies persist a [`GlobalState`] (payload + global version +
//! write vector) as one JSON document under the entity key, guarded by the
//! store's ETag. They differ in the payload:
//!
//! | Strategy | Payload | On read | Log segments |
//! |----------|---------|---------|--------------|
//! | [`LogStorageAdapter`] | every entry ever committed | replay new entries | yes |
//! | [`SnapshotStorageAdapter`] | the view itself | replace the view | no |
//!
//! The log strategy grows without bound unless compacted externally; the
//! snapshot strategy stays small and loses history.

mod log;
mod snapshot;

use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{LogViewError, PrimaryStoreError};
use crate::host::ViewUpdater;
use crate::notification::UpdateNotification;
use crate::store::PrimaryStore;
use crate::write_vector::WriteVector;

pub use self::log::LogStorageAdapter;
pub use self::snapshot::SnapshotStorageAdapter;

/// The durable unit stored in the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState<P> {
    /// The log (log strategy) or the view (snapshot strategy).
    pub payload: P,
    /// Number of entries ever committed.
    pub global_version: u64,
    /// Toggle bits of the replicas that wrote.
    pub write_vector: WriteVector,
}

/// Borrowed form of [`GlobalState`] for encoding without copying the payload.
#[derive(Serialize)]
struct GlobalStateRef<'a, P: ?Sized> {
    payload: &'a P,
    global_version: u64,
    write_vector: &'a WriteVector,
}

/// Which storage strategy an engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Persist the full log; reconstruct the view by replay.
    Log,
    /// Persist the view itself.
    Snapshot,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Log => write!(f, "log"),
            StorageKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

impl StorageKind {
    /// Build the adapter for this strategy over `store`, for entity `key`.
    pub fn adapter<V, E>(self, store: Rc<dyn PrimaryStore>, key: &str) -> Box<dyn StorageAdapter<V, E>>
    where
        V: Clone + Default + Serialize + DeserializeOwned + 'static,
        E: Clone + Serialize + DeserializeOwned + 'static,
    {
        match self {
            StorageKind::Log => Box::new(LogStorageAdapter::new(store, key)),
            StorageKind::Snapshot => Box::new(SnapshotStorageAdapter::new(store, key)),
        }
    }
}

/// A batch to persist.
#[derive(Debug)]
pub struct WriteRequest<'a, V, E> {
    /// The entries of the batch, in submission order.
    pub updates: &'a [E],
    /// Confirmed view with `updates` applied, if the engine has it cached.
    pub tentative: Option<V>,
    /// Write vector to store, with the local bit already flipped.
    pub write_vector: WriteVector,
}

/// Owns the cached global state and confirmed view for one entity replica,
/// and moves them to and from the primary store.
///
/// `global_version` is also the confirmed version: the adapter only ever
/// holds state known to be durable.
#[async_trait(?Send)]
pub trait StorageAdapter<V, E> {
    /// The strategy implemented.
    fn kind(&self) -> StorageKind;

    /// Version of the cached global state.
    fn global_version(&self) -> u64;

    /// Write vector of the cached global state.
    fn write_vector(&self) -> &WriteVector;

    /// ETag of the cached global state, `None` before the first write.
    fn etag(&self) -> Option<&str>;

    /// The confirmed view.
    fn confirmed_view(&self) -> &V;

    /// Read the primary and adopt its state, bringing the confirmed view up to date.
    async fn read(&mut self, updater: &dyn ViewUpdater<V, E>) -> Result<(), PrimaryStoreError>;

    /// Conditionally write the cached state extended by the batch. On success
    /// the new state is adopted; on failure the cached state is unchanged.
    async fn write(
        &mut self,
        request: WriteRequest<'_, V, E>,
        updater: &dyn ViewUpdater<V, E>,
    ) -> Result<(), PrimaryStoreError>;

    /// Apply a notification whose precondition equals [`global_version`](Self::global_version).
    fn apply_notification(&mut self, notification: UpdateNotification<E>, updater: &dyn ViewUpdater<V, E>);

    /// Confirmed entries in positions `from..to`.
    fn retrieve_log_segment(&self, from: u64, to: u64) -> Result<Vec<E>, LogViewError>;
}

/// Read and decode the global state stored under `key`.
async fn read_global<P: DeserializeOwned>(
    store: &dyn PrimaryStore,
    key: &str,
    confirmed: u64,
) -> Result<Option<(GlobalState<P>, String)>, PrimaryStoreError> {
    let Some(record) = store.read(key).await? else {
        return Ok(None);
    };
    let state: GlobalState<P> = serde_json::from_slice(&record.data)?;
    if state.global_version < confirmed {
        return Err(PrimaryStoreError::Regressed {
            stored: state.global_version,
            confirmed,
        });
    }
    Ok(Some((state, record.etag)))
}

/// Encode and conditionally write a global state. Returns the new ETag.
async fn write_global<P: Serialize + ?Sized>(
    store: &dyn PrimaryStore,
    key: &str,
    payload: &P,
    global_version: u64,
    write_vector: &WriteVector,
    expected_etag: Option<&str>,
) -> Result<String, PrimaryStoreError> {
    let data = serde_json::to_vec(&GlobalStateRef {
        payload,
        global_version,
        write_vector,
    })?;
    store.write(key, data, expected_etag).await
}

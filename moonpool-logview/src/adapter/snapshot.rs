//! Snapshot storage: the primary holds the view itself.

use std::marker::PhantomData;
use std::rc::Rc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{read_global, write_global, StorageAdapter, StorageKind, WriteRequest};
use crate::error::{LogViewError, PrimaryStoreError};
use crate::host::{apply_entries, ViewUpdater};
use crate::notification::UpdateNotification;
use crate::store::PrimaryStore;
use crate::write_vector::WriteVector;

/// Stores the confirmed view as the payload. Reads replace it wholesale.
pub struct SnapshotStorageAdapter<V, E> {
    store: Rc<dyn PrimaryStore>,
    key: String,
    state: V,
    global_version: u64,
    write_vector: WriteVector,
    etag: Option<String>,
    _entries: PhantomData<fn(&E)>,
}

impl<V: Default, E> SnapshotStorageAdapter<V, E> {
    /// Create an adapter for entity `key`, starting from the default view.
    pub fn new(store: Rc<dyn PrimaryStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            state: V::default(),
            global_version: 0,
            write_vector: WriteVector::new(),
            etag: None,
            _entries: PhantomData,
        }
    }
}

#[async_trait(?Send)]
impl<V, E> StorageAdapter<V, E> for SnapshotStorageAdapter<V, E>
where
    V: Clone + Serialize + DeserializeOwned + 'static,
    E: 'static,
{
    fn kind(&self) -> StorageKind {
        StorageKind::Snapshot
    }

    fn global_version(&self) -> u64 {
        self.global_version
    }

    fn write_vector(&self) -> &WriteVector {
        &self.write_vector
    }

    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn confirmed_view(&self) -> &V {
        &self.state
    }

    async fn read(&mut self, _updater: &dyn ViewUpdater<V, E>) -> Result<(), PrimaryStoreError> {
        let Some((state, etag)) =
            read_global::<V>(self.store.as_ref(), &self.key, self.global_version).await?
        else {
            return Ok(());
        };
        self.state = state.payload;
        self.global_version = state.global_version;
        self.write_vector = state.write_vector;
        self.etag = Some(etag);
        Ok(())
    }

    async fn write(
        &mut self,
        request: WriteRequest<'_, V, E>,
        updater: &dyn ViewUpdater<V, E>,
    ) -> Result<(), PrimaryStoreError> {
        let next = match request.tentative {
            Some(view) => view,
            None => {
                let mut view = self.state.clone();
                apply_entries(updater, &mut view, request.updates, "snapshot_write");
                view
            }
        };
        let next_version = self.global_version + request.updates.len() as u64;

        let etag = write_global(
            self.store.as_ref(),
            &self.key,
            &next,
            next_version,
            &request.write_vector,
            self.etag.as_deref(),
        )
        .await?;

        self.state = next;
        self.global_version = next_version;
        self.write_vector = request.write_vector;
        self.etag = Some(etag);
        Ok(())
    }

    fn apply_notification(&mut self, notification: UpdateNotification<E>, updater: &dyn ViewUpdater<V, E>) {
        apply_entries(
            updater,
            &mut self.state,
            &notification.updates,
            "snapshot_notification",
        );
        self.global_version = notification.version;
        self.write_vector.set_bit(&notification.origin, notification.origin_bit);
        self.etag = notification.etag;
    }

    fn retrieve_log_segment(&self, _from: u64, _to: u64) -> Result<Vec<E>, LogViewError> {
        Err(LogViewError::SegmentUnsupported("snapshot"))
    }
}

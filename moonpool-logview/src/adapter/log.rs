//! Log-structured storage: the primary holds every committed entry.

use std::rc::Rc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

use super::{read_global, write_global, StorageAdapter, StorageKind, WriteRequest};
use crate::error::{LogViewError, PrimaryStoreError};
use crate::host::{apply_entries, ViewUpdater};
use crate::notification::UpdateNotification;
use crate::store::PrimaryStore;
use crate::write_vector::WriteVector;

/// Stores the whole log; the view is rebuilt locally by replay.
///
/// Replay is incremental: after a read only the entries past the previously
/// confirmed version are applied to the confirmed view.
pub struct LogStorageAdapter<V, E> {
    store: Rc<dyn PrimaryStore>,
    key: String,
    log: Vec<E>,
    write_vector: WriteVector,
    etag: Option<String>,
    confirmed_view: V,
}

impl<V: Default, E> LogStorageAdapter<V, E> {
    /// Create an adapter for entity `key`, starting from the empty log.
    pub fn new(store: Rc<dyn PrimaryStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            log: Vec::new(),
            write_vector: WriteVector::new(),
            etag: None,
            confirmed_view: V::default(),
        }
    }
}

#[async_trait(?Send)]
impl<V, E> StorageAdapter<V, E> for LogStorageAdapter<V, E>
where
    V: 'static,
    E: Clone + Serialize + DeserializeOwned + 'static,
{
    fn kind(&self) -> StorageKind {
        StorageKind::Log
    }

    fn global_version(&self) -> u64 {
        self.log.len() as u64
    }

    fn write_vector(&self) -> &WriteVector {
        &self.write_vector
    }

    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn confirmed_view(&self) -> &V {
        &self.confirmed_view
    }

    async fn read(&mut self, updater: &dyn ViewUpdater<V, E>) -> Result<(), PrimaryStoreError> {
        let confirmed = self.global_version();
        let Some((state, etag)) =
            read_global::<Vec<E>>(self.store.as_ref(), &self.key, confirmed).await?
        else {
            return Ok(());
        };
        if state.payload.len() as u64 != state.global_version {
            return Err(PrimaryStoreError::Serialization(format!(
                "log of {} entries stored with global version {}",
                state.payload.len(),
                state.global_version
            )));
        }

        self.log = state.payload;
        self.write_vector = state.write_vector;
        self.etag = Some(etag);
        apply_entries(
            updater,
            &mut self.confirmed_view,
            &self.log[confirmed as usize..],
            "log_replay",
        );
        tracing::trace!(
            key = %self.key,
            from = confirmed,
            to = self.log.len(),
            "replayed log"
        );
        Ok(())
    }

    async fn write(
        &mut self,
        request: WriteRequest<'_, V, E>,
        updater: &dyn ViewUpdater<V, E>,
    ) -> Result<(), PrimaryStoreError> {
        let next_version = (self.log.len() + request.updates.len()) as u64;
        let etag = write_global(
            self.store.as_ref(),
            &self.key,
            &ExtendedLog {
                log: &self.log,
                batch: request.updates,
            },
            next_version,
            &request.write_vector,
            self.etag.as_deref(),
        )
        .await?;

        let confirmed = self.log.len();
        self.log.extend_from_slice(request.updates);
        self.write_vector = request.write_vector;
        self.etag = Some(etag);
        apply_entries(
            updater,
            &mut self.confirmed_view,
            &self.log[confirmed..],
            "log_write",
        );
        Ok(())
    }

    fn apply_notification(&mut self, notification: UpdateNotification<E>, updater: &dyn ViewUpdater<V, E>) {
        apply_entries(
            updater,
            &mut self.confirmed_view,
            &notification.updates,
            "log_notification",
        );
        self.log.extend(notification.updates);
        self.write_vector.set_bit(&notification.origin, notification.origin_bit);
        self.etag = notification.etag;
    }

    fn retrieve_log_segment(&self, from: u64, to: u64) -> Result<Vec<E>, LogViewError> {
        let version = self.global_version();
        if from > to || to > version {
            return Err(LogViewError::SegmentOutOfRange { from, to, version });
        }
        Ok(self.log[from as usize..to as usize].to_vec())
    }
}

/// The cached log followed by a batch, encoded as one sequence so a write
/// never mutates the cache before the store accepts it.
struct ExtendedLog<'a, E> {
    log: &'a [E],
    batch: &'a [E],
}

impl<E: Serialize> Serialize for ExtendedLog<'_, E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.log.iter().chain(self.batch))
    }
}

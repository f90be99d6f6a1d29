//! The primary store: the single shared record every replica synchronises
//! through.
//!
//! A [`PrimaryStore`] holds opaque bytes per entity key, guarded by an ETag.
//! Writes are conditional: they succeed only if the caller's expected ETag
//! matches the stored one, which makes the store the linearization point for
//! all replicas of an entity.
//!
//! - [`InMemoryPrimaryStore`]: a shared in-process map for tests and simulation
//! - [`ChaosPrimaryStore`]: wraps another store and injects read failures,
//!   rejected writes, and writes whose response is lost

mod chaos;
mod memory;

use std::fmt;

use async_trait::async_trait;

use crate::error::PrimaryStoreError;

pub use chaos::{ChaosConfig, ChaosPrimaryStore, Fault, FaultCounts};
pub use memory::InMemoryPrimaryStore;

/// A stored record: serialized global state plus its ETag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Serialized global state.
    pub data: Vec<u8>,
    /// Optimistic concurrency token.
    pub etag: String,
}

/// Storage backend consumed by the storage adapters.
///
/// # Single-core
///
/// No Send bounds, matching the single-threaded execution of an entity.
#[async_trait(?Send)]
pub trait PrimaryStore: fmt::Debug {
    /// Read the record for `key`. `Ok(None)` means nothing has been written yet.
    async fn read(&self, key: &str) -> Result<Option<StoredRecord>, PrimaryStoreError>;

    /// Write the record for `key` if the stored ETag equals `expected_etag`
    /// (`None` expects the record to be absent). Returns the new ETag.
    ///
    /// An `Err` other than [`PrimaryStoreError::ConditionFailed`] leaves the
    /// outcome unknown: the write may or may not have been applied.
    async fn write(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_etag: Option<&str>,
    ) -> Result<String, PrimaryStoreError>;
}

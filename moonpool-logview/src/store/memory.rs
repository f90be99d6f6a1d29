//! In-memory primary store.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use async_trait::async_trait;

use super::{PrimaryStore, StoredRecord};
use crate::error::PrimaryStoreError;

/// In-memory primary store for tests and simulation.
///
/// Share it between engines with `Rc` to model several replicas of one
/// entity talking to the same primary. ETags are monotonically increasing
/// counter values. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryPrimaryStore {
    entries: RefCell<HashMap<String, StoredRecord>>,
    counter: Cell<u64>,
    writes: Cell<u64>,
}

impl InMemoryPrimaryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the record for `key` without going through the async API.
    pub fn peek(&self, key: &str) -> Option<StoredRecord> {
        self.entries.borrow().get(key).cloned()
    }

    /// Number of successful writes so far.
    pub fn successful_writes(&self) -> u64 {
        self.writes.get()
    }

    fn next_etag(&self) -> String {
        let val = self.counter.get() + 1;
        self.counter.set(val);
        val.to_string()
    }
}

#[async_trait(?Send)]
impl PrimaryStore for InMemoryPrimaryStore {
    async fn read(&self, key: &str) -> Result<Option<StoredRecord>, PrimaryStoreError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    async fn write(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_etag: Option<&str>,
    ) -> Result<String, PrimaryStoreError> {
        let mut entries = self.entries.borrow_mut();
        let actual = entries.get(key).map(|r| r.etag.as_str());
        if actual != expected_etag {
            return Err(PrimaryStoreError::ConditionFailed {
                expected: expected_etag.map(str::to_string),
                actual: actual.map(str::to_string),
            });
        }

        let etag = self.next_etag();
        entries.insert(
            key.to_string(),
            StoredRecord {
                data,
                etag: etag.clone(),
            },
        );
        self.writes.set(self.writes.get() + 1);
        Ok(etag)
    }
}

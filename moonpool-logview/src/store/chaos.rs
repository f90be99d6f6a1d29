//! Fault injection for primary stores.
//!
//! [`ChaosPrimaryStore`] sits in front of a real store and makes it misbehave
//! in the three ways the protocol must survive:
//!
//! - reads that fail
//! - writes that fail before reaching the store
//! - writes that are applied but whose response is lost
//!
//! Faults are either scripted (consumed in order, one per matching call) or
//! drawn from a seeded RNG so a failing run can be replayed from its seed.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{PrimaryStore, StoredRecord};
use crate::error::PrimaryStoreError;

/// A single injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The next read fails with [`PrimaryStoreError::Unavailable`].
    FailRead,
    /// The next write is dropped before reaching the store.
    RejectWrite,
    /// The next write is applied, then reported as a transient failure.
    LoseWriteResponse,
}

/// Probabilities for randomly injected faults, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaosConfig {
    /// Chance that a read fails.
    pub read_failure: f64,
    /// Chance that a write is dropped before reaching the store.
    pub write_rejected: f64,
    /// Chance that an applied write reports failure.
    pub write_response_lost: f64,
}

/// Number of faults injected so far, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultCounts {
    /// Failed reads.
    pub failed_reads: u64,
    /// Writes dropped before the store.
    pub rejected_writes: u64,
    /// Writes applied with a lost response.
    pub lost_responses: u64,
}

/// A primary store wrapper that injects faults.
#[derive(Debug)]
pub struct ChaosPrimaryStore {
    inner: Rc<dyn PrimaryStore>,
    scripted_reads: RefCell<VecDeque<Fault>>,
    scripted_writes: RefCell<VecDeque<Fault>>,
    random: Option<(ChaosConfig, RefCell<ChaCha8Rng>)>,
    counts: Cell<FaultCounts>,
}

impl ChaosPrimaryStore {
    /// Wrap `inner` with no faults; add them with [`inject`](Self::inject).
    pub fn new(inner: Rc<dyn PrimaryStore>) -> Self {
        Self {
            inner,
            scripted_reads: RefCell::new(VecDeque::new()),
            scripted_writes: RefCell::new(VecDeque::new()),
            random: None,
            counts: Cell::new(FaultCounts::default()),
        }
    }

    /// Wrap `inner` with faults drawn from a seeded RNG.
    pub fn with_random_faults(inner: Rc<dyn PrimaryStore>, config: ChaosConfig, seed: u64) -> Self {
        let mut store = Self::new(inner);
        store.random = Some((config, RefCell::new(ChaCha8Rng::seed_from_u64(seed))));
        store
    }

    /// Queue a fault for the next matching call. Scripted faults take
    /// precedence over random ones.
    pub fn inject(&self, fault: Fault) {
        match fault {
            Fault::FailRead => self.scripted_reads.borrow_mut().push_back(fault),
            Fault::RejectWrite | Fault::LoseWriteResponse => {
                self.scripted_writes.borrow_mut().push_back(fault)
            }
        }
    }

    /// Faults injected so far.
    pub fn fault_counts(&self) -> FaultCounts {
        self.counts.get()
    }

    fn next_read_fault(&self) -> Option<Fault> {
        if let Some(fault) = self.scripted_reads.borrow_mut().pop_front() {
            return Some(fault);
        }
        let (config, rng) = self.random.as_ref()?;
        rng.borrow_mut()
            .random_bool(config.read_failure)
            .then_some(Fault::FailRead)
    }

    fn next_write_fault(&self) -> Option<Fault> {
        if let Some(fault) = self.scripted_writes.borrow_mut().pop_front() {
            return Some(fault);
        }
        let (config, rng) = self.random.as_ref()?;
        let mut rng = rng.borrow_mut();
        if rng.random_bool(config.write_rejected) {
            Some(Fault::RejectWrite)
        } else if rng.random_bool(config.write_response_lost) {
            Some(Fault::LoseWriteResponse)
        } else {
            None
        }
    }

    fn count(&self, update: impl FnOnce(&mut FaultCounts)) {
        let mut counts = self.counts.get();
        update(&mut counts);
        self.counts.set(counts);
    }
}

#[async_trait(?Send)]
impl PrimaryStore for ChaosPrimaryStore {
    async fn read(&self, key: &str) -> Result<Option<StoredRecord>, PrimaryStoreError> {
        if self.next_read_fault().is_some() {
            self.count(|c| c.failed_reads += 1);
            tracing::trace!(key, "chaos: failing read");
            return Err(PrimaryStoreError::Unavailable);
        }
        self.inner.read(key).await
    }

    async fn write(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_etag: Option<&str>,
    ) -> Result<String, PrimaryStoreError> {
        match self.next_write_fault() {
            Some(Fault::RejectWrite) => {
                self.count(|c| c.rejected_writes += 1);
                tracing::trace!(key, "chaos: dropping write");
                Err(PrimaryStoreError::Transient("write dropped".to_string()))
            }
            Some(Fault::LoseWriteResponse) => {
                let applied = self.inner.write(key, data, expected_etag).await;
                self.count(|c| c.lost_responses += 1);
                tracing::trace!(key, applied = applied.is_ok(), "chaos: losing write response");
                Err(PrimaryStoreError::Transient("response lost".to_string()))
            }
            Some(Fault::FailRead) | None => self.inner.write(key, data, expected_etag).await,
        }
    }
}

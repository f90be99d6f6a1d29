//! Per-replica toggle bits, string-encoded.
//!
//! A [`WriteVector`] maps replica ids to a single bit. Every write attempt by
//! a replica flips that replica's bit in the state it tries to persist. After
//! an ambiguous failure the replica reads the primary back and compares its
//! bit against the value it predicted: equal means the write landed.
//!
//! # Encoding
//!
//! The set of replicas whose bit is `true`, sorted and comma-delimited with a
//! leading and trailing comma (`",eu-west,us-east,"`). Keeping ids sorted makes
//! the encoding canonical, so equal bit sets compare equal. The empty string is the empty
//! vector. Replica ids must be non-empty and must not contain `,`;
//! [`EngineConfig`](crate::EngineConfig) rejects such ids at construction.

use std::fmt;

use serde::{Deserialize, Serialize};

const DELIMITER: char = ',';

/// Compact `{replica_id -> bool}` map carried on every storage write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteVector(String);

impl WriteVector {
    /// The empty vector: every bit is `false`.
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Wrap an already-encoded vector.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read the bit for `replica`. Absent replicas read as `false`.
    pub fn get_bit(&self, replica: &str) -> bool {
        self.find(replica).is_some()
    }

    /// Toggle the bit for `replica` and return its new value.
    pub fn flip_bit(&mut self, replica: &str) -> bool {
        match self.find(replica) {
            Some(pos) => {
                // Removing ",replica" keeps the comma that follows it.
                self.0.replace_range(pos..pos + replica.len() + 1, "");
                if self.0.len() == 1 {
                    self.0.clear();
                }
                false
            }
            None => {
                let mut ids: Vec<&str> = self.replicas().collect();
                let at = ids.partition_point(|id| *id < replica);
                ids.insert(at, replica);
                let mut encoded = String::with_capacity(self.0.len() + replica.len() + 2);
                encoded.push(DELIMITER);
                for id in ids {
                    encoded.push_str(id);
                    encoded.push(DELIMITER);
                }
                self.0 = encoded;
                true
            }
        }
    }

    /// Force the bit for `replica` to `value`.
    pub fn set_bit(&mut self, replica: &str, value: bool) {
        if self.get_bit(replica) != value {
            self.flip_bit(replica);
        }
    }

    /// Replicas whose bit is currently `true`.
    pub fn replicas(&self) -> impl Iterator<Item = &str> {
        self.0.split(DELIMITER).filter(|s| !s.is_empty())
    }

    /// Byte offset of the delimiter preceding `replica`, if present.
    fn find(&self, replica: &str) -> Option<usize> {
        if replica.is_empty() {
            return None;
        }
        let bytes = self.0.as_bytes();
        // Ids never contain the delimiter, so a delimited match cannot overlap
        // an earlier undelimited one.
        self.0.match_indices(replica).find_map(|(pos, _)| {
            let end = pos + replica.len();
            let delimited_before = pos > 0 && bytes[pos - 1] == DELIMITER as u8;
            let delimited_after = end < bytes.len() && bytes[end] == DELIMITER as u8;
            (delimited_before && delimited_after).then(|| pos - 1)
        })
    }
}

impl fmt::Display for WriteVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.trim_matches(DELIMITER))
    }
}

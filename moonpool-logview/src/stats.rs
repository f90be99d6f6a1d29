//! Optional engine statistics.

use std::collections::BTreeMap;
use std::time::Duration;

/// Event counters and stabilization latencies of one engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogViewStats {
    /// How often each public operation was called.
    pub event_counters: BTreeMap<&'static str, u64>,
    /// Time from submission to confirmation, per committed entry.
    pub stabilization_latencies: Vec<Duration>,
}

impl LogViewStats {
    /// Events counted by the engine.
    pub const EVENTS: [&'static str; 10] = [
        "submit",
        "submit_range",
        "try_append",
        "try_append_range",
        "tentative_view",
        "confirmed_view",
        "confirmed_version",
        "confirm_submitted_entries",
        "synchronize",
        "writeback",
    ];

    /// Create stats with every counter at zero.
    pub fn new() -> Self {
        Self {
            event_counters: Self::EVENTS.iter().map(|&e| (e, 0)).collect(),
            stabilization_latencies: Vec::new(),
        }
    }

    /// Increment the counter for `event`.
    pub fn count(&mut self, event: &'static str) {
        *self.event_counters.entry(event).or_insert(0) += 1;
    }

    /// Current value of the counter for `event`.
    pub fn counter(&self, event: &str) -> u64 {
        self.event_counters.get(event).copied().unwrap_or(0)
    }
}

//! Tracking of failed primary operations and retry backoff.
//!
//! The engine keeps at most one [`PrimaryIssue`]: the latest failure against
//! the primary store. Consecutive failures accumulate on the same record and
//! each one asks the [`BackoffPolicy`] for the delay before the next attempt.
//! The first success clears it.

use std::cell::RefCell;
use std::fmt;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::PrimaryStoreError;

/// Which primary operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// A read of the global state failed.
    ReadFromPrimaryFailed,
    /// A conditional write of the global state failed or had an unknown outcome.
    WriteToPrimaryFailed,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::ReadFromPrimaryFailed => write!(f, "read_failed"),
            IssueKind::WriteToPrimaryFailed => write!(f, "write_failed"),
        }
    }
}

/// The most recent unresolved failure against the primary store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryIssue {
    /// The operation that failed most recently.
    pub kind: IssueKind,
    /// The error it failed with.
    pub error: PrimaryStoreError,
    /// Failures recorded since the last success, including this one.
    pub consecutive_failures: u32,
    /// When the first failure of this streak was recorded.
    pub first_failure: Duration,
    /// When this failure was recorded.
    pub latest_failure: Duration,
    /// Delay to wait before the next attempt.
    pub retry_delay: Duration,
}

impl fmt::Display for PrimaryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x{} ({}), retry in {:?}",
            self.kind, self.consecutive_failures, self.error, self.retry_delay
        )
    }
}

/// Computes how long to wait before retrying after a failure.
pub trait BackoffPolicy: fmt::Debug {
    /// Delay for `issue`. `previous` is the delay handed out for the previous
    /// failure of the same streak, `None` on the first failure.
    fn delay_before_retry(&self, issue: &PrimaryIssue, previous: Option<Duration>) -> Duration;
}

/// Always wait the same amount of time.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedBackoff(pub Duration);

impl BackoffPolicy for FixedBackoff {
    fn delay_before_retry(&self, _issue: &PrimaryIssue, _previous: Option<Duration>) -> Duration {
        self.0
    }
}

/// Doubling delay, capped.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound on the delay.
    pub max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay_before_retry(&self, _issue: &PrimaryIssue, previous: Option<Duration>) -> Duration {
        match previous {
            None => self.initial.min(self.max),
            Some(prev) => std::cmp::min(prev.max(self.initial) * 2, self.max),
        }
    }
}

/// Retry at once after the first failure, then grow by half (plus a few
/// milliseconds of jitter) until the slow-poll interval, then keep polling at
/// that interval with up to 200ms of extra jitter.
#[derive(Debug)]
pub struct JitteredBackoff {
    slow_poll_interval: Duration,
    rng: RefCell<ChaCha8Rng>,
}

impl JitteredBackoff {
    /// Default slow-poll interval.
    pub const DEFAULT_SLOW_POLL: Duration = Duration::from_secs(10);

    /// Create a policy seeded from the thread RNG.
    pub fn new(slow_poll_interval: Duration) -> Self {
        Self {
            slow_poll_interval,
            rng: RefCell::new(ChaCha8Rng::from_rng(&mut rand::rng())),
        }
    }

    /// Create a deterministic policy, for simulations.
    pub fn with_seed(slow_poll_interval: Duration, seed: u64) -> Self {
        Self {
            slow_poll_interval,
            rng: RefCell::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl Default for JitteredBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SLOW_POLL)
    }
}

impl BackoffPolicy for JitteredBackoff {
    fn delay_before_retry(&self, _issue: &PrimaryIssue, previous: Option<Duration>) -> Duration {
        let Some(previous) = previous else {
            return Duration::ZERO;
        };
        let mut rng = self.rng.borrow_mut();
        let mut backoff = previous;
        if backoff < self.slow_poll_interval {
            let jitter = Duration::from_millis(rng.random_range(5..15));
            backoff = (backoff + jitter).mul_f64(1.5);
        }
        if backoff > self.slow_poll_interval {
            backoff = self.slow_poll_interval + Duration::from_millis(rng.random_range(1..200));
        }
        backoff
    }
}

/// Holds the current [`PrimaryIssue`], if any.
#[derive(Debug, Default)]
pub struct IssueTracker {
    current: Option<PrimaryIssue>,
}

impl IssueTracker {
    /// Create a tracker with no issue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure at time `now` and compute the next retry delay.
    pub fn record(
        &mut self,
        kind: IssueKind,
        error: PrimaryStoreError,
        now: Duration,
        policy: &dyn BackoffPolicy,
    ) -> &PrimaryIssue {
        let previous = self.current.take();
        let mut issue = PrimaryIssue {
            kind,
            error,
            consecutive_failures: previous.as_ref().map_or(1, |p| p.consecutive_failures + 1),
            first_failure: previous.as_ref().map_or(now, |p| p.first_failure),
            latest_failure: now,
            retry_delay: Duration::ZERO,
        };
        issue.retry_delay =
            policy.delay_before_retry(&issue, previous.as_ref().map(|p| p.retry_delay));
        self.current.insert(issue)
    }

    /// Clear the current issue after a success, returning it.
    pub fn resolve(&mut self) -> Option<PrimaryIssue> {
        self.current.take()
    }

    /// The unresolved issue.
    pub fn current(&self) -> Option<&PrimaryIssue> {
        self.current.as_ref()
    }

    /// How long to wait before the next attempt.
    pub fn delay_before_retry(&self) -> Duration {
        self.current.as_ref().map_or(Duration::ZERO, |i| i.retry_delay)
    }
}

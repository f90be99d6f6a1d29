//! Time abstraction used for retry backoff.
//!
//! The engine never calls `tokio::time` directly so simulations can drive it
//! with their own clock.

use std::time::Duration;

use async_trait::async_trait;

/// Provider trait for the time operations the engine needs.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Elapsed time since the provider was created.
    fn now(&self) -> Duration;
}

/// Real time provider using Tokio's timer.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    start_time: tokio::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new Tokio time provider.
    pub fn new() -> Self {
        Self {
            start_time: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }
}

//! Engine configuration.
//!
//! Identifies the entity and the local replica, and carries protocol knobs.
//! Validation happens once in [`EngineConfigBuilder::build`]; an engine can
//! only be constructed from a valid config.

use std::rc::Rc;

use crate::error::ConfigError;
use crate::issue::{BackoffPolicy, JitteredBackoff};
use crate::notification::DEFAULT_MAX_ENTRIES_IN_NOTIFICATIONS;

/// Validated configuration for a [`ConsistencyEngine`](crate::ConsistencyEngine).
///
/// # Example
///
/// ```rust
/// use moonpool_logview::EngineConfig;
///
/// let config = EngineConfig::builder("BankAccount/alice", "us-east")
///     .max_entries_in_notifications(50)
///     .build()
///     .expect("valid config");
/// assert_eq!(config.replica_id(), "us-east");
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    key: String,
    replica_id: String,
    backoff: Rc<dyn BackoffPolicy>,
    max_entries_in_notifications: usize,
    stats_enabled: bool,
}

impl EngineConfig {
    /// Start building a configuration for entity `key` on replica `replica_id`.
    pub fn builder(key: impl Into<String>, replica_id: impl Into<String>) -> EngineConfigBuilder {
        EngineConfigBuilder {
            key: key.into(),
            replica_id: replica_id.into(),
            backoff: None,
            max_entries_in_notifications: DEFAULT_MAX_ENTRIES_IN_NOTIFICATIONS,
            stats_enabled: false,
        }
    }

    /// The primary store key of the entity.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The local replica id.
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Retry delay policy for primary failures.
    pub fn backoff(&self) -> &Rc<dyn BackoffPolicy> {
        &self.backoff
    }

    /// Upper bound (exclusive) on entries in a merged notification.
    pub fn max_entries_in_notifications(&self) -> usize {
        self.max_entries_in_notifications
    }

    /// Whether statistics collection starts enabled.
    pub fn stats_enabled(&self) -> bool {
        self.stats_enabled
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    key: String,
    replica_id: String,
    backoff: Option<Rc<dyn BackoffPolicy>>,
    max_entries_in_notifications: usize,
    stats_enabled: bool,
}

impl EngineConfigBuilder {
    /// Set the retry delay policy. Defaults to [`JitteredBackoff`].
    pub fn backoff(mut self, backoff: Rc<dyn BackoffPolicy>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Set the cap on entries per merged notification.
    pub fn max_entries_in_notifications(mut self, max: usize) -> Self {
        self.max_entries_in_notifications = max;
        self
    }

    /// Enable statistics collection from the start.
    pub fn stats_enabled(mut self, enabled: bool) -> Self {
        self.stats_enabled = enabled;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        if self.key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        if self.replica_id.is_empty() {
            return Err(ConfigError::EmptyReplicaId);
        }
        if self.replica_id.contains(',') {
            return Err(ConfigError::InvalidReplicaId(self.replica_id));
        }
        if self.max_entries_in_notifications == 0 {
            return Err(ConfigError::ZeroNotificationBatch);
        }

        Ok(EngineConfig {
            key: self.key,
            replica_id: self.replica_id,
            backoff: self
                .backoff
                .unwrap_or_else(|| Rc::new(JitteredBackoff::default())),
            max_entries_in_notifications: self.max_entries_in_notifications,
            stats_enabled: self.stats_enabled,
        })
    }
}

use serde::{Deserialize, Serialize};

use crate::errors::{Result, ThothError};
use crate::isolation::{IsolationLevel, IsolationPolicy, ReadCommittedPolicy};
use crate::oracle::Timestamp;

/// Tunables for a [`crate::Store`].
///
/// ```
/// use thoth::prelude::*;
///
/// let config = StoreConfig {
///     initial_timestamp: 99,
///     default_isolation: IsolationLevel::Serializable,
///     ..StoreConfig::default()
/// };
/// let store = Store::with_config(config).unwrap();
/// assert_eq!(store.oracle().next(), 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Value the timestamp oracle starts counting from. The first issued timestamp is
    /// `initial_timestamp + timestamp_step`.
    pub initial_timestamp: Timestamp,
    /// Distance between consecutive timestamps. Must be positive.
    pub timestamp_step: u64,
    /// Isolation level used by [`crate::Store::begin_default`].
    pub default_isolation: IsolationLevel,
    /// Number of serializable transaction terminations between two prunes of the
    /// dependency tracker. Must be positive.
    pub tracker_prune_interval: u64,
    /// Whether read-committed commits are rejected on write-write conflicts
    /// (first committer wins). When `false`, read-committed commits unconditionally.
    pub read_committed_write_check: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_timestamp: 0,
            timestamp_step: 1,
            default_isolation: IsolationLevel::Snapshot,
            tracker_prune_interval: 64,
            read_committed_write_check: true,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timestamp_step == 0 {
            return Err(ThothError::InvalidConfig(
                "timestamp_step must be greater than zero".to_string(),
            ));
        }
        if self.initial_timestamp > Timestamp::MAX - self.timestamp_step {
            return Err(ThothError::InvalidConfig(
                "initial_timestamp leaves no room for a first timestamp".to_string(),
            ));
        }
        if self.tracker_prune_interval == 0 {
            return Err(ThothError::InvalidConfig(
                "tracker_prune_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The policy transactions at `level` run under with this configuration.
    pub fn policy(&self, level: IsolationLevel) -> &'static dyn IsolationPolicy {
        match level {
            IsolationLevel::ReadCommitted if !self.read_committed_write_check => {
                &ReadCommittedPolicy::UNCHECKED
            }
            level => level.policy(),
        }
    }
}

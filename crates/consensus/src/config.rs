//! Consensus configuration.

use crate::QuorumPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("view change timeout must be positive")]
    ZeroTimeout,

    #[error("max view change timeout {max:?} is below the base timeout {base:?}")]
    TimeoutCapBelowBase { base: Duration, max: Duration },

    #[error("quorum fraction {numerator}/{denominator} must be in [1/2, 1)")]
    InvalidFraction { numerator: u64, denominator: u64 },
}

/// Configuration for one consensus instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Time a view may run without committing before a view change.
    #[serde(rename = "view_change_timeout_ms", with = "millis")]
    pub view_change_timeout: Duration,

    /// Added to the timeout for every consecutive view change at one height.
    #[serde(rename = "view_change_timeout_increment_ms", with = "millis")]
    pub view_change_timeout_increment: Duration,

    /// Upper bound for the grown timeout.
    #[serde(rename = "max_view_change_timeout_ms", with = "millis")]
    pub max_view_change_timeout: Duration,

    /// How far ahead of the current block messages are still kept.
    /// Anything further is dropped to bound memory.
    pub max_future_blocks: u64,

    /// Consecutive view changes at one height after which a liveness
    /// failure is reported. Zero disables reporting.
    pub liveness_failure_threshold: u64,

    /// Threshold for every vote type without an override.
    pub quorum_policy: QuorumPolicy,

    /// Optional separate threshold for the prepare phase.
    pub prepare_policy: Option<QuorumPolicy>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            view_change_timeout: Duration::from_secs(5),
            view_change_timeout_increment: Duration::from_secs(2),
            max_view_change_timeout: Duration::from_secs(60),
            max_future_blocks: 16,
            liveness_failure_threshold: 3,
            quorum_policy: QuorumPolicy::SuperMajorityVote,
            prepare_policy: None,
        }
    }
}

impl ConsensusConfig {
    /// Config with a custom base timeout and otherwise default values.
    pub fn with_timeout(view_change_timeout: Duration) -> Self {
        Self {
            view_change_timeout,
            max_view_change_timeout: view_change_timeout.max(Duration::from_secs(60)),
            ..Default::default()
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.view_change_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_view_change_timeout < self.view_change_timeout {
            return Err(ConfigError::TimeoutCapBelowBase {
                base: self.view_change_timeout,
                max: self.max_view_change_timeout,
            });
        }
        self.quorum_policy.validate()?;
        if let Some(policy) = &self.prepare_policy {
            policy.validate()?;
        }
        Ok(())
    }
}

/// Durations as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

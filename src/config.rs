//! Configuration
//!
//! Plain structs with sensible defaults. Override single fields with
//! struct update syntax:
//!
//! ```
//! use timedcache::config::CacheConfig;
//! use std::time::Duration;
//!
//! let config = CacheConfig {
//!     default_ttl: Some(Duration::from_secs(30)),
//!     ..Default::default()
//! };
//! assert_eq!(config.shard_count, 64);
//! ```

use crate::error::{CacheError, Result};
use crate::storage::sharded::DEFAULT_SHARDS;
use std::time::Duration;

/// Shortest interval the expiry sweeper accepts.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Sweep interval used by [`SweepConfig::default`].
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Label given to sweepers started without one.
pub const DEFAULT_SWEEPER_LABEL: &str = "expiry-sweeper";

/// Configuration for a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied by the shorthand put. `None` (or zero) disables the shorthand.
    pub default_ttl: Option<Duration>,

    /// Number of independently locked shards (default: 64)
    pub shard_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            shard_count: DEFAULT_SHARDS,
        }
    }
}

impl CacheConfig {
    /// Returns the default TTL if one is actually usable.
    pub(crate) fn effective_default_ttl(&self) -> Option<Duration> {
        self.default_ttl.filter(|ttl| !ttl.is_zero())
    }
}

/// Configuration for the background expiry sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    /// Time between passes; the first pass runs one interval after start
    pub interval: Duration,

    /// Name attached to the sweeper's log output
    pub label: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            label: DEFAULT_SWEEPER_LABEL.to_string(),
        }
    }
}

impl SweepConfig {
    /// Creates a config running every `interval_secs` seconds.
    pub fn every_secs(interval_secs: u64, label: impl Into<String>) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            label: label.into(),
        }
    }

    /// Checks the interval against [`MIN_SWEEP_INTERVAL`].
    pub fn validate(&self) -> Result<()> {
        if self.interval < MIN_SWEEP_INTERVAL {
            return Err(CacheError::IntervalTooShort {
                interval: self.interval,
                minimum: MIN_SWEEP_INTERVAL,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.shard_count, 64);

        let sweep = SweepConfig::default();
        assert_eq!(sweep.interval, Duration::from_secs(60));
        assert_eq!(sweep.label, DEFAULT_SWEEPER_LABEL);
    }

    #[test]
    fn test_zero_default_ttl_is_unset() {
        let config = CacheConfig {
            default_ttl: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(config.effective_default_ttl(), None);

        let config = CacheConfig {
            default_ttl: Some(Duration::from_millis(1)),
            ..Default::default()
        };
        assert_eq!(config.effective_default_ttl(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_sweep_interval_validation() {
        assert!(SweepConfig::every_secs(1, "ok").validate().is_ok());
        assert_eq!(
            SweepConfig::every_secs(0, "too-fast").validate(),
            Err(CacheError::IntervalTooShort {
                interval: Duration::ZERO,
                minimum: MIN_SWEEP_INTERVAL,
            })
        );

        let sub_second = SweepConfig {
            interval: Duration::from_millis(999),
            ..Default::default()
        };
        assert!(sub_second.validate().is_err());
    }
}

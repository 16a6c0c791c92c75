//! Error Types
//!
//! Only caller misuse is an error here. A missing or expired key is an
//! empty result, and a conditional operation whose target changed is a
//! `false`, both of which are normal control flow.

use std::time::Duration;
use thiserror::Error;

/// Errors raised synchronously by cache configuration and sweeper lifecycle calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The shorthand put was used on a map built without a default TTL
    #[error("put without an explicit expiry requires a default TTL, and none was configured")]
    NoDefaultTtl,

    /// Sweep interval below the supported minimum
    #[error("sweep interval {interval:?} is too short (minimum: {minimum:?})")]
    IntervalTooShort { interval: Duration, minimum: Duration },

    /// Sweep interval so long the first pass cannot be scheduled
    #[error("sweep interval {interval:?} is too long to schedule")]
    IntervalTooLong { interval: Duration },

    /// `start` was called on a store whose sweeper is still running
    #[error("expiry sweeper '{label}' is already running")]
    SweeperAlreadyRunning { label: String },

    /// The sweeper needs a Tokio runtime to schedule itself on
    #[error("no Tokio runtime available to run the expiry sweeper")]
    NoRuntime,
}

/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

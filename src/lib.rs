//! # timedcache - Time-Bounded Concurrent Caches
//!
//! Two in-memory caches whose entries stop existing at an absolute
//! deadline, built to be hammered from many threads at once:
//!
//! - [`ReplayGuard`]: a key-only cache that answers "have I seen this
//!   token inside its window?", for rejecting replayed nonces.
//! - [`ExpiringMap`]: a key/value cache for short-lived registrations,
//!   such as callbacks keyed by a nonce that must fire at most once.
//!
//! ## Features
//!
//! - **Sharded Storage**: 64 independently locked shards, no global lock
//! - **Lazy Expiry**: An expired entry reads as absent the instant its deadline passes
//! - **Active Expiry**: An optional background sweeper reclaims expired entries
//! - **Race-Safe Reclamation**: The sweeper only removes the exact entry it
//!   inspected, so a concurrent refresh is never lost
//! - **Injectable Time**: Every decision reads a [`Clock`], which tests can
//!   replace with a [`ManualClock`](clock::ManualClock)
//!
//! ## Quick Start
//!
//! ```
//! use timedcache::{Clock, ReplayGuard, StringToken, SystemClock};
//! use std::time::Duration;
//!
//! let guard = ReplayGuard::new();
//! let nonce = StringToken::new("a1b2c3");
//! let window = SystemClock.now() + Duration::from_secs(300);
//!
//! assert!(guard.check_and_cache(&nonce, window)); // first sighting
//! assert!(!guard.check_and_cache(&nonce, window)); // replay
//! ```
//!
//! ## Background Sweeping
//!
//! The sweeper runs on the current Tokio runtime and belongs to the store
//! that started it. It stops when [`stop_sweeper`](ExpiringMap::stop_sweeper)
//! is called or when the store is dropped, whichever comes first.
//!
//! ```ignore
//! let sessions: ExpiringMap<String, Session> = ExpiringMap::with_default_ttl(Duration::from_secs(60));
//! sessions.start_sweeper(30)?;
//! // ...
//! sessions.stop_sweeper();
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: The caches, their sharded map and the expiry sweeper
//! - [`clock`]: Timestamps and time sources
//! - [`config`]: Store and sweeper configuration
//! - [`error`]: Configuration and lifecycle errors

pub mod clock;
pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{CacheConfig, SweepConfig};
pub use error::{CacheError, Result};
pub use storage::{
    ExpiringMap, OwnedToken, ReplayGuard, StringToken, SweepReport, TimedEntry, TokenKey,
};

/// Version of timedcache
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Storage Module
//!
//! The two caches and the machinery they share: a sharded concurrent map
//! underneath, timed entries on top, and a background sweeper that reclaims
//! expired entries.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │       ExpiringMap        │        │       ReplayGuard        │
//! │  K -> TimedEntry<V>      │        │  token key -> expiry     │
//! └────────────┬─────────────┘        └────────────┬─────────────┘
//!              │                                   │
//!              ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ShardedMap                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ keys + conditional removal
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use timedcache::clock::{Clock, ManualClock, Timestamp};
//! use timedcache::config::CacheConfig;
//! use timedcache::storage::ExpiringMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(ManualClock::new(Timestamp::from_millis(10_000)));
//! let map: ExpiringMap<&str, u32> = ExpiringMap::with_config(CacheConfig::default(), clock.clone());
//!
//! map.put_until("a", 1, clock.now() + Duration::from_secs(5));
//! assert_eq!(map.get("a"), Some(1));
//!
//! clock.advance(Duration::from_secs(6));
//! assert_eq!(map.get("a"), None);
//! ```

pub mod entry;
pub mod expiry;
pub mod map;
pub mod replay;
pub mod sharded;
pub mod token;

// Re-export commonly used types
pub use entry::TimedEntry;
pub use expiry::SweepReport;
pub use map::ExpiringMap;
pub use replay::ReplayGuard;
pub use sharded::ShardedMap;
pub use token::{OwnedToken, StringToken, TokenKey};

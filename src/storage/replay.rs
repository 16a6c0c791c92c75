//! Replay Guard
//!
//! A key-only cache for one-shot tokens. The question it answers is "has
//! this token been seen inside its validity window?". A token's presence in
//! the cache is the whole payload; the only thing stored with it is the
//! time after which the same token may be accepted again.
//!
//! ## Check-and-cache
//!
//! [`ReplayGuard::check_and_cache`] composes two single-key primitives
//! without holding a lock across them:
//!
//! ```text
//! insert_if_absent(key, expires_at)
//!     │
//!     ├── inserted ──────────────────────────────> fresh (true)
//!     │
//!     └── found existing expiry
//!             │
//!             ├── still live ────────────────────> replay (false)
//!             │
//!             └── expired ── replace_if_eq(key, old, expires_at)
//!                                 │
//!                                 └── (won or lost) ──> fresh (true)
//! ```
//!
//! If two callers race to refresh the same stale key, both are told the
//! token is fresh and only one of the new expiry times is kept. A live
//! token is still never reported fresh twice.

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::{CacheConfig, SweepConfig};
use crate::error::Result;
use crate::storage::expiry::{sweep_once, SweepReport, SweepTarget, SweeperSlot};
use crate::storage::sharded::ShardedMap;
use crate::storage::token::TokenKey;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Label used by [`ReplayGuard::start_sweeper`].
pub const REPLAY_SWEEPER_LABEL: &str = "replay-guard-sweeper";

/// The part of the guard the sweeper shares.
struct GuardCore {
    tokens: ShardedMap<String, Timestamp>,
    clock: Arc<dyn Clock>,
}

impl SweepTarget for GuardCore {
    type Key = String;
    type Snapshot = Timestamp;

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn sweep_keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(self.tokens.keys())
    }

    fn snapshot(&self, key: &String) -> Option<Timestamp> {
        self.tokens.get(key)
    }

    fn remove_snapshot(&self, key: &String, snapshot: &Timestamp) -> bool {
        self.tokens.remove_if_eq(key, snapshot)
    }
}

/// Detects re-presentation of one-shot tokens.
///
/// # Example
///
/// ```
/// use timedcache::clock::{Clock, SystemClock};
/// use timedcache::storage::{OwnedToken, ReplayGuard};
/// use std::time::Duration;
///
/// let guard = ReplayGuard::new();
/// let token = OwnedToken::new("8f2c", "alice");
/// let expires_at = SystemClock.now() + Duration::from_secs(60);
///
/// assert!(guard.check_and_cache(&token, expires_at));
/// assert!(!guard.check_and_cache(&token, expires_at)); // replay
/// ```
pub struct ReplayGuard {
    core: Arc<GuardCore>,
    sweeper: SweeperSlot,
}

impl fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("tokens", &self.core.tokens.len())
            .field("sweeping", &self.sweeper.is_running())
            .finish()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayGuard {
    /// Creates an empty guard on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty guard reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(CacheConfig::default(), clock)
    }

    /// Creates a guard from a config. The default TTL has no meaning here
    /// and is ignored.
    pub fn with_config(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: Arc::new(GuardCore {
                tokens: ShardedMap::new(config.shard_count),
                clock,
            }),
            sweeper: SweeperSlot::default(),
        }
    }

    /// Checks whether `token` is fresh, caching it until `expires_at` if so.
    ///
    /// Returns `true` if the token was not cached or its cached window has
    /// passed, and `false` if it is cached and still live (a replay). A
    /// replay leaves the cached entry untouched.
    pub fn check_and_cache<T>(&self, token: &T, expires_at: Timestamp) -> bool
    where
        T: TokenKey + ?Sized,
    {
        let key = token.token_key().into_owned();

        let Some(found) = self.core.tokens.insert_if_absent(key.clone(), expires_at) else {
            return true;
        };

        let now = self.core.clock.now();
        if found >= now {
            trace!(key = %key, "Replay detected");
            return false;
        }

        // Stale entry: take it over. Losing this race to another refresher
        // of the same stale key is fine, the caller still gets `true`.
        if !self.core.tokens.replace_if_eq(&key, &found, expires_at) {
            trace!(key = %key, "Stale token refreshed concurrently");
        }
        true
    }

    /// Returns true if `token` is cached and still inside its window.
    pub fn is_cached<T>(&self, token: &T) -> bool
    where
        T: TokenKey + ?Sized,
    {
        let now = self.core.clock.now();
        let key = token.token_key();
        self.core.tokens.with_value(&*key, |found| {
            found.is_some_and(|expires_at| *expires_at >= now)
        })
    }

    /// Closes a token's window early, but only if it is still cached with
    /// exactly `expires_at`.
    ///
    /// Returns whether anything was removed. An entry re-cached with a
    /// different expiry in the meantime is left alone.
    pub fn remove<T>(&self, token: &T, expires_at: Timestamp) -> bool
    where
        T: TokenKey + ?Sized,
    {
        let key = token.token_key();
        self.core.tokens.remove_if_eq(&*key, &expires_at)
    }

    /// Drops a token regardless of its expiry. Returns whether it was cached.
    pub fn forget<T>(&self, token: &T) -> bool
    where
        T: TokenKey + ?Sized,
    {
        let key = token.token_key();
        self.core.tokens.remove(&*key).is_some()
    }

    /// Returns the number of cached tokens, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.core.tokens.len()
    }

    /// Returns true if no token is cached.
    pub fn is_empty(&self) -> bool {
        self.core.tokens.is_empty()
    }

    /// Drops every cached token.
    pub fn clear(&self) {
        self.core.tokens.clear();
    }

    /// Starts a background sweeper that drops expired tokens every
    /// `interval_secs` seconds.
    ///
    /// Must be called from within a Tokio runtime. Fails if the interval is
    /// under one second or a sweeper is already running.
    pub fn start_sweeper(&self, interval_secs: u64) -> Result<()> {
        self.start_sweeper_labeled(interval_secs, REPLAY_SWEEPER_LABEL)
    }

    /// Like [`start_sweeper`](Self::start_sweeper), tagging the sweeper's logs with `label`.
    pub fn start_sweeper_labeled(&self, interval_secs: u64, label: impl Into<String>) -> Result<()> {
        self.start_sweeper_with(SweepConfig::every_secs(interval_secs, label))
    }

    /// Starts a sweeper from a full config.
    pub fn start_sweeper_with(&self, config: SweepConfig) -> Result<()> {
        self.sweeper.start(&self.core, config)
    }

    /// Stops the background sweeper. Does nothing if none is running.
    pub fn stop_sweeper(&self) {
        self.sweeper.stop();
    }

    /// Returns true while a sweeper is bound to this guard.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Runs one sweep pass on the calling thread.
    pub fn sweep_now(&self) -> SweepReport {
        sweep_once(self.core.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::token::{OwnedToken, StringToken};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const START: u64 = 5_000_000;

    fn manual_guard() -> (ReplayGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
        (ReplayGuard::with_clock(clock.clone()), clock)
    }

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn test_fresh_then_replay() {
        let (guard, _) = manual_guard();
        let token = StringToken::new("nonce");

        assert!(guard.check_and_cache(&token, at(START + 1_000)));
        assert!(!guard.check_and_cache(&token, at(START + 9_000)));
        assert!(guard.is_cached(&token));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_replay_leaves_entry_untouched() {
        let (guard, clock) = manual_guard();

        assert!(guard.check_and_cache("t", at(START + 1_000)));
        assert!(!guard.check_and_cache("t", at(START + 60_000)));

        // The first window still governs
        clock.advance(Duration::from_millis(1_001));
        assert!(!guard.is_cached("t"));
        assert!(guard.check_and_cache("t", at(START + 10_000)));
    }

    #[test]
    fn test_reuse_after_expiry() {
        let (guard, clock) = manual_guard();

        assert!(guard.check_and_cache("t", at(START + 100)));
        clock.advance(Duration::from_secs(1));

        assert!(guard.check_and_cache("t", at(START + 5_000)));
        // The stale entry was overwritten, not merely read through
        assert!(guard.is_cached("t"));
        assert!(!guard.check_and_cache("t", at(START + 9_000)));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_already_expired_token_is_fresh_but_not_live() {
        let (guard, _) = manual_guard();

        assert!(guard.check_and_cache("late", at(START - 1)));
        assert!(!guard.is_cached("late"));
        assert!(guard.check_and_cache("late", at(START + 1_000)));
        assert!(guard.is_cached("late"));
    }

    #[test]
    fn test_expiry_boundary_is_still_live() {
        let (guard, clock) = manual_guard();

        assert!(guard.check_and_cache("t", at(START + 10)));
        clock.set(at(START + 10));
        assert!(!guard.check_and_cache("t", at(START + 20)));

        clock.set(at(START + 11));
        assert!(guard.check_and_cache("t", at(START + 20)));
    }

    #[test]
    fn test_owners_are_separate_slots() {
        let (guard, _) = manual_guard();
        let alice = OwnedToken::new("t-1", "alice");
        let bob = OwnedToken::new("t-1", "bob");

        assert!(guard.check_and_cache(&alice, at(START + 1_000)));
        assert!(guard.check_and_cache(&bob, at(START + 1_000)));
        assert!(!guard.check_and_cache(&alice, at(START + 1_000)));
        assert!(guard.is_cached("t-1.alice"));
    }

    #[test]
    fn test_conditional_remove() {
        let (guard, _) = manual_guard();
        let expiry = at(START + 1_000);
        guard.check_and_cache("t", expiry);

        assert!(!guard.remove("t", at(START + 999)));
        assert!(guard.is_cached("t"));

        assert!(guard.remove("t", expiry));
        assert!(guard.is_empty());
        assert!(guard.check_and_cache("t", expiry));
    }

    #[test]
    fn test_forget() {
        let (guard, _) = manual_guard();
        guard.check_and_cache("t", at(START + 1_000));

        assert!(guard.forget("t"));
        assert!(!guard.forget("t"));
        assert!(guard.is_empty());
    }

    #[test]
    fn test_sweep_now() {
        let (guard, clock) = manual_guard();
        for i in 0..5 {
            guard.check_and_cache(&format!("short{}", i), at(START + 10));
        }
        guard.check_and_cache("long", at(START + 60_000));

        clock.advance(Duration::from_secs(1));
        let report = guard.sweep_now();
        assert_eq!(report, SweepReport { scanned: 6, reclaimed: 5 });
        assert_eq!(guard.len(), 1);

        assert_eq!(guard.sweep_now().reclaimed, 0);
    }

    #[test]
    fn test_sweep_spares_refreshed_token() {
        let (guard, clock) = manual_guard();
        guard.check_and_cache("t", at(START + 10));
        clock.advance(Duration::from_secs(1));

        let key = "t".to_string();
        let snapshot = guard.core.snapshot(&key).unwrap();
        assert!(guard.check_and_cache("t", at(START + 60_000)));

        assert!(!guard.core.remove_snapshot(&key, &snapshot));
        assert!(guard.is_cached("t"));
    }

    #[test]
    fn test_concurrent_fresh_token_accepted_once() {
        let (guard, _) = manual_guard();
        let guard = Arc::new(guard);
        let accepted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let accepted = Arc::clone(&accepted);
                thread::spawn(move || {
                    if guard.check_and_cache("contested", at(START + 60_000)) {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}

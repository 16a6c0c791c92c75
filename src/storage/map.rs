//! Expiring Key/Value Map
//!
//! [`ExpiringMap`] stores each value together with the absolute time it
//! stops being visible. It is meant for short-lived registrations, such as
//! a callback keyed by a nonce that must fire at most once and must not be
//! found after its deadline.
//!
//! ## Visibility Rules
//!
//! - A read returns a value only if the entry exists and has not expired.
//! - An expired entry reads exactly like a missing one, even if it is
//!   still physically stored.
//! - Reads never delete. Memory is reclaimed by explicit removal or by the
//!   background sweeper (see [`crate::storage::expiry`]).

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::{CacheConfig, SweepConfig};
use crate::error::{CacheError, Result};
use crate::storage::entry::TimedEntry;
use crate::storage::expiry::{sweep_once, SweepReport, SweepTarget, SweeperSlot};
use crate::storage::sharded::ShardedMap;
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Label used by [`ExpiringMap::start_sweeper`].
pub const MAP_SWEEPER_LABEL: &str = "expiring-map-sweeper";

/// The part of the map the sweeper shares.
struct MapCore<K, V> {
    entries: ShardedMap<K, TimedEntry<V>>,
    clock: Arc<dyn Clock>,
}

impl<K, V> SweepTarget for MapCore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    type Key = K;
    type Snapshot = TimedEntry<V>;

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn sweep_keys(&self) -> Box<dyn Iterator<Item = K> + '_> {
        Box::new(self.entries.keys())
    }

    fn snapshot(&self, key: &K) -> Option<TimedEntry<V>> {
        self.entries.get(key)
    }

    fn remove_snapshot(&self, key: &K, snapshot: &TimedEntry<V>) -> bool {
        self.entries.remove_if_eq(key, snapshot)
    }
}

/// A concurrent map whose entries vanish at a deadline.
///
/// All methods take `&self`; share it across threads with an `Arc`.
///
/// # Example
///
/// ```
/// use timedcache::storage::ExpiringMap;
/// use std::time::Duration;
///
/// let callbacks: ExpiringMap<String, u32> = ExpiringMap::with_default_ttl(Duration::from_secs(30));
///
/// callbacks.put("nonce-1".to_string(), 7).unwrap();
/// assert_eq!(callbacks.get("nonce-1"), Some(7));
///
/// // Take it out so a replayed nonce finds nothing
/// assert_eq!(callbacks.remove("nonce-1"), Some(7));
/// assert_eq!(callbacks.get("nonce-1"), None);
/// ```
///
/// # Sweeper Lifetime
///
/// A running sweeper is owned by the map and is stopped when the map is
/// dropped. Call [`stop_sweeper`](Self::stop_sweeper) to stop it earlier.
pub struct ExpiringMap<K, V> {
    core: Arc<MapCore<K, V>>,
    default_ttl: Option<Duration>,
    sweeper: SweeperSlot,
}

impl<K, V> fmt::Debug for ExpiringMap<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringMap")
            .field("shards", &self.core.entries.shard_count())
            .field("entries", &self.core.entries.len())
            .field("default_ttl", &self.default_ttl)
            .field("sweeping", &self.sweeper.is_running())
            .finish()
    }
}

impl<K, V> Default for ExpiringMap<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ExpiringMap<K, V>
where
    K: Hash + Eq,
{
    /// Creates a map without a default TTL; every put needs an explicit expiry.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default(), Arc::new(SystemClock))
    }

    /// Creates a map whose shorthand [`put`](Self::put) expires entries after `ttl`.
    ///
    /// A zero `ttl` leaves the shorthand disabled.
    pub fn with_default_ttl(ttl: Duration) -> Self {
        let config = CacheConfig {
            default_ttl: Some(ttl),
            ..Default::default()
        };
        Self::with_config(config, Arc::new(SystemClock))
    }

    /// Creates a map from a config, reading time from `clock`.
    pub fn with_config(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: Arc::new(MapCore {
                entries: ShardedMap::new(config.shard_count),
                clock,
            }),
            default_ttl: config.effective_default_ttl(),
            sweeper: SweeperSlot::default(),
        }
    }

    /// Returns the TTL used by the shorthand put, if one is configured.
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    #[inline]
    fn now(&self) -> Timestamp {
        self.core.clock.now()
    }

    /// Checks if a key holds an unexpired entry.
    pub fn contains_live<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        self.core
            .entries
            .with_value(key, |entry| entry.is_some_and(|e| !e.is_expired(now)))
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. The expired
    /// entry itself is left in place.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let now = self.now();
        self.core.entries.with_value(key, |entry| {
            entry
                .filter(|e| !e.is_expired(now))
                .map(|e| e.value().clone())
        })
    }

    /// Stores `value` until the absolute time `expires_at`.
    ///
    /// Replaces any existing entry and returns its value, expired or not.
    pub fn put_until(&self, key: K, value: V, expires_at: Timestamp) -> Option<V> {
        self.core
            .entries
            .insert(key, TimedEntry::new(value, expires_at))
            .map(TimedEntry::into_value)
    }

    /// Stores `value` for `ttl` from now.
    pub fn put_for(&self, key: K, value: V, ttl: Duration) -> Option<V> {
        let expires_at = self.now() + ttl;
        self.put_until(key, value, expires_at)
    }

    /// Stores `value` for the map's default TTL.
    ///
    /// Fails with [`CacheError::NoDefaultTtl`] if the map was built without one.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>> {
        let ttl = self.default_ttl.ok_or(CacheError::NoDefaultTtl)?;
        Ok(self.put_for(key, value, ttl))
    }

    /// Removes a key unconditionally.
    ///
    /// Returns the value only if it was still live. An expired entry is
    /// removed too, but reported as `None`.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        self.core
            .entries
            .remove(key)
            .filter(|e| !e.is_expired(now))
            .map(TimedEntry::into_value)
    }

    /// Removes a key only if it still holds exactly `(value, expires_at)`.
    ///
    /// Returns whether anything was removed. If another caller replaced or
    /// refreshed the entry in the meantime, this does nothing and returns `false`.
    pub fn remove_exact<Q>(&self, key: &Q, value: V, expires_at: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        self.core
            .entries
            .remove_if_eq(key, &TimedEntry::new(value, expires_at))
    }

    /// Returns how long a key has left, or zero if it is missing or expired.
    pub fn time_remaining<Q>(&self, key: &Q) -> Duration
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        self.core.entries.with_value(key, |entry| {
            entry
                .map(|e| e.time_remaining(now))
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Returns the number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.core.entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.core.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.core.entries.clear();
    }
}

impl<K, V> ExpiringMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Starts a background sweeper that reclaims expired entries every
    /// `interval_secs` seconds.
    ///
    /// Must be called from within a Tokio runtime. Fails if the interval is
    /// under one second or a sweeper is already running.
    pub fn start_sweeper(&self, interval_secs: u64) -> Result<()> {
        self.start_sweeper_labeled(interval_secs, MAP_SWEEPER_LABEL)
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

    /// Returns true while a sweeper is bound to this map.
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
    use std::thread;

    const START: u64 = 1_000_000;

    fn manual_map(default_ttl: Option<Duration>) -> (ExpiringMap<String, i32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
        let config = CacheConfig {
            default_ttl,
            ..Default::default()
        };
        let map = ExpiringMap::with_config(config, clock.clone());
        (map, clock)
    }

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn test_get_nonexistent() {
        let (map, _) = manual_map(None);
        assert_eq!(map.get("nonexistent"), None);
        assert!(!map.contains_live("nonexistent"));
        assert_eq!(map.time_remaining("nonexistent"), Duration::ZERO);
    }

    #[test]
    fn test_put_and_get() {
        let (map, _) = manual_map(None);

        assert_eq!(map.put_until("a".to_string(), 1, at(START + 5_000)), None);
        assert_eq!(map.get("a"), Some(1));
        assert!(map.contains_live("a"));
    }

    #[test]
    fn test_put_returns_previous_even_if_expired() {
        let (map, clock) = manual_map(None);

        map.put_until("k".to_string(), 1, at(START + 100));
        assert_eq!(map.put_until("k".to_string(), 2, at(START + 100)), Some(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(map.get("k"), None);
        assert_eq!(map.put_until("k".to_string(), 3, at(START + 5_000)), Some(2));
        assert_eq!(map.get("k"), Some(3));
    }

    #[test]
    fn test_past_expiry_is_invisible_immediately() {
        let (map, _) = manual_map(None);

        map.put_until("old".to_string(), 9, at(START - 1));
        assert_eq!(map.get("old"), None);
        assert!(!map.contains_live("old"));

        // Lazily hidden, not deleted
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_expiry_boundary() {
        let (map, clock) = manual_map(None);
        map.put_until("k".to_string(), 1, at(START + 10));

        clock.set(at(START + 10));
        assert_eq!(map.get("k"), Some(1));

        clock.set(at(START + 11));
        assert_eq!(map.get("k"), None);
    }

    #[test]
    fn test_shorthand_put_requires_default_ttl() {
        let (map, clock) = manual_map(None);

        assert_eq!(map.put("a".to_string(), 1), Err(CacheError::NoDefaultTtl));
        assert!(map.is_empty());

        map.put_until("a".to_string(), 1, at(START + 5_000));
        assert_eq!(map.get("a"), Some(1));

        clock.advance(Duration::from_millis(5_001));
        assert_eq!(map.get("a"), None);
    }

    #[test]
    fn test_shorthand_put_uses_default_ttl() {
        let (map, clock) = manual_map(Some(Duration::from_secs(2)));

        assert_eq!(map.put("a".to_string(), 1), Ok(None));
        assert_eq!(map.put("a".to_string(), 2), Ok(Some(1)));
        assert_eq!(map.time_remaining("a"), Duration::from_secs(2));

        clock.advance(Duration::from_millis(1_500));
        assert_eq!(map.get("a"), Some(2));
        assert_eq!(map.time_remaining("a"), Duration::from_millis(500));

        clock.advance(Duration::from_millis(501));
        assert_eq!(map.get("a"), None);
        assert_eq!(map.time_remaining("a"), Duration::ZERO);
    }

    #[test]
    fn test_zero_default_ttl_disables_shorthand() {
        let map: ExpiringMap<String, i32> = ExpiringMap::with_default_ttl(Duration::ZERO);
        assert_eq!(map.default_ttl(), None);
        assert!(map.put("a".to_string(), 1).is_err());
    }

    #[test]
    fn test_remove() {
        let (map, clock) = manual_map(None);

        map.put_until("live".to_string(), 1, at(START + 1_000));
        map.put_until("stale".to_string(), 2, at(START + 10));
        clock.advance(Duration::from_millis(100));

        assert_eq!(map.remove("live"), Some(1));
        assert_eq!(map.remove("live"), None);

        // Physically removed, logically reported as nothing there
        assert_eq!(map.remove("stale"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_remove_exact() {
        let (map, _) = manual_map(None);
        let expiry = at(START + 1_000);
        map.put_until("k".to_string(), 1, expiry);

        assert!(!map.remove_exact("k", 2, expiry));
        assert!(!map.remove_exact("k", 1, at(START + 999)));
        assert_eq!(map.get("k"), Some(1));

        assert!(map.remove_exact("k", 1, expiry));
        assert!(map.is_empty());
        assert!(!map.remove_exact("k", 1, expiry));
    }

    #[test]
    fn test_remove_exact_loses_to_concurrent_replace() {
        let (map, _) = manual_map(None);
        let first = at(START + 1_000);
        map.put_until("k".to_string(), 1, first);

        // Thread A reads the entry...
        let seen = map.get("k").unwrap();

        // ...thread B replaces it...
        map.put_until("k".to_string(), 1, at(START + 2_000));

        // ...A's removal targets the old snapshot and must fail.
        assert!(!map.remove_exact("k", seen, first));
        assert_eq!(map.get("k"), Some(1));
        assert_eq!(map.time_remaining("k"), Duration::from_millis(2_000));
    }

    #[test]
    fn test_sweep_now() {
        let (map, clock) = manual_map(None);

        for i in 0..10 {
            map.put_until(format!("short{}", i), i, at(START + 50));
        }
        map.put_until("long".to_string(), 99, at(START + 60_000));
        assert_eq!(map.len(), 11);

        clock.advance(Duration::from_secs(1));

        let report = map.sweep_now();
        assert_eq!(report.scanned, 11);
        assert_eq!(report.reclaimed, 10);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("long"), Some(99));

        // Idempotent: nothing more to reclaim
        assert_eq!(map.sweep_now().reclaimed, 0);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_sweep_spares_refreshed_entry() {
        let (map, clock) = manual_map(None);
        map.put_until("k".to_string(), 1, at(START + 10));
        clock.advance(Duration::from_secs(1));

        // Emulate the sweeper's read, then a writer refreshing the key
        let snapshot = map.core.snapshot(&"k".to_string()).unwrap();
        map.put_until("k".to_string(), 2, at(START + 60_000));

        assert!(!map.core.remove_snapshot(&"k".to_string(), &snapshot));
        assert_eq!(map.get("k"), Some(2));
    }

    #[test]
    fn test_stop_sweeper_when_never_started() {
        let (map, _) = manual_map(None);
        map.stop_sweeper();
        map.stop_sweeper();
        assert!(!map.is_sweeping());
    }

    #[test]
    fn test_clear() {
        let (map, _) = manual_map(None);
        map.put_until("a".to_string(), 1, at(START + 1_000));
        map.put_until("b".to_string(), 2, at(START + 1_000));
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_debug_output() {
        let (map, _) = manual_map(Some(Duration::from_secs(1)));
        let debug = format!("{:?}", map);
        assert!(debug.contains("ExpiringMap"));
        assert!(debug.contains("sweeping: false"));
    }

    #[test]
    fn test_concurrent_access() {
        let map = Arc::new(ExpiringMap::<String, usize>::with_default_ttl(
            Duration::from_secs(60),
        ));
        let mut handles = vec![];

        // Spawn multiple writers
        for i in 0..10 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    map.put(key.clone(), j).unwrap();
                    assert_eq!(map.get(&key), Some(j));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 1000);
    }
}

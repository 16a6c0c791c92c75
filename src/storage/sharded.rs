//! Sharded Concurrent HashMap
//!
//! The keyed store underneath both caches. Instead of one big lock, keys are
//! spread over independent shards, each a `RwLock<HashMap>`, so operations on
//! different keys rarely touch the same lock.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ShardedMap                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every primitive takes exactly one shard lock and releases it before
//! returning, which makes each one atomic for its key. Compositions of
//! primitives (insert-if-absent followed by replace-if-equal, say) are not
//! atomic and must be written to tolerate interleaving.

use std::borrow::Borrow;
use std::collections::hash_map::{self, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of shards used when the caller doesn't pick one.
/// More shards = less lock contention, but more memory overhead.
pub const DEFAULT_SHARDS: usize = 64;

/// A map partitioned into independently locked shards.
#[derive(Debug)]
pub struct ShardedMap<K, V> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
}

impl<K, V> Default for ShardedMap<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl<K, V> ShardedMap<K, V>
where
    K: Hash + Eq,
{
    /// Creates a map with `shard_count` shards (at least one).
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    // Values are only ever swapped whole, never edited in place, so a panic
    // while a guard was held cannot leave a torn value behind. Poisoning
    // is therefore ignored.
    #[inline]
    fn read_shard(&self, index: usize) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.shards[index]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn write_shard(&self, index: usize) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.shards[index]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn read_for<Q>(&self, key: &Q) -> RwLockReadGuard<'_, HashMap<K, V>>
    where
        Q: Hash + ?Sized,
    {
        self.read_shard(self.shard_index(key))
    }

    #[inline]
    fn write_for<Q>(&self, key: &Q) -> RwLockWriteGuard<'_, HashMap<K, V>>
    where
        Q: Hash + ?Sized,
    {
        self.write_shard(self.shard_index(key))
    }

    /// Looks a key up and hands the stored value to `f` while the read lock is held.
    pub fn with_value<Q, R>(&self, key: &Q, f: impl FnOnce(Option<&V>) -> R) -> R
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let data = self.read_for(key);
        f(data.get(key))
    }

    /// Returns a clone of the stored value.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.with_value(key, |v| v.cloned())
    }

    /// Stores `value` under `key` unconditionally, returning the value it displaced.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.write_for(&key).insert(key, value)
    }

    /// Stores `value` only if `key` is vacant.
    ///
    /// Returns `None` if the insert happened, or a clone of the value that
    /// was already there (which is left untouched).
    pub fn insert_if_absent(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        let mut data = self.write_for(&key);
        match data.entry(key) {
            hash_map::Entry::Occupied(existing) => Some(existing.get().clone()),
            hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                None
            }
        }
    }

    /// Swaps in `new` only if the current value equals `expected`.
    pub fn replace_if_eq<Q>(&self, key: &Q, expected: &V, new: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        let mut data = self.write_for(key);
        match data.get_mut(key) {
            Some(current) if *current == *expected => {
                *current = new;
                true
            }
            _ => false,
        }
    }

    /// Removes a key unconditionally, returning its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.write_for(key).remove(key)
    }

    /// Removes a key only if its current value equals `expected`.
    pub fn remove_if_eq<Q>(&self, key: &Q, expected: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        let mut data = self.write_for(key);
        match data.get(key) {
            Some(current) if *current == *expected => {
                data.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Returns the number of stored entries.
    ///
    /// Shards are counted one at a time, so under concurrent writes this is
    /// approximate.
    pub fn len(&self) -> usize {
        (0..self.shards.len())
            .map(|i| self.read_shard(i).len())
            .sum()
    }

    /// Returns true if no shard holds an entry.
    pub fn is_empty(&self) -> bool {
        (0..self.shards.len()).all(|i| self.read_shard(i).is_empty())
    }

    /// Drops every entry, shard by shard.
    pub fn clear(&self) {
        for i in 0..self.shards.len() {
            self.write_shard(i).clear();
        }
    }

    /// Returns a lazy walk over the current keys.
    ///
    /// Keys are snapshotted one shard at a time under a short read lock, so
    /// the walk never holds a lock between calls to `next` and never blocks
    /// writers for longer than one shard copy. It is weakly consistent:
    /// keys inserted or removed during the walk may or may not show up.
    pub fn keys(&self) -> Keys<'_, K, V>
    where
        K: Clone,
    {
        Keys {
            map: self,
            next_shard: 0,
            buffered: Vec::new().into_iter(),
        }
    }
}

/// Iterator returned by [`ShardedMap::keys`].
#[derive(Debug)]
pub struct Keys<'a, K, V> {
    map: &'a ShardedMap<K, V>,
    next_shard: usize,
    buffered: std::vec::IntoIter<K>,
}

impl<K, V> Iterator for Keys<'_, K, V>
where
    K: Hash + Eq + Clone,
{
    type Item = K;

    fn next(&mut self) -> Option<K> {
        loop {
            if let Some(key) = self.buffered.next() {
                return Some(key);
            }
            if self.next_shard >= self.map.shard_count() {
                return None;
            }
            let snapshot: Vec<K> = self.map.read_shard(self.next_shard).keys().cloned().collect();
            self.next_shard += 1;
            self.buffered = snapshot.into_iter();
        }
    }
}

//! Timed Entries
//!
//! A [`TimedEntry`] pairs a value with the absolute time after which it is
//! gone. Entries are never edited in place: refreshing a key swaps in a new
//! entry, which is what lets conditional removal tell an untouched entry
//! apart from a refreshed one.

use crate::clock::Timestamp;
use std::time::Duration;

/// A stored value with an absolute expiry time.
///
/// Two entries are equal only if both the values and the expiry times are
/// equal. The derived `Hash` feeds both into the hasher, so entries that
/// differ only in expiry still hash apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimedEntry<V> {
    value: V,
    expires_at: Timestamp,
}

impl<V> TimedEntry<V> {
    /// Creates an entry that expires at `expires_at`.
    pub fn new(value: V, expires_at: Timestamp) -> Self {
        Self { value, expires_at }
    }

    /// Returns the stored value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the expiry time.
    #[inline]
    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Consumes the entry, returning the value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// Checks if this entry has expired.
    ///
    /// The boundary is exclusive: at `now == expires_at` the entry is still live.
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at < now
    }

    /// Returns the time left before expiry, or zero if already expired.
    pub fn time_remaining(&self, now: Timestamp) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

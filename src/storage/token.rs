//! Replay Guard Keys
//!
//! A [`ReplayGuard`](crate::storage::ReplayGuard) is keyed by strings, but
//! callers rarely hold "the key" directly: they hold a nonce, or a token plus
//! whoever presented it. [`TokenKey`] turns those into the string the guard
//! stores, so every caller derives keys the same way.

use std::borrow::Cow;
use std::fmt;

/// Anything that can name a slot in a replay guard.
pub trait TokenKey {
    /// Returns the key under which this token is cached.
    fn token_key(&self) -> Cow<'_, str>;
}

impl TokenKey for str {
    fn token_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl TokenKey for String {
    fn token_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

/// A plain string used as a token key.
///
/// # Example
///
/// ```
/// use timedcache::storage::{StringToken, TokenKey};
///
/// let token = StringToken::new("nonce-8f2c");
/// assert_eq!(token.token_key(), "nonce-8f2c");
/// assert_eq!(token.as_str(), "nonce-8f2c");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StringToken(String);

impl StringToken {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TokenKey for StringToken {
    fn token_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.0)
    }
}

impl From<String> for StringToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StringToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for StringToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A one-shot token bound to the party that presented it.
///
/// The same token value presented by two different owners occupies two
/// different slots, keyed as `"{token}.{owner}"`. Any `.` or `\` inside the
/// token is backslash-escaped, so the first bare `.` always ends the token and
/// `("a.b", "c")` and `("a", "b.c")` never share a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnedToken {
    token: String,
    owner: String,
}

impl OwnedToken {
    pub fn new(token: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            owner: owner.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl TokenKey for OwnedToken {
    fn token_key(&self) -> Cow<'_, str> {
        let mut key = String::with_capacity(self.token.len() + self.owner.len() + 1);
        for c in self.token.chars() {
            if matches!(c, '.' | '\\') {
                key.push('\\');
            }
            key.push(c);
        }
        key.push('.');
        key.push_str(&self.owner);
        Cow::Owned(key)
    }
}

//! Prefixed cache keys.
//!
//! A [`CacheKey`] can only be produced by a [`Keyspace`], so nothing reaches a
//! backing store without the configured prefix in front of it.

use std::fmt;

/// Separator between the prefix and the logical key.
const SEPARATOR: char = ':';

/// A fully qualified cache key: `{prefix}:{logical-key}`.
///
/// The private field keeps construction inside this module; the only public
/// way to build one is [`Keyspace::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    full: String,
    prefix_len: usize,
}

impl CacheKey {
    /// The full prefixed key as stored in the backend.
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// The key the caller supplied, without the prefix.
    pub fn logical(&self) -> &str {
        &self.full[self.prefix_len + SEPARATOR.len_utf8()..]
    }

    /// The prefix this key was built with.
    pub fn prefix(&self) -> &str {
        &self.full[..self.prefix_len]
    }

    /// Raw bytes of the full key, for byte-keyed stores.
    pub fn as_bytes(&self) -> &[u8] {
        self.full.as_bytes()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

/// Builds [`CacheKey`]s for one configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    /// Create a keyspace for `prefix`.
    ///
    /// The prefix is validated by the strategy configuration before a
    /// keyspace is built from it.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Qualify a logical key with this keyspace's prefix.
    pub fn key(&self, logical: &str) -> CacheKey {
        let mut full = String::with_capacity(self.prefix.len() + 1 + logical.len());
        full.push_str(&self.prefix);
        full.push(SEPARATOR);
        full.push_str(logical);
        CacheKey {
            full,
            prefix_len: self.prefix.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_is_prefixed() {
        let keyspace = Keyspace::new("lms");
        let key = keyspace.key("quiz:1");
        assert_eq!(key.as_str(), "lms:quiz:1");
        assert_eq!(key.to_string(), "lms:quiz:1");
    }

    #[test]
    fn test_logical_and_prefix_parts() {
        let key = Keyspace::new("custom").key("test");
        assert_eq!(key.prefix(), "custom");
        assert_eq!(key.logical(), "test");
    }

    #[test]
    fn test_empty_logical_key() {
        let key = Keyspace::new("lms").key("");
        assert_eq!(key.as_str(), "lms:");
        assert_eq!(key.logical(), "");
    }

    #[test]
    fn test_different_prefixes_do_not_collide() {
        let a = Keyspace::new("lms").key("quiz:1");
        let b = Keyspace::new("lms2").key("quiz:1");
        assert_ne!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Keys are always `{prefix}:{logical}` and both parts are recoverable.
        #[test]
        fn prop_key_format(prefix in "[a-z]{1,8}", logical in ".{0,32}") {
            let key = Keyspace::new(prefix.clone()).key(&logical);
            prop_assert_eq!(key.as_str(), format!("{}:{}", prefix, logical));
            prop_assert_eq!(key.prefix(), prefix.as_str());
            prop_assert_eq!(key.logical(), logical.as_str());
        }

        /// Same inputs always produce the same key.
        #[test]
        fn prop_key_deterministic(prefix in "[a-z]{1,8}", logical in "[a-z0-9:]{0,16}") {
            let keyspace = Keyspace::new(prefix);
            prop_assert_eq!(keyspace.key(&logical), keyspace.key(&logical));
        }
    }
}

//! Tag sets for grouped invalidation.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// A normalized set of cache tags.
///
/// Tags are de-duplicated and kept in sorted order, and empty strings are
/// dropped, so `["b", "a", "a"]` and `["a", "b"]` are the same scope. The
/// empty set means "untagged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagSet {
    tags: BTreeSet<String>,
}

impl TagSet {
    /// Build a tag set from any list of tag names.
    pub fn new<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            tags: tags
                .into_iter()
                .map(Into::<String>::into)
                .filter(|tag| !tag.is_empty())
                .collect(),
        }
    }

    /// The untagged scope.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Iterate tags in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Returns true if the two sets share at least one tag.
    pub fn intersects(&self, other: &TagSet) -> bool {
        self.tags.iter().any(|tag| other.tags.contains(tag))
    }

    /// Stable namespace identifier for this scope.
    ///
    /// Empty for the untagged scope; otherwise the hex SHA-256 of the sorted,
    /// length-prefixed tags, so no two distinct sets share a namespace.
    pub fn namespace(&self) -> String {
        if self.tags.is_empty() {
            return String::new();
        }

        let mut hasher = Sha256::new();
        for tag in &self.tags {
            hasher.update((tag.len() as u64).to_le_bytes());
            hasher.update(tag.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, tag) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(tag)?;
        }
        f.write_str("]")
    }
}

impl<T: Into<String>> FromIterator<T> for TagSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

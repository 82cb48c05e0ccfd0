//! In-process tagged cache store.
//!
//! Entries live in a map keyed by (scope, key). A tag index maps each tag to
//! the scoped keys written under it so a flush touches only those entries.
//!
//! # Thread Safety
//!
//! One `RwLock` guards entries and the tag index together; statistics sit
//! behind their own lock and are best-effort (a poisoned stats lock is
//! ignored rather than failing the cache operation).
//!
//! # Expiry
//!
//! An expired entry is dropped when it is read, and every
//! [`DEFAULT_PURGE_INTERVAL`] writes `put` sweeps all expired entries first,
//! so keys that are never read again do not accumulate.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lms_core::{LmsResult, StoreError};
use serde_json::Value;

use super::traits::{CacheStats, CacheStore};
use crate::keyspace::CacheKey;
use crate::tags::TagSet;

/// Writes between two expiry sweeps.
pub const DEFAULT_PURGE_INTERVAL: u64 = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopedKey {
    scope: TagSet,
    key: String,
}

impl ScopedKey {
    fn new(scope: &TagSet, key: &CacheKey) -> Self {
        Self {
            scope: scope.clone(),
            key: key.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// `None` when the TTL is too large to represent.
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ScopedKey, Entry>,
    tag_index: HashMap<String, HashSet<ScopedKey>>,
    writes_since_purge: u64,
}

impl Inner {
    fn remove(&mut self, scoped: &ScopedKey) -> Option<Entry> {
        let entry = self.entries.remove(scoped)?;
        for tag in scoped.scope.iter() {
            if let Some(members) = self.tag_index.get_mut(tag) {
                members.remove(scoped);
                if members.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        Some(entry)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> u64 {
        let doomed: Vec<ScopedKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(scoped, _)| scoped.clone())
            .collect();

        for scoped in &doomed {
            self.remove(scoped);
        }
        self.writes_since_purge = 0;
        doomed.len() as u64
    }
}

/// Tagged TTL cache held in process memory.
///
/// Suitable for single-process deployments and as the reference store in
/// tests.
#[derive(Debug)]
pub struct InMemoryTagStore {
    inner: RwLock<Inner>,
    stats: RwLock<CacheStats>,
    purge_interval: u64,
}

impl Default for InMemoryTagStore {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            stats: RwLock::new(CacheStats::default()),
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }
}

impl InMemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired entries every `writes` puts instead of the default.
    pub fn with_purge_interval(mut self, writes: u64) -> Self {
        self.purge_interval = writes.max(1);
        self
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a live entry exists, without touching statistics.
    pub fn contains(&self, scope: &TagSet, key: &CacheKey) -> bool {
        let now = Utc::now();
        self.inner
            .read()
            .ok()
            .and_then(|inner| {
                inner
                    .entries
                    .get(&ScopedKey::new(scope, key))
                    .map(|entry| !entry.is_expired(now))
            })
            .unwrap_or(false)
    }

    /// Read a live entry without touching statistics.
    pub fn peek(&self, scope: &TagSet, key: &CacheKey) -> Option<Value> {
        let now = Utc::now();
        let inner = self.inner.read().ok()?;
        inner
            .entries
            .get(&ScopedKey::new(scope, key))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    fn record<F: FnOnce(&mut CacheStats)>(&self, update: F) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

fn expiry_for(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

#[async_trait]
impl CacheStore for InMemoryTagStore {
    async fn get(&self, scope: &TagSet, key: &CacheKey) -> LmsResult<Option<Value>> {
        let scoped = ScopedKey::new(scope, key);
        let now = Utc::now();

        let found = {
            let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
            inner.entries.get(&scoped).cloned()
        };

        match found {
            Some(entry) if !entry.is_expired(now) => {
                self.record(|s| s.hits += 1);
                Ok(Some(entry.value))
            }
            Some(_) => {
                let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
                // Re-check under the write lock; a concurrent put may have refreshed it.
                if inner
                    .entries
                    .get(&scoped)
                    .is_some_and(|entry| entry.is_expired(now))
                {
                    inner.remove(&scoped);
                    drop(inner);
                    self.record(|s| s.expired += 1);
                } else {
                    drop(inner);
                }
                self.record(|s| s.misses += 1);
                Ok(None)
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        scope: &TagSet,
        key: &CacheKey,
        value: &Value,
        ttl: Duration,
    ) -> LmsResult<()> {
        let scoped = ScopedKey::new(scope, key);
        let entry = Entry {
            value: value.clone(),
            expires_at: expiry_for(Utc::now(), ttl),
        };

        let purged = {
            let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
            inner.writes_since_purge += 1;
            let purged = if inner.writes_since_purge >= self.purge_interval {
                inner.purge_expired(Utc::now())
            } else {
                0
            };

            for tag in scope.iter() {
                inner
                    .tag_index
                    .entry(tag.to_string())
                    .or_default()
                    .insert(scoped.clone());
            }
            inner.entries.insert(scoped, entry);
            purged
        };

        self.record(|s| {
            s.writes += 1;
            s.expired += purged;
        });
        Ok(())
    }

    async fn forget(&self, scope: &TagSet, key: &CacheKey) -> LmsResult<bool> {
        let scoped = ScopedKey::new(scope, key);
        let now = Utc::now();

        let removed = {
            let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
            inner.remove(&scoped)
        };

        match removed {
            Some(entry) => {
                self.record(|s| s.invalidations += 1);
                Ok(!entry.is_expired(now))
            }
            None => Ok(false),
        }
    }

    async fn flush_tags(&self, tags: &TagSet) -> LmsResult<u64> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;

        let doomed: HashSet<ScopedKey> = tags
            .iter()
            .filter_map(|tag| inner.tag_index.get(tag))
            .flat_map(|members| members.iter().cloned())
            .collect();

        let mut removed = 0u64;
        for scoped in &doomed {
            if inner.remove(scoped).is_some() {
                removed += 1;
            }
        }
        drop(inner);

        self.record(|s| s.invalidations += removed);
        Ok(removed)
    }

    async fn purge_expired(&self) -> LmsResult<u64> {
        let purged = {
            let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
            inner.purge_expired(Utc::now())
        };
        self.record(|s| s.expired += purged);
        Ok(purged)
    }

    async fn stats(&self) -> LmsResult<CacheStats> {
        let entry_count = {
            let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
            inner.entries.len() as u64
        };
        let stats = self.stats.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(CacheStats {
            entry_count,
            ..stats.clone()
        })
    }
}

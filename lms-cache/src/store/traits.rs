//! Backing cache store trait and statistics.
//!
//! Strategies never talk to a concrete cache; they talk to a [`CacheStore`].
//! Implementations own TTL expiry and tag bookkeeping.

use std::time::Duration;

use async_trait::async_trait;
use lms_core::LmsResult;
use serde_json::Value;

use crate::callback::Fetcher;
use crate::keyspace::CacheKey;
use crate::tags::TagSet;

/// Key-value cache with tag-scoped operations.
///
/// # Tag scope
///
/// Every operation takes the [`TagSet`] it runs under. An entry written under
/// a scope is only visible to reads and forgets under the same scope, and is
/// removed by [`flush_tags`](CacheStore::flush_tags) on any tag in that scope.
/// The empty scope is the untagged keyspace.
///
/// # Expiry
///
/// Entries past their TTL must behave exactly like absent entries, and the
/// space they hold must eventually be reclaimed without a read of the same
/// key.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a live entry, or `None` on miss or expiry.
    async fn get(&self, scope: &TagSet, key: &CacheKey) -> LmsResult<Option<Value>>;

    /// Store an entry, replacing any previous value under the same scope.
    async fn put(
        &self,
        scope: &TagSet,
        key: &CacheKey,
        value: &Value,
        ttl: Duration,
    ) -> LmsResult<()>;

    /// Remove an entry. Returns whether a live entry was removed; an absent
    /// key is not an error.
    async fn forget(&self, scope: &TagSet, key: &CacheKey) -> LmsResult<bool>;

    /// Get-or-populate in one store call.
    ///
    /// On hit, `fetch` is dropped without running. On miss, its result is
    /// stored with `ttl` and returned. Fetch errors propagate and nothing is
    /// stored.
    async fn remember<'a>(
        &self,
        scope: &TagSet,
        key: &CacheKey,
        ttl: Duration,
        fetch: Fetcher<'a>,
    ) -> LmsResult<Value> {
        if let Some(value) = self.get(scope, key).await? {
            return Ok(value);
        }

        let value = fetch.fetch().await?;
        self.put(scope, key, &value, ttl).await?;
        Ok(value)
    }

    /// Remove every entry whose scope carries any of `tags`.
    ///
    /// Returns the number of entries removed.
    async fn flush_tags(&self, tags: &TagSet) -> LmsResult<u64>;

    /// Drop every expired entry and its tag bookkeeping.
    ///
    /// Returns the number of entries reclaimed. Stores that expire entries
    /// on their own leave the default.
    async fn purge_expired(&self) -> LmsResult<u64> {
        Ok(0)
    }

    /// Get store statistics.
    async fn stats(&self) -> LmsResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a live entry.
    pub hits: u64,
    /// Number of reads that found nothing (including expired entries).
    pub misses: u64,
    /// Number of successful writes.
    pub writes: u64,
    /// Number of entries removed by forget or tag flush.
    pub invalidations: u64,
    /// Number of expired entries reclaimed by reads or sweeps.
    pub expired: u64,
    /// Number of entries currently stored (expired ones linger until the next
    /// read or sweep).
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

//! LMS Cache - Pluggable Cache-Consistency Strategies
//!
//! Reads and writes of authoritative data go through one [`CacheStrategy`],
//! chosen by configuration at startup:
//!
//! - **Cache-Aside**: check cache, fetch on miss, populate. Writes refresh the
//!   cache only.
//! - **Read-Through**: the store loads misses itself. Writes persist and then
//!   invalidate.
//! - **Write-Through**: writes persist and then populate the cache.
//! - **No-Cache**: a baseline that always goes to the system of record.
//!
//! Entries can be grouped by tags and flushed by any tag they carry. Tag scope
//! travels with each call through a [`CacheHandle`].
//!
//! ```ignore
//! let store = Arc::new(InMemoryTagStore::new());
//! let strategy = StrategySelector::init(CacheStrategyConfig::from_env()?, store)?;
//!
//! let quiz = strategy
//!     .tags(["quizzes"])
//!     .get("quiz:1", Fetcher::new(|| async { db.quiz(1).await }))
//!     .await?;
//! strategy.flush_tags(&TagSet::new(["quizzes"])).await;
//! ```

pub mod callback;
pub mod handle;
pub mod keyspace;
pub mod selector;
pub mod store;
pub mod strategy;
pub mod tags;

#[cfg(test)]
mod test_support;

pub use callback::{Fetcher, Persister};
pub use handle::{CacheHandle, CacheStrategyExt};
pub use keyspace::{CacheKey, Keyspace};
pub use selector::StrategySelector;
pub use store::{CacheStats, CacheStore, InMemoryTagStore, LmdbStoreError, LmdbTagStore};
pub use strategy::{
    CacheAsideStrategy, CacheStrategy, NoCacheStrategy, ReadThroughStrategy, WriteThroughStrategy,
};
pub use tags::TagSet;

pub use lms_core::{
    CacheStrategyConfig, CallbackError, ConfigError, LmsError, LmsResult, StoreError, StrategyKind,
};

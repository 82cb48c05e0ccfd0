//! Cache-consistency strategies.
//!
//! Each strategy is an independent type implementing [`CacheStrategy`]; they
//! differ only in how reads and writes interact with the backing store:
//!
//! | Strategy      | Read on miss            | Write                          |
//! |---------------|-------------------------|--------------------------------|
//! | Cache-Aside   | fetch, store, return    | store only (persist ignored)   |
//! | Read-Through  | store-level remember    | persist, then invalidate       |
//! | Write-Through | fetch, store, return    | persist, then store            |
//! | No-Cache      | fetch, return           | persist only                   |
//!
//! Tag scope is passed into every call as a [`TagSet`]. Strategies hold no
//! per-call state, so one instance is shared by every task in the process.

mod binding;
pub mod cache_aside;
pub mod no_cache;
pub mod read_through;
pub mod write_through;

use async_trait::async_trait;
use lms_core::{CacheStrategyConfig, LmsResult, StrategyKind};
use serde_json::Value;

use crate::callback::{Fetcher, Persister};
use crate::tags::TagSet;

pub use cache_aside::CacheAsideStrategy;
pub use no_cache::NoCacheStrategy;
pub use read_through::ReadThroughStrategy;
pub use write_through::WriteThroughStrategy;

/// The contract every cache strategy implements.
///
/// Callers normally go through [`CacheStrategyExt::tags`](crate::CacheStrategyExt::tags)
/// or [`untagged`](crate::CacheStrategyExt::untagged) rather than passing a
/// scope by hand.
#[async_trait]
pub trait CacheStrategy: Send + Sync {
    /// Which protocol this instance implements.
    fn kind(&self) -> StrategyKind;

    /// The configuration this instance was built with.
    fn config(&self) -> &CacheStrategyConfig;

    /// Read `key`, running `fetch` on a miss.
    ///
    /// Never runs a persist callback. Store and fetch errors propagate.
    async fn get<'a>(&self, scope: &TagSet, key: &str, fetch: Fetcher<'a>) -> LmsResult<Value>;

    /// Commit `value` for `key` following this strategy's write protocol.
    ///
    /// `Ok(false)` means a best-effort step failed and the cache may be stale;
    /// the system of record holds whatever `persist` achieved.
    async fn put<'a>(
        &self,
        scope: &TagSet,
        key: &str,
        value: Value,
        persist: Option<Persister<'a>>,
    ) -> LmsResult<bool>;

    /// Drop any cached entry for `key`. Absent keys are not an error.
    async fn forget(&self, scope: &TagSet, key: &str) -> LmsResult<bool>;

    /// Same as [`get`](CacheStrategy::get) for every strategy.
    async fn remember<'a>(
        &self,
        scope: &TagSet,
        key: &str,
        fetch: Fetcher<'a>,
    ) -> LmsResult<Value> {
        self.get(scope, key, fetch).await
    }

    /// Remove every entry carrying any of `tags`, whichever strategy wrote it.
    ///
    /// Store failures are logged and reported as `false`.
    async fn flush_tags(&self, tags: &TagSet) -> bool;
}

//! Cache-Aside (lazy loading).
//!
//! READ: check cache, on miss fetch, store and return.
//! WRITE: the application writes the system of record itself; `put` only
//! refreshes the cache and never runs a persist callback.

use std::sync::Arc;

use async_trait::async_trait;
use lms_core::{CacheStrategyConfig, LmsResult, StrategyKind};
use serde_json::Value;
use tracing::debug;

use super::binding::StoreBinding;
use super::CacheStrategy;
use crate::callback::{Fetcher, Persister};
use crate::store::CacheStore;
use crate::tags::TagSet;

/// Cache-Aside strategy.
///
/// Store failures propagate on every operation except `flush_tags`; there is
/// no stale-read fallback.
pub struct CacheAsideStrategy {
    binding: StoreBinding,
}

impl CacheAsideStrategy {
    pub fn new(config: CacheStrategyConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            binding: StoreBinding::new(StrategyKind::CacheAside, config, store),
        }
    }
}

#[async_trait]
impl CacheStrategy for CacheAsideStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CacheAside
    }

    fn config(&self) -> &CacheStrategyConfig {
        self.binding.config()
    }

    async fn get<'a>(&self, scope: &TagSet, key: &str, fetch: Fetcher<'a>) -> LmsResult<Value> {
        self.binding.lookup_or_fill(scope, key, fetch).await
    }

    async fn put<'a>(
        &self,
        scope: &TagSet,
        key: &str,
        value: Value,
        persist: Option<Persister<'a>>,
    ) -> LmsResult<bool> {
        if persist.is_some() {
            debug!(key, "cache-aside ignores persist callback");
        }

        let key = self.binding.key(key);
        self.binding.write(scope, &key, &value).await?;
        Ok(true)
    }

    async fn forget(&self, scope: &TagSet, key: &str) -> LmsResult<bool> {
        self.binding.invalidate(scope, key).await
    }

    async fn flush_tags(&self, tags: &TagSet) -> bool {
        self.binding.flush(tags).await
    }
}

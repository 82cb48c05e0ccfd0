//! Write-Through.
//!
//! READ: as Cache-Aside. WRITE: persist to the system of record first, then
//! store the same value in the cache so the next read is a hit.

use std::sync::Arc;

use async_trait::async_trait;
use lms_core::{CacheStrategyConfig, LmsResult, StrategyKind};
use serde_json::Value;
use tracing::warn;

use super::binding::StoreBinding;
use super::CacheStrategy;
use crate::callback::{Fetcher, Persister};
use crate::store::CacheStore;
use crate::tags::TagSet;

/// Write-Through strategy.
///
/// `put` is the one operation that downgrades failures: a persist or store
/// error is logged and reported as `Ok(false)`. When persist fails the cache
/// is not touched.
pub struct WriteThroughStrategy {
    binding: StoreBinding,
}

impl WriteThroughStrategy {
    pub fn new(config: CacheStrategyConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            binding: StoreBinding::new(StrategyKind::WriteThrough, config, store),
        }
    }

    async fn write_through(
        &self,
        scope: &TagSet,
        key: &str,
        value: Value,
        persist: Option<Persister<'_>>,
    ) -> LmsResult<()> {
        let cached = value.clone();
        if let Some(persist) = persist {
            persist.persist(value).await?;
        }

        let key = self.binding.key(key);
        self.binding.write(scope, &key, &cached).await
    }
}

#[async_trait]
impl CacheStrategy for WriteThroughStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WriteThrough
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
        match self.write_through(scope, key, value, persist).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(strategy = "write-through", key, tags = %scope, error = %e, "write-through failed");
                Ok(false)
            }
        }
    }

    async fn forget(&self, scope: &TagSet, key: &str) -> LmsResult<bool> {
        self.binding.invalidate(scope, key).await
    }

    async fn flush_tags(&self, tags: &TagSet) -> bool {
        self.binding.flush(tags).await
    }
}

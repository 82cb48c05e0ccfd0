//! Store access shared by the caching strategies.

use std::sync::Arc;
use std::time::Duration;

use lms_core::{CacheStrategyConfig, LmsResult, StrategyKind};
use serde_json::Value;
use tracing::{debug, warn};

use crate::callback::Fetcher;
use crate::keyspace::{CacheKey, Keyspace};
use crate::store::CacheStore;
use crate::tags::TagSet;

/// A backing store bound to one keyspace and TTL.
pub(crate) struct StoreBinding {
    kind: StrategyKind,
    store: Arc<dyn CacheStore>,
    keyspace: Keyspace,
    ttl: Duration,
    config: CacheStrategyConfig,
}

impl StoreBinding {
    pub(crate) fn new(
        kind: StrategyKind,
        config: CacheStrategyConfig,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            kind,
            keyspace: Keyspace::new(config.prefix.clone()),
            ttl: config.ttl(),
            store,
            config,
        }
    }

    pub(crate) fn config(&self) -> &CacheStrategyConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn CacheStore {
        self.store.as_ref()
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn key(&self, logical: &str) -> CacheKey {
        self.keyspace.key(logical)
    }

    /// Check, and on miss fetch, store and return.
    pub(crate) async fn lookup_or_fill(
        &self,
        scope: &TagSet,
        logical: &str,
        fetch: Fetcher<'_>,
    ) -> LmsResult<Value> {
        let key = self.key(logical);

        if let Some(value) = self.store.get(scope, &key).await? {
            debug!(strategy = %self.kind, key = %key, tags = %scope, "cache hit");
            return Ok(value);
        }

        debug!(strategy = %self.kind, key = %key, tags = %scope, "cache miss");
        let value = fetch.fetch().await?;
        self.write(scope, &key, &value).await?;
        Ok(value)
    }

    pub(crate) async fn write(&self, scope: &TagSet, key: &CacheKey, value: &Value) -> LmsResult<()> {
        self.store.put(scope, key, value, self.ttl).await?;
        debug!(strategy = %self.kind, key = %key, tags = %scope, ttl_secs = self.ttl.as_secs(), "cache store");
        Ok(())
    }

    pub(crate) async fn invalidate(&self, scope: &TagSet, logical: &str) -> LmsResult<bool> {
        let key = self.key(logical);
        let existed = self.store.forget(scope, &key).await?;
        debug!(strategy = %self.kind, key = %key, tags = %scope, existed, "cache invalidate");
        Ok(true)
    }

    pub(crate) async fn flush(&self, tags: &TagSet) -> bool {
        match self.store.flush_tags(tags).await {
            Ok(removed) => {
                debug!(strategy = %self.kind, tags = %tags, removed, "cache flush");
                true
            }
            Err(e) => {
                warn!(strategy = %self.kind, tags = %tags, error = %e, "cache flush failed");
                false
            }
        }
    }
}

//! Read-Through.
//!
//! READ: the store itself loads missing entries through its `remember`
//! operation. WRITE: persist to the system of record, then invalidate so the
//! next read repopulates.

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

/// Read-Through strategy.
///
/// `put` never writes the new value into the cache. A persist failure
/// propagates and leaves the cached entry untouched.
pub struct ReadThroughStrategy {
    binding: StoreBinding,
}

impl ReadThroughStrategy {
    pub fn new(config: CacheStrategyConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            binding: StoreBinding::new(StrategyKind::ReadThrough, config, store),
        }
    }
}

#[async_trait]
impl CacheStrategy for ReadThroughStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ReadThrough
    }

    fn config(&self) -> &CacheStrategyConfig {
        self.binding.config()
    }

    async fn get<'a>(&self, scope: &TagSet, key: &str, fetch: Fetcher<'a>) -> LmsResult<Value> {
        let key = self.binding.key(key);
        debug!(strategy = "read-through", key = %key, tags = %scope, "cache remember");
        self.binding
            .store()
            .remember(scope, &key, self.binding.ttl(), fetch)
            .await
    }

    async fn put<'a>(
        &self,
        scope: &TagSet,
        key: &str,
        value: Value,
        persist: Option<Persister<'a>>,
    ) -> LmsResult<bool> {
        if let Some(persist) = persist {
            persist.persist(value).await?;
        }

        self.binding.invalidate(scope, key).await
    }

    async fn forget(&self, scope: &TagSet, key: &str) -> LmsResult<bool> {
        self.binding.invalidate(scope, key).await
    }

    async fn flush_tags(&self, tags: &TagSet) -> bool {
        self.binding.flush(tags).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTagStore;
    use crate::test_support::{config, Calls, UnreachableStore};
    use crate::Keyspace;
    use serde_json::json;

    fn strategy() -> (ReadThroughStrategy, Arc<InMemoryTagStore>) {
        let store = Arc::new(InMemoryTagStore::new());
        let strategy = ReadThroughStrategy::new(config(StrategyKind::ReadThrough), store.clone());
        (strategy, store)
    }

    #[tokio::test]
    async fn test_get_populates_through_store() {
        let (strategy, store) = strategy();
        let calls = Calls::default();

        let value = strategy
            .get(&TagSet::empty(), "quiz:1", calls.fetcher(json!({"id": 1})))
            .await
            .unwrap();

        assert_eq!(value, json!({"id": 1}));
        assert_eq!(calls.fetch_count(), 1);
        assert!(store.contains(&TagSet::empty(), &Keyspace::new("lms").key("quiz:1")));
    }

    #[tokio::test]
    async fn test_put_then_get_fetches_exactly_once() {
        let (strategy, _store) = strategy();
        let untagged = TagSet::empty();
        let calls = Calls::default();

        strategy
            .get(&untagged, "quiz:1", calls.fetcher(json!({"title": "old"})))
            .await
            .unwrap();

        let ok = strategy
            .put(&untagged, "quiz:1", json!({"title": "new"}), Some(calls.persister()))
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(calls.persisted(), vec![json!({"title": "new"})]);

        let after = Calls::default();
        let value = strategy
            .get(&untagged, "quiz:1", after.fetcher(json!({"title": "from-db"})))
            .await
            .unwrap();

        // The put value was never cached; the read comes from the fetcher.
        assert_eq!(value, json!({"title": "from-db"}));
        assert_eq!(after.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_put_does_not_write_value_into_cache() {
        let (strategy, store) = strategy();

        strategy
            .put(&TagSet::empty(), "quiz:1", json!({"title": "A"}), None)
            .await
            .unwrap();

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_propagates_and_keeps_entry() {
        let (strategy, store) = strategy();
        let untagged = TagSet::empty();
        let calls = Calls::default();

        strategy
            .get(&untagged, "quiz:1", calls.fetcher(json!({"title": "old"})))
            .await
            .unwrap();

        let err = strategy
            .put(&untagged, "quiz:1", json!({"title": "new"}), Some(calls.failing_persister()))
            .await
            .unwrap_err();

        assert!(err.is_callback());
        assert_eq!(
            store.peek(&untagged, &Keyspace::new("lms").key("quiz:1")),
            Some(json!({"title": "old"}))
        );
    }

    #[tokio::test]
    async fn test_unreachable_store_propagates_after_persist() {
        let strategy = ReadThroughStrategy::new(
            config(StrategyKind::ReadThrough),
            Arc::new(UnreachableStore),
        );
        let calls = Calls::default();

        let err = strategy
            .put(&TagSet::empty(), "quiz:1", json!(1), Some(calls.persister()))
            .await
            .unwrap_err();

        assert!(err.is_store());
        assert_eq!(calls.persisted(), vec![json!(1)]);
        assert!(!strategy.flush_tags(&TagSet::new(["quizzes"])).await);
    }
}

//! No-Cache: every read hits the system of record and nothing is stored.

use async_trait::async_trait;
use lms_core::{CacheStrategyConfig, LmsResult, StrategyKind};
use serde_json::Value;
use tracing::debug;

use super::CacheStrategy;
use crate::callback::{Fetcher, Persister};
use crate::tags::TagSet;

/// Bypass strategy, used to disable caching or to debug stale data.
#[derive(Debug, Clone)]
pub struct NoCacheStrategy {
    config: CacheStrategyConfig,
}

impl NoCacheStrategy {
    pub fn new(config: CacheStrategyConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CacheStrategy for NoCacheStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NoCache
    }

    fn config(&self) -> &CacheStrategyConfig {
        &self.config
    }

    async fn get<'a>(&self, scope: &TagSet, key: &str, fetch: Fetcher<'a>) -> LmsResult<Value> {
        debug!(strategy = "no-cache", key, tags = %scope, "cache bypass");
        fetch.fetch().await
    }

    async fn put<'a>(
        &self,
        _scope: &TagSet,
        _key: &str,
        value: Value,
        persist: Option<Persister<'a>>,
    ) -> LmsResult<bool> {
        if let Some(persist) = persist {
            persist.persist(value).await?;
        }
        Ok(true)
    }

    async fn forget(&self, _scope: &TagSet, _key: &str) -> LmsResult<bool> {
        Ok(true)
    }

    async fn flush_tags(&self, _tags: &TagSet) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{config, Calls};
    use serde_json::json;

    #[tokio::test]
    async fn test_every_get_fetches() {
        let strategy = NoCacheStrategy::new(config(StrategyKind::NoCache));
        let calls = Calls::default();

        for _ in 0..3 {
            let value = strategy
                .get(&TagSet::empty(), "quiz:1", calls.fetcher(json!({"id": 1})))
                .await
                .unwrap();
            assert_eq!(value, json!({"id": 1}));
        }

        assert_eq!(calls.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_put_persists() {
        let strategy = NoCacheStrategy::new(config(StrategyKind::NoCache));
        let calls = Calls::default();

        assert!(strategy
            .put(&TagSet::empty(), "quiz:1", json!(7), Some(calls.persister()))
            .await
            .unwrap());
        assert_eq!(calls.persisted(), vec![json!(7)]);
    }

    #[tokio::test]
    async fn test_persist_failure_propagates() {
        let strategy = NoCacheStrategy::new(config(StrategyKind::NoCache));
        let calls = Calls::default();

        let err = strategy
            .put(&TagSet::empty(), "quiz:1", json!(7), Some(calls.failing_persister()))
            .await
            .unwrap_err();
        assert!(err.is_callback());
    }

    #[tokio::test]
    async fn test_forget_and_flush_are_noops() {
        let strategy = NoCacheStrategy::new(config(StrategyKind::NoCache));

        assert!(strategy.forget(&TagSet::empty(), "quiz:1").await.unwrap());
        assert!(strategy.flush_tags(&TagSet::new(["quizzes"])).await);
    }
}

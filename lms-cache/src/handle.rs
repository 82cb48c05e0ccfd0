//! Tag-scoped access to a strategy.
//!
//! A [`CacheHandle`] pairs a borrowed strategy with the [`TagSet`] its calls
//! run under. Handles are cheap values built per call site, so two tasks
//! using different tags against one shared strategy never see each other's
//! scope.
//!
//! ```ignore
//! let materials = strategy
//!     .tags(["materials", "course:4"])
//!     .get("course:4:materials", Fetcher::new(|| async { db.materials(4).await }))
//!     .await?;
//! ```

use std::future::Future;

use lms_core::{LmsError, LmsResult, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::callback::{Fetcher, Persister};
use crate::strategy::CacheStrategy;
use crate::tags::TagSet;

/// A strategy bound to one tag scope.
pub struct CacheHandle<'s, S: CacheStrategy + ?Sized> {
    strategy: &'s S,
    tags: TagSet,
}

impl<'s, S: CacheStrategy + ?Sized> CacheHandle<'s, S> {
    pub fn new(strategy: &'s S, tags: TagSet) -> Self {
        Self { strategy, tags }
    }

    /// The scope every call through this handle runs under.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn strategy(&self) -> &'s S {
        self.strategy
    }

    pub async fn get(&self, key: &str, fetch: Fetcher<'_>) -> LmsResult<Value> {
        self.strategy.get(&self.tags, key, fetch).await
    }

    pub async fn remember(&self, key: &str, fetch: Fetcher<'_>) -> LmsResult<Value> {
        self.strategy.remember(&self.tags, key, fetch).await
    }

    pub async fn put(
        &self,
        key: &str,
        value: Value,
        persist: Option<Persister<'_>>,
    ) -> LmsResult<bool> {
        self.strategy.put(&self.tags, key, value, persist).await
    }

    pub async fn forget(&self, key: &str) -> LmsResult<bool> {
        self.strategy.forget(&self.tags, key).await
    }

    /// Flush every entry carrying any of this handle's tags.
    ///
    /// On an untagged handle this is a no-op that reports `true`.
    pub async fn flush(&self) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        self.strategy.flush_tags(&self.tags).await
    }

    /// Typed [`get`](Self::get).
    ///
    /// The fetch result is serialized before it reaches the store; a cached
    /// value that does not decode as `T` is a
    /// [`StoreError::Deserialization`].
    pub async fn get_as<'f, T, F, Fut>(&self, key: &str, fetch: F) -> LmsResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'f,
        F: FnOnce() -> Fut + Send + 'f,
        Fut: Future<Output = LmsResult<T>> + Send + 'f,
    {
        let value = self.get(key, typed_fetcher(key, fetch)).await?;
        decode(key, value)
    }

    /// Typed [`remember`](Self::remember).
    pub async fn remember_as<'f, T, F, Fut>(&self, key: &str, fetch: F) -> LmsResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'f,
        F: FnOnce() -> Fut + Send + 'f,
        Fut: Future<Output = LmsResult<T>> + Send + 'f,
    {
        let value = self.remember(key, typed_fetcher(key, fetch)).await?;
        decode(key, value)
    }

    /// Typed [`put`](Self::put). `persist` receives the serialized value.
    pub async fn put_as<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        persist: Option<Persister<'_>>,
    ) -> LmsResult<bool> {
        let value = encode(key, value)?;
        self.put(key, value, persist).await
    }
}

impl<S: CacheStrategy + ?Sized> std::fmt::Debug for CacheHandle<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle")
            .field("strategy", &self.strategy.kind())
            .field("tags", &self.tags)
            .finish()
    }
}

fn typed_fetcher<'f, T, F, Fut>(key: &str, fetch: F) -> Fetcher<'f>
where
    T: Serialize + Send + 'f,
    F: FnOnce() -> Fut + Send + 'f,
    Fut: Future<Output = LmsResult<T>> + Send + 'f,
{
    let key = key.to_string();
    Fetcher::new(move || async move {
        let value = fetch().await?;
        encode(&key, &value)
    })
}

fn encode<T: Serialize>(key: &str, value: &T) -> LmsResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        LmsError::Store(StoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
    })
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> LmsResult<T> {
    serde_json::from_value(value).map_err(|e| {
        LmsError::Store(StoreError::Deserialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
    })
}

/// Tag-scoping entry points available on every strategy, including
/// `dyn CacheStrategy` behind an `Arc`.
pub trait CacheStrategyExt: CacheStrategy {
    /// Scope subsequent calls to `tags`. Order and duplicates are ignored.
    fn tags<I, T>(&self, tags: I) -> CacheHandle<'_, Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>;

    /// Scope subsequent calls to the untagged keyspace.
    fn untagged(&self) -> CacheHandle<'_, Self>;
}

impl<S: CacheStrategy + ?Sized> CacheStrategyExt for S {
    fn tags<I, T>(&self, tags: I) -> CacheHandle<'_, Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        CacheHandle::new(self, TagSet::new(tags))
    }

    fn untagged(&self) -> CacheHandle<'_, Self> {
        CacheHandle::new(self, TagSet::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTagStore;
    use crate::strategy::{CacheAsideStrategy, WriteThroughStrategy};
    use crate::test_support::{config, Calls};
    use lms_core::StrategyKind;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Quiz {
        id: u32,
        title: String,
    }

    fn shared() -> Arc<dyn CacheStrategy> {
        Arc::new(CacheAsideStrategy::new(
            config(StrategyKind::CacheAside),
            Arc::new(InMemoryTagStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_handles_on_shared_strategy_keep_their_own_tags() {
        let strategy = shared();
        let materials = strategy.tags(["materials", "course:4"]);
        let users = strategy.tags(["users"]);

        assert_eq!(materials.tags(), &TagSet::new(["course:4", "materials"]));
        assert_eq!(users.tags(), &TagSet::new(["users"]));
        assert!(strategy.untagged().tags().is_empty());
    }

    #[tokio::test]
    async fn test_tag_order_does_not_change_scope() {
        let strategy = shared();
        let calls = Calls::default();

        strategy
            .tags(["a", "b"])
            .get("k", calls.fetcher(json!(1)))
            .await
            .unwrap();
        strategy
            .tags(["b", "a", "a"])
            .get("k", calls.fetcher(json!(2)))
            .await
            .unwrap();

        assert_eq!(calls.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_through_handle() {
        let strategy = shared();
        let calls = Calls::default();
        let tagged = strategy.tags(["quizzes"]);

        tagged.get("quiz:1", calls.fetcher(json!(1))).await.unwrap();
        assert!(tagged.flush().await);
        tagged.get("quiz:1", calls.fetcher(json!(1))).await.unwrap();

        assert_eq!(calls.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let strategy = WriteThroughStrategy::new(
            config(StrategyKind::WriteThrough),
            Arc::new(InMemoryTagStore::new()),
        );
        let quiz = Quiz {
            id: 1,
            title: "Ownership".to_string(),
        };
        let handle = strategy.tags(["quizzes"]);

        assert!(handle.put_as("quiz:1", &quiz, None).await.unwrap());

        let cached: Quiz = handle
            .get_as("quiz:1", || async {
                Err(LmsError::fetch_failed("quiz:1", "should be a hit"))
            })
            .await
            .unwrap();
        assert_eq!(cached, quiz);
    }

    #[tokio::test]
    async fn test_typed_miss_runs_fetch() {
        let strategy = shared();
        let handle = strategy.untagged();

        let quiz: Quiz = handle
            .remember_as("quiz:2", || async {
                Ok(Quiz {
                    id: 2,
                    title: "Traits".to_string(),
                })
            })
            .await
            .unwrap();

        assert_eq!(quiz.id, 2);
    }

    #[tokio::test]
    async fn test_typed_decode_failure() {
        let strategy = shared();
        let handle = strategy.untagged();
        handle.put("quiz:3", json!("not a quiz"), None).await.unwrap();

        let err = handle
            .get_as::<Quiz, _, _>("quiz:3", || async {
                Err(LmsError::fetch_failed("quiz:3", "should be a hit"))
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LmsError::Store(StoreError::Deserialization { .. })
        ));
    }
}

//! LMS Test Utilities
//!
//! Shared test infrastructure for the LMS cache workspace:
//! - A backing store with switchable failure modes
//! - Recording fetch and persist callbacks
//! - Proptest generators for keys, tags and configuration
//! - Fixtures and assertions for common scenarios

pub use lms_cache::{
    CacheKey, CacheStats, CacheStore, CacheStrategy, CacheStrategyExt, Fetcher, InMemoryTagStore,
    Keyspace, Persister, StrategySelector, TagSet,
};
pub use lms_core::{
    CacheStrategyConfig, CallbackError, ConfigError, LmsError, LmsResult, StoreError, StrategyKind,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

// ============================================================================
// MOCK STORES
// ============================================================================

/// An in-memory store whose operations can be switched to fail.
///
/// Failures report [`StoreError::Unavailable`], the same as a lost connection
/// to a remote cache.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: InMemoryTagStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_forgets: AtomicBool,
    fail_flushes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that fails every operation from the start.
    pub fn unreachable() -> Self {
        let store = Self::new();
        store.fail_all(true);
        store
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_forgets(&self, fail: bool) {
        self.fail_forgets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_flushes(&self, fail: bool) {
        self.fail_flushes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_reads(fail);
        self.fail_writes(fail);
        self.fail_forgets(fail);
        self.fail_flushes(fail);
    }

    /// The wrapped store, for inspecting state without tripping failures.
    pub fn inner(&self) -> &InMemoryTagStore {
        &self.inner
    }

    fn check(flag: &AtomicBool, operation: &str) -> LmsResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: format!("{operation} refused by test store"),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, scope: &TagSet, key: &CacheKey) -> LmsResult<Option<Value>> {
        Self::check(&self.fail_reads, "get")?;
        self.inner.get(scope, key).await
    }

    async fn put(
        &self,
        scope: &TagSet,
        key: &CacheKey,
        value: &Value,
        ttl: Duration,
    ) -> LmsResult<()> {
        Self::check(&self.fail_writes, "put")?;
        self.inner.put(scope, key, value, ttl).await
    }

    async fn forget(&self, scope: &TagSet, key: &CacheKey) -> LmsResult<bool> {
        Self::check(&self.fail_forgets, "forget")?;
        self.inner.forget(scope, key).await
    }

    async fn flush_tags(&self, tags: &TagSet) -> LmsResult<u64> {
        Self::check(&self.fail_flushes, "flush")?;
        self.inner.flush_tags(tags).await
    }

    async fn purge_expired(&self) -> LmsResult<u64> {
        self.inner.purge_expired().await
    }

    async fn stats(&self) -> LmsResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// RECORDING CALLBACKS
// ============================================================================

/// What a [`Recorder`] callback did, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Fetch,
    Persist(Value),
}

/// Hands out fetch and persist callbacks that log every invocation.
#[derive(Debug, Default)]
pub struct Recorder {
    fetches: AtomicUsize,
    events: Mutex<Vec<CallEvent>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher that yields `value`.
    pub fn fetcher(&self, value: Value) -> Fetcher<'_> {
        Fetcher::new(move || async move {
            self.record_fetch();
            Ok(value)
        })
    }

    /// A fetcher that fails as an unreachable database would.
    pub fn failing_fetcher(&self, key: &str) -> Fetcher<'_> {
        let key = key.to_string();
        Fetcher::new(move || async move {
            self.record_fetch();
            Err(LmsError::fetch_failed(key, "database unavailable"))
        })
    }

    /// A persister that accepts every write.
    pub fn persister(&self) -> Persister<'_> {
        Persister::new(move |value| async move {
            self.push(CallEvent::Persist(value));
            Ok(())
        })
    }

    /// A persister that rejects every write.
    pub fn failing_persister(&self, key: &str) -> Persister<'_> {
        let key = key.to_string();
        Persister::new(move |value| async move {
            self.push(CallEvent::Persist(value));
            Err(LmsError::persist_failed(key, "write rejected"))
        })
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn persist_count(&self) -> usize {
        self.persisted().len()
    }

    /// Values handed to persisters, in call order.
    pub fn persisted(&self) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                CallEvent::Persist(value) => Some(value),
                CallEvent::Fetch => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<CallEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        self.fetches.store(0, Ordering::SeqCst);
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.push(CallEvent::Fetch);
    }

    fn push(&self, event: CallEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest generators for cache keys, tags and configuration.

    use super::*;
    use proptest::prelude::*;

    /// Generate a logical key such as `quiz:12` or `course:4:materials`.
    pub fn arb_logical_key() -> impl Strategy<Value = String> {
        "[a-z]{1,8}(:[0-9]{1,4}){0,2}(:[a-z]{1,8})?"
    }

    /// Generate a tag name such as `quizzes` or `course:4`.
    pub fn arb_tag() -> impl Strategy<Value = String> {
        "[a-z]{1,8}(:[0-9]{1,3})?"
    }

    /// Generate a tag set of up to four tags, possibly empty.
    pub fn arb_tag_set() -> impl Strategy<Value = TagSet> {
        prop::collection::vec(arb_tag(), 0..4).prop_map(TagSet::new)
    }

    /// Generate a non-empty tag set.
    pub fn arb_nonempty_tag_set() -> impl Strategy<Value = TagSet> {
        prop::collection::vec(arb_tag(), 1..4).prop_map(TagSet::new)
    }

    /// Generate a key prefix accepted by config validation.
    pub fn arb_prefix() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,11}"
    }

    pub fn arb_strategy_kind() -> impl Strategy<Value = StrategyKind> {
        prop_oneof![
            Just(StrategyKind::CacheAside),
            Just(StrategyKind::ReadThrough),
            Just(StrategyKind::WriteThrough),
            Just(StrategyKind::NoCache),
        ]
    }

    /// Generate a JSON value of the shapes an LMS caches: scalars, records
    /// and short lists. Includes `null`.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,24}".prop_map(Value::from),
            (any::<u32>(), "[a-zA-Z ]{0,16}")
                .prop_map(|(id, title)| serde_json::json!({"id": id, "title": title})),
            prop::collection::vec(any::<u16>(), 0..6).prop_map(|ids| serde_json::json!(ids)),
        ]
    }

    /// Generate a configuration that passes validation.
    pub fn arb_valid_config() -> impl Strategy<Value = CacheStrategyConfig> {
        (arb_strategy_kind(), 1u64..86_400, arb_prefix()).prop_map(|(driver, ttl, prefix)| {
            CacheStrategyConfig::new()
                .with_driver(driver)
                .with_ttl_secs(ttl)
                .with_prefix(prefix)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and strategies.

    use super::*;

    /// Default TTL and `lms` prefix for the given driver.
    pub fn config(driver: StrategyKind) -> CacheStrategyConfig {
        CacheStrategyConfig::new()
            .with_driver(driver)
            .with_ttl_secs(lms_core::DEFAULT_TTL_SECS)
            .with_prefix(lms_core::DEFAULT_PREFIX)
    }

    /// Build `driver` over `store` without installing it.
    pub fn strategy_over(
        driver: StrategyKind,
        store: Arc<dyn CacheStore>,
    ) -> LmsResult<Arc<dyn CacheStrategy>> {
        StrategySelector::build(config(driver), store)
    }

    /// Build `driver` over a fresh in-memory store, returning both.
    pub fn strategy_with_store(
        driver: StrategyKind,
    ) -> LmsResult<(Arc<dyn CacheStrategy>, Arc<InMemoryTagStore>)> {
        let store = Arc::new(InMemoryTagStore::new());
        let strategy = strategy_over(driver, store.clone())?;
        Ok((strategy, store))
    }

    /// All four strategies sharing one store.
    pub fn all_strategies_over(
        store: Arc<dyn CacheStore>,
    ) -> LmsResult<Vec<Arc<dyn CacheStrategy>>> {
        StrategyKind::ALL
            .into_iter()
            .map(|driver| strategy_over(driver, store.clone()))
            .collect()
    }

    /// The prefixed key a strategy built from [`config`] uses for `logical`.
    pub fn cache_key(logical: &str) -> CacheKey {
        Keyspace::new(lms_core::DEFAULT_PREFIX).key(logical)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for LMS error variants.

    use super::*;

    /// Assert that a result is a Store error.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &LmsResult<T>) {
        match result {
            Err(LmsError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that a result is a Callback error.
    #[track_caller]
    pub fn assert_callback_error<T: std::fmt::Debug>(result: &LmsResult<T>) {
        match result {
            Err(LmsError::Callback(_)) => {}
            other => panic!("Expected Callback error, got: {:?}", other),
        }
    }

    /// Assert that a result is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &LmsResult<T>) {
        match result {
            Err(LmsError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that `key` is cached under `scope` with `expected`.
    #[track_caller]
    pub fn assert_cached(store: &InMemoryTagStore, scope: &TagSet, logical: &str, expected: &Value) {
        let key = fixtures::cache_key(logical);
        assert_eq!(
            store.peek(scope, &key).as_ref(),
            Some(expected),
            "Expected {key} cached under {scope}"
        );
    }

    /// Assert that nothing is cached for `key` under `scope`.
    #[track_caller]
    pub fn assert_not_cached(store: &InMemoryTagStore, scope: &TagSet, logical: &str) {
        let key = fixtures::cache_key(logical);
        assert!(
            !store.contains(scope, &key),
            "Expected {key} absent under {scope}"
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

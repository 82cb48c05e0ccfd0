//! Doubles for the unit tests in this crate. These mirror `lms-test-utils`,
//! which cannot be used here because it depends on this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lms_core::{CacheStrategyConfig, LmsError, LmsResult, StoreError, StrategyKind};
use serde_json::Value;

use crate::callback::{Fetcher, Persister};
use crate::keyspace::CacheKey;
use crate::store::{CacheStats, CacheStore};
use crate::tags::TagSet;

pub(crate) fn config(driver: StrategyKind) -> CacheStrategyConfig {
    CacheStrategyConfig::new()
        .with_driver(driver)
        .with_ttl_secs(3600)
        .with_prefix("lms")
}

/// Counts fetch and persist invocations and records persisted values.
#[derive(Default)]
pub(crate) struct Calls {
    fetches: AtomicUsize,
    persisted: Mutex<Vec<Value>>,
    log: Mutex<Vec<&'static str>>,
}

impl Calls {
    pub(crate) fn fetcher(&self, value: Value) -> Fetcher<'_> {
        Fetcher::new(move || async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("fetch");
            Ok(value)
        })
    }

    pub(crate) fn failing_fetcher(&self) -> Fetcher<'_> {
        Fetcher::new(move || async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("fetch");
            Err(LmsError::fetch_failed("test", "database offline"))
        })
    }

    pub(crate) fn persister(&self) -> Persister<'_> {
        Persister::new(move |value| async move {
            self.persisted.lock().unwrap().push(value);
            self.log.lock().unwrap().push("persist");
            Ok(())
        })
    }

    pub(crate) fn failing_persister(&self) -> Persister<'_> {
        Persister::new(move |_value| async move {
            self.log.lock().unwrap().push("persist");
            Err(LmsError::persist_failed("test", "constraint violation"))
        })
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn persisted(&self) -> Vec<Value> {
        self.persisted.lock().unwrap().clone()
    }

    pub(crate) fn log(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

/// A store whose every operation reports the backend as unreachable.
#[derive(Default)]
pub(crate) struct UnreachableStore;

fn unreachable() -> LmsError {
    LmsError::Store(StoreError::Unavailable {
        reason: "connection refused".to_string(),
    })
}

#[async_trait]
impl CacheStore for UnreachableStore {
    async fn get(&self, _scope: &TagSet, _key: &CacheKey) -> LmsResult<Option<Value>> {
        Err(unreachable())
    }

    async fn put(
        &self,
        _scope: &TagSet,
        _key: &CacheKey,
        _value: &Value,
        _ttl: Duration,
    ) -> LmsResult<()> {
        Err(unreachable())
    }

    async fn forget(&self, _scope: &TagSet, _key: &CacheKey) -> LmsResult<bool> {
        Err(unreachable())
    }

    async fn flush_tags(&self, _tags: &TagSet) -> LmsResult<u64> {
        Err(unreachable())
    }

    async fn stats(&self) -> LmsResult<CacheStats> {
        Err(unreachable())
    }
}

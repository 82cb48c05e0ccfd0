//! Caller-supplied fetch and persist capabilities.
//!
//! Strategies never know where authoritative data lives. On a miss they run
//! a [`Fetcher`]; on a write they may run a [`Persister`]. Both are one-shot:
//! each is consumed by the single operation it was passed to.

use std::fmt;
use std::future::Future;

use futures_util::future::{BoxFuture, FutureExt};
use lms_core::LmsResult;
use serde_json::Value;

type FetchFn<'a> = Box<dyn FnOnce() -> BoxFuture<'a, LmsResult<Value>> + Send + 'a>;
type PersistFn<'a> = Box<dyn FnOnce(Value) -> BoxFuture<'a, LmsResult<()>> + Send + 'a>;

/// Loads the authoritative value for a key, typically a database read.
pub struct Fetcher<'a> {
    inner: FetchFn<'a>,
}

impl<'a> Fetcher<'a> {
    /// Wrap an async closure.
    ///
    /// ```ignore
    /// let fetch = Fetcher::new(|| async move { db.quiz(1).await });
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = LmsResult<Value>> + Send + 'a,
    {
        Self {
            inner: Box::new(move || f().boxed()),
        }
    }

    /// A fetcher that yields an already-known value.
    pub fn ready(value: Value) -> Self {
        Self::new(move || async move { Ok(value) })
    }

    /// Run the callback.
    pub async fn fetch(self) -> LmsResult<Value> {
        (self.inner)().await
    }
}

impl fmt::Debug for Fetcher<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher").finish_non_exhaustive()
    }
}

/// Writes a value to the system of record, typically a database write.
pub struct Persister<'a> {
    inner: PersistFn<'a>,
}

impl<'a> Persister<'a> {
    /// Wrap an async closure receiving the value being written.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Value) -> Fut + Send + 'a,
        Fut: Future<Output = LmsResult<()>> + Send + 'a,
    {
        Self {
            inner: Box::new(move |value| f(value).boxed()),
        }
    }

    /// Run the callback with `value`.
    pub async fn persist(self, value: Value) -> LmsResult<()> {
        (self.inner)(value).await
    }
}

impl fmt::Debug for Persister<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persister").finish_non_exhaustive()
    }
}

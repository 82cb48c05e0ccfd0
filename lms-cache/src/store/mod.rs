//! Backing cache stores.
//!
//! [`CacheStore`] is the seam between strategies and whatever actually holds
//! cached bytes. Two implementations ship here: [`InMemoryTagStore`] for a
//! single process and [`LmdbTagStore`] for a durable, host-local cache.

pub mod lmdb;
pub mod memory;
pub mod traits;

pub use lmdb::{LmdbStoreError, LmdbTagStore};
pub use memory::InMemoryTagStore;
pub use traits::{CacheStats, CacheStore};

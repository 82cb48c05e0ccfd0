//! LMDB-backed tagged cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) so cached entries survive a
//! process restart and can be shared by processes on one host.
//!
//! # Layout
//!
//! Two databases in one environment:
//! - `entries`: scoped key -> record
//! - `tag_index`: `[tag len: 4 bytes BE][tag][scoped key]` -> empty
//!
//! A scoped key is `[namespace][0x1F][prefixed cache key]`, where the
//! namespace is [`TagSet::namespace`] (empty when untagged). A record is
//!
//! ```text
//! [expires_at millis: i64 LE][tag count: u32 LE]([tag len: u32 LE][tag])*[json value]
//! ```
//!
//! The tag list in the header lets a flush by one tag remove the index rows
//! of the entry's other tags in the same transaction.
//!
//! # Expiry
//!
//! A read that finds an expired record deletes it. Every
//! [`DEFAULT_PURGE_INTERVAL`] writes, and whenever the map is full, `put`
//! sweeps all expired records before writing.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, MdbError, RwTxn};
use lms_core::{LmsError, LmsResult, StoreError};
use serde_json::Value;
use tracing::debug;

use super::traits::{CacheStats, CacheStore};
use crate::keyspace::CacheKey;
use crate::tags::TagSet;

/// Writes between two expiry sweeps.
pub const DEFAULT_PURGE_INTERVAL: u64 = 256;

/// Separator between namespace and key inside a scoped key.
const SCOPE_SEPARATOR: u8 = 0x1F;

/// Expiry marker for entries whose TTL does not fit in i64 millis.
const NEVER_EXPIRES: i64 = i64::MAX;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for LmsError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Transaction(reason) => {
                LmsError::Store(StoreError::TransactionFailed { reason })
            }
            other => LmsError::Store(StoreError::Unavailable {
                reason: other.to_string(),
            }),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

fn is_map_full(e: &heed::Error) -> bool {
    matches!(e, heed::Error::Mdb(MdbError::MapFull))
}

fn scoped_key(scope: &TagSet, key: &CacheKey) -> Vec<u8> {
    let namespace = scope.namespace();
    let mut bytes = Vec::with_capacity(namespace.len() + 1 + key.as_bytes().len());
    bytes.extend_from_slice(namespace.as_bytes());
    bytes.push(SCOPE_SEPARATOR);
    bytes.extend_from_slice(key.as_bytes());
    bytes
}

/// Human-readable form of a scoped key, for error messages.
fn scoped_label(scoped: &[u8]) -> String {
    let key = scoped
        .iter()
        .position(|b| *b == SCOPE_SEPARATOR)
        .map(|at| &scoped[at + 1..])
        .unwrap_or(scoped);
    String::from_utf8_lossy(key).into_owned()
}

fn tag_prefix(tag: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + tag.len());
    bytes.extend_from_slice(&(tag.len() as u32).to_be_bytes());
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

fn tag_index_key(tag: &str, scoped: &[u8]) -> Vec<u8> {
    let mut bytes = tag_prefix(tag);
    bytes.extend_from_slice(scoped);
    bytes
}

fn encode_record(
    key: &CacheKey,
    scope: &TagSet,
    value: &Value,
    ttl: Duration,
) -> LmsResult<Vec<u8>> {
    let expires_at = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .map(|at| at.timestamp_millis())
        .unwrap_or(NEVER_EXPIRES);

    let json = serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    let mut record = Vec::with_capacity(12 + json.len());
    record.extend_from_slice(&expires_at.to_le_bytes());
    record.extend_from_slice(&(scope.len() as u32).to_le_bytes());
    for tag in scope.iter() {
        record.extend_from_slice(&(tag.len() as u32).to_le_bytes());
        record.extend_from_slice(tag.as_bytes());
    }
    record.extend_from_slice(&json);
    Ok(record)
}

/// Split `n` bytes off the front of `bytes`.
fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if bytes.len() < n {
        return None;
    }
    let (head, tail) = bytes.split_at(n);
    *bytes = tail;
    Some(head)
}

fn take_u32(bytes: &mut &[u8]) -> Option<u32> {
    take(bytes, 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_le_bytes)
}

/// Decoded record header; `body` is the undecoded JSON.
struct Record<'a> {
    expires_at: i64,
    tags: Vec<String>,
    body: &'a [u8],
}

impl<'a> Record<'a> {
    fn parse(label: &str, bytes: &'a [u8]) -> LmsResult<Self> {
        let corrupt = || {
            LmsError::Store(StoreError::Deserialization {
                key: label.to_string(),
                reason: "truncated record header".to_string(),
            })
        };

        let mut rest = bytes;
        let expires_at = take(&mut rest, 8)
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map(i64::from_le_bytes)
            .ok_or_else(corrupt)?;

        let count = take_u32(&mut rest).ok_or_else(corrupt)?;
        let mut tags = Vec::new();
        for _ in 0..count {
            let len = take_u32(&mut rest).ok_or_else(corrupt)?;
            let raw = take(&mut rest, len as usize).ok_or_else(corrupt)?;
            let tag = std::str::from_utf8(raw).map_err(|_| corrupt())?;
            tags.push(tag.to_string());
        }

        Ok(Self {
            expires_at,
            tags,
            body: rest,
        })
    }

    fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }

    fn value(&self, label: &str) -> LmsResult<Value> {
        serde_json::from_slice(self.body).map_err(|e| {
            LmsError::Store(StoreError::Deserialization {
                key: label.to_string(),
                reason: e.to_string(),
            })
        })
    }
}

enum Lookup {
    Live(Value),
    Expired,
    Absent,
}

/// LMDB-backed tagged cache.
///
/// # Example
///
/// ```ignore
/// let store = LmdbTagStore::open("/var/cache/lms", 256)?;
/// let strategy = StrategySelector::build(config, Arc::new(store))?;
/// ```
pub struct LmdbTagStore {
    env: Env,
    entries: Database<Bytes, Bytes>,
    tag_index: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
    purge_interval: u64,
    writes_since_purge: AtomicU64,
}

impl LmdbTagStore {
    /// Open or create a store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not modified outside LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;

        let entries: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("entries"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        let tag_index: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("tag_index"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            entries,
            tag_index,
            stats: RwLock::new(CacheStats::default()),
            purge_interval: DEFAULT_PURGE_INTERVAL,
            writes_since_purge: AtomicU64::new(0),
        })
    }

    /// Sweep expired records every `writes` puts instead of the default.
    pub fn with_purge_interval(mut self, writes: u64) -> Self {
        self.purge_interval = writes.max(1);
        self
    }

    fn record<F: FnOnce(&mut CacheStats)>(&self, update: F) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    /// Delete an entry and the index rows of `tags`. Returns whether the
    /// entry existed.
    fn delete_entry(
        &self,
        wtxn: &mut RwTxn<'_>,
        scoped: &[u8],
        tags: &[String],
    ) -> Result<bool, heed::Error> {
        let deleted = self.entries.delete(wtxn, scoped)?;
        for tag in tags {
            self.tag_index.delete(wtxn, &tag_index_key(tag, scoped))?;
        }
        Ok(deleted)
    }

    fn write_entry(&self, scope: &TagSet, scoped: &[u8], record: &[u8]) -> Result<(), heed::Error> {
        let mut wtxn = self.env.write_txn()?;
        self.entries.put(&mut wtxn, scoped, record)?;
        for tag in scope.iter() {
            self.tag_index
                .put(&mut wtxn, &tag_index_key(tag, scoped), &[])?;
        }
        wtxn.commit()
    }

    /// Delete `scoped` if its record is still expired at `now_millis`.
    fn reclaim(&self, label: &str, scoped: &[u8], now_millis: i64) -> LmsResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let expired_tags = match self.entries.get(&wtxn, scoped).map_err(txn_err)? {
            Some(bytes) => {
                let record = Record::parse(label, bytes)?;
                record.is_expired(now_millis).then_some(record.tags)
            }
            None => None,
        };

        if let Some(tags) = expired_tags {
            if self.delete_entry(&mut wtxn, scoped, &tags).map_err(txn_err)? {
                self.record(|s| s.expired += 1);
            }
        }

        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    /// Sweep every expired record. Unreadable records are reclaimed too.
    fn sweep_expired(&self) -> LmsResult<u64> {
        let now = Utc::now().timestamp_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut doomed = Vec::new();
        for result in self.entries.iter(&wtxn).map_err(txn_err)? {
            let (scoped, bytes) = result.map_err(txn_err)?;
            match Record::parse(&scoped_label(scoped), bytes) {
                Ok(record) if record.is_expired(now) => doomed.push((scoped.to_vec(), record.tags)),
                Ok(_) => {}
                Err(_) => doomed.push((scoped.to_vec(), Vec::new())),
            }
        }

        let mut removed = 0u64;
        for (scoped, tags) in &doomed {
            if self.delete_entry(&mut wtxn, scoped, tags).map_err(txn_err)? {
                removed += 1;
            }
        }

        wtxn.commit().map_err(txn_err)?;
        self.writes_since_purge.store(0, Ordering::Relaxed);

        if removed > 0 {
            debug!(removed, "expired cache records reclaimed");
        }
        self.record(|s| s.expired += removed);
        Ok(removed)
    }
}

#[async_trait]
impl CacheStore for LmdbTagStore {
    async fn get(&self, scope: &TagSet, key: &CacheKey) -> LmsResult<Option<Value>> {
        let scoped = scoped_key(scope, key);
        let now = Utc::now().timestamp_millis();

        let lookup = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            match self.entries.get(&rtxn, &scoped).map_err(txn_err)? {
                Some(bytes) => {
                    let record = Record::parse(key.as_str(), bytes)?;
                    if record.is_expired(now) {
                        Lookup::Expired
                    } else {
                        Lookup::Live(record.value(key.as_str())?)
                    }
                }
                None => Lookup::Absent,
            }
        };

        match lookup {
            Lookup::Live(value) => {
                self.record(|s| s.hits += 1);
                Ok(Some(value))
            }
            Lookup::Expired => {
                self.reclaim(key.as_str(), &scoped, now)?;
                self.record(|s| s.misses += 1);
                Ok(None)
            }
            Lookup::Absent => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        scope: &TagSet,
        key: &CacheKey,
        value: &Value,
        ttl: Duration,
    ) -> LmsResult<()> {
        let scoped = scoped_key(scope, key);
        let record = encode_record(key, scope, value, ttl)?;

        if self.writes_since_purge.fetch_add(1, Ordering::Relaxed) + 1 >= self.purge_interval {
            self.sweep_expired()?;
        }

        match self.write_entry(scope, &scoped, &record) {
            Err(e) if is_map_full(&e) => {
                debug!(key = %key, "cache map full, sweeping expired records");
                self.sweep_expired()?;
                self.write_entry(scope, &scoped, &record).map_err(txn_err)?;
            }
            other => other.map_err(txn_err)?,
        }

        self.record(|s| s.writes += 1);
        Ok(())
    }

    async fn forget(&self, scope: &TagSet, key: &CacheKey) -> LmsResult<bool> {
        let scoped = scoped_key(scope, key);
        let now = Utc::now().timestamp_millis();
        let tags: Vec<String> = scope.iter().map(str::to_string).collect();

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let was_live = match self.entries.get(&wtxn, &scoped).map_err(txn_err)? {
            Some(bytes) => Record::parse(key.as_str(), bytes)
                .map(|record| !record.is_expired(now))
                .unwrap_or(false),
            None => false,
        };

        let deleted = self
            .delete_entry(&mut wtxn, &scoped, &tags)
            .map_err(txn_err)?;

        wtxn.commit().map_err(txn_err)?;

        if deleted && was_live {
            self.record(|s| s.invalidations += 1);
        } else if deleted {
            self.record(|s| s.expired += 1);
        }
        Ok(deleted && was_live)
    }

    async fn flush_tags(&self, tags: &TagSet) -> LmsResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut removed = 0u64;
        for tag in tags.iter() {
            let prefix = tag_prefix(tag);

            let mut members = Vec::new();
            for result in self.tag_index.prefix_iter(&wtxn, &prefix).map_err(txn_err)? {
                let (index_key, _) = result.map_err(txn_err)?;
                members.push(index_key[prefix.len()..].to_vec());
            }

            for scoped in &members {
                let entry_tags = match self.entries.get(&wtxn, scoped).map_err(txn_err)? {
                    Some(bytes) => Record::parse(&scoped_label(scoped), bytes)
                        .map(|record| record.tags)
                        .unwrap_or_default(),
                    None => Vec::new(),
                };

                if self
                    .delete_entry(&mut wtxn, scoped, &entry_tags)
                    .map_err(txn_err)?
                {
                    removed += 1;
                }
                self.tag_index
                    .delete(&mut wtxn, &tag_index_key(tag, scoped))
                    .map_err(txn_err)?;
            }
        }

        wtxn.commit().map_err(txn_err)?;

        self.record(|s| s.invalidations += removed);
        Ok(removed)
    }

    async fn purge_expired(&self) -> LmsResult<u64> {
        self.sweep_expired()
    }

    async fn stats(&self) -> LmsResult<CacheStats> {
        let entry_count = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            self.entries.len(&rtxn).map_err(txn_err)?
        };
        let stats = self.stats.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(CacheStats {
            entry_count,
            ..stats.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Keyspace;
    use serde_json::json;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn create_test_store() -> (LmdbTagStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbTagStore::open(temp_dir.path(), 10).expect("store should open");
        (store, temp_dir)
    }

    fn key(logical: &str) -> CacheKey {
        Keyspace::new("lms").key(logical)
    }

    fn index_rows(store: &LmdbTagStore) -> u64 {
        let rtxn = store.env.read_txn().unwrap();
        store.tag_index.len(&rtxn).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _dir) = create_test_store();
        let untagged = TagSet::empty();

        store
            .put(&untagged, &key("quiz:1"), &json!({"id": 1, "title": "A"}), HOUR)
            .await
            .unwrap();

        let value = store.get(&untagged, &key("quiz:1")).await.unwrap();
        assert_eq!(value, Some(json!({"id": 1, "title": "A"})));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let (store, _dir) = create_test_store();
        let untagged = TagSet::empty();

        store
            .put(&untagged, &key("quiz:1"), &json!(1), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(store.get(&untagged, &key("quiz:1")).await.unwrap(), None);
        assert!(!store.forget(&untagged, &key("quiz:1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let (store, _dir) = create_test_store();
        let tagged = TagSet::new(["gradebook", "course:3"]);

        store
            .put(&tagged, &key("course:3:grades"), &json!([90, 85]), HOUR)
            .await
            .unwrap();

        assert_eq!(
            store
                .get(&TagSet::empty(), &key("course:3:grades"))
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            store.get(&tagged, &key("course:3:grades")).await.unwrap(),
            Some(json!([90, 85]))
        );
    }

    #[tokio::test]
    async fn test_forget_idempotent() {
        let (store, _dir) = create_test_store();
        let untagged = TagSet::empty();

        store.put(&untagged, &key("k"), &json!("v"), HOUR).await.unwrap();
        assert!(store.forget(&untagged, &key("k")).await.unwrap());
        assert!(!store.forget(&untagged, &key("k")).await.unwrap());
        assert_eq!(store.get(&untagged, &key("k")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_flush_tags() {
        let (store, _dir) = create_test_store();
        let course = TagSet::new(["materials", "course:1"]);
        let other = TagSet::new(["gradebook"]);

        store.put(&course, &key("a"), &json!("a"), HOUR).await.unwrap();
        store.put(&course, &key("b"), &json!("b"), HOUR).await.unwrap();
        store.put(&other, &key("c"), &json!("c"), HOUR).await.unwrap();

        let removed = store.flush_tags(&TagSet::new(["course:1"])).await.unwrap();
        assert_eq!(removed, 2);

        assert_eq!(store.get(&course, &key("a")).await.unwrap(), None);
        assert_eq!(store.get(&course, &key("b")).await.unwrap(), None);
        assert_eq!(store.get(&other, &key("c")).await.unwrap(), Some(json!("c")));

        // The "materials" rows of a and b went with them; only c's row is left.
        assert_eq!(index_rows(&store), 1);
        let removed = store.flush_tags(&TagSet::new(["materials"])).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_expired_read_reclaims_record_and_index_rows() {
        let (store, _dir) = create_test_store();
        let tags = TagSet::new(["quizzes", "course:1"]);

        store
            .put(&tags, &key("quiz:1"), &json!(1), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(index_rows(&store), 2);

        assert_eq!(store.get(&tags, &key("quiz:1")).await.unwrap(), None);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.expired, 1);
        assert_eq!(index_rows(&store), 0);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_records() {
        let (store, _dir) = create_test_store();
        let tags = TagSet::new(["materials"]);

        store.put(&tags, &key("dead:1"), &json!(1), Duration::ZERO).await.unwrap();
        store.put(&tags, &key("dead:2"), &json!(2), Duration::ZERO).await.unwrap();
        store.put(&tags, &key("live"), &json!(3), HOUR).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert_eq!(store.stats().await.unwrap().entry_count, 1);
        assert_eq!(index_rows(&store), 1);
        assert_eq!(store.get(&tags, &key("live")).await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_unread_expired_records_do_not_fill_the_map() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbTagStore::open(temp_dir.path(), 1)
            .expect("store should open")
            .with_purge_interval(16);
        let untagged = TagSet::empty();
        let payload = json!("x".repeat(1500));

        for i in 0..1000 {
            store
                .put(&untagged, &key(&format!("quiz:{i}")), &payload, Duration::ZERO)
                .await
                .unwrap();
        }

        store
            .put(&untagged, &key("quiz:live"), &json!("ok"), HOUR)
            .await
            .unwrap();
        assert_eq!(
            store.get(&untagged, &key("quiz:live")).await.unwrap(),
            Some(json!("ok"))
        );
        assert!(store.stats().await.unwrap().entry_count <= 16);
    }

    #[tokio::test]
    async fn test_tag_prefix_does_not_match_longer_tag() {
        let (store, _dir) = create_test_store();

        store
            .put(&TagSet::new(["course:10"]), &key("x"), &json!(1), HOUR)
            .await
            .unwrap();

        let removed = store.flush_tags(&TagSet::new(["course:1"])).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbTagStore::open(temp_dir.path(), 10).unwrap();
            store
                .put(&TagSet::empty(), &key("quiz:1"), &json!("kept"), HOUR)
                .await
                .unwrap();
        }

        let store = LmdbTagStore::open(temp_dir.path(), 10).unwrap();
        assert_eq!(
            store.get(&TagSet::empty(), &key("quiz:1")).await.unwrap(),
            Some(json!("kept"))
        );
    }
}

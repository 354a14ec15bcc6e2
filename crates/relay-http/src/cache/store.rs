//! Cache entries, stores and the clock that ages them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http::{HeaderMap, StatusCode};
use relay_core::{Payload, RelayResult};

/// Wall-clock source used to stamp and age cache entries.
///
/// Entry timestamps are UTC instants, so entries written by one process can
/// be aged by another sharing the same external store.
#[derive(Clone)]
pub struct CacheClock(Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>);

impl CacheClock {
    /// The system clock.
    #[must_use]
    pub fn system() -> Self {
        Self(Arc::new(Utc::now))
    }

    /// A wall clock that advances with the tokio clock.
    ///
    /// It reads the system time once, then adds the tokio time elapsed since,
    /// so it follows `tokio::time::pause` and `advance`.
    #[must_use]
    pub fn runtime() -> Self {
        let wall = Utc::now();
        let origin = tokio::time::Instant::now();
        Self(Arc::new(move || {
            wall + chrono::Duration::from_std(origin.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero())
        }))
    }

    /// A clock backed by a function.
    pub fn from_fn<F>(now: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self(Arc::new(now))
    }

    /// Returns the current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.0)()
    }
}

impl Default for CacheClock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for CacheClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClock").finish_non_exhaustive()
    }
}

/// A cached response together with its validators.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Status of the cached response.
    pub status: StatusCode,
    /// Headers of the cached response.
    pub headers: HeaderMap,
    /// Buffered body of the cached response.
    pub data: Payload,
    /// The `ETag` validator, verbatim.
    pub etag: Option<String>,
    /// The `Last-Modified` validator, verbatim.
    pub last_modified: Option<String>,
    /// When the entry was written or last revalidated.
    pub cached_at: DateTime<Utc>,
    /// How long the entry stays fresh.
    pub ttl: Duration,
}

impl CacheEntry {
    /// Returns the instant the entry turns stale.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.cached_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns `true` while `now` is within the entry's TTL.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    /// Returns `true` if the entry carries at least one validator.
    #[must_use]
    pub const fn has_validator(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Returns the entry with its timestamp reset to `now`.
    #[must_use]
    pub fn refreshed_at(mut self, now: DateTime<Utc>) -> Self {
        self.cached_at = now;
        self
    }
}

/// Storage backing the conditional cache policies.
///
/// Implementations must tolerate concurrent reads and writes from many
/// in-flight requests. No ordering is required between writers to the same
/// key: the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Returns the entry stored under `key`.
    async fn get(&self, key: &str) -> RelayResult<Option<CacheEntry>>;

    /// Stores `entry` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, entry: CacheEntry) -> RelayResult<()>;

    /// Returns `true` if an entry is stored under `key`.
    async fn has(&self, key: &str) -> RelayResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Removes the entry under `key`, returning `true` if one existed.
    async fn delete(&self, key: &str) -> RelayResult<bool>;
}

/// In-memory [`CacheStore`] backed by a concurrent map.
///
/// Stale entries are kept until overwritten. With a capacity set, inserting
/// a new key into a full store evicts the entry with the oldest timestamp.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
    capacity: Option<usize>,
}

impl MemoryCacheStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().cached_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            tracing::trace!(key = %key, "evicting oldest cache entry");
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> RelayResult<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> RelayResult<()> {
        if let Some(capacity) = self.capacity {
            if !self.entries.contains_key(key) && self.entries.len() >= capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn has(&self, key: &str) -> RelayResult<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> RelayResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_at(etag: &str, cached_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            data: Payload::Text("cached".into()),
            etag: Some(etag.to_owned()),
            last_modified: None,
            cached_at,
            ttl: Duration::from_secs(60),
        }
    }

    fn entry(etag: &str) -> CacheEntry {
        entry_at(etag, Utc::now())
    }

    #[tokio::test]
    async fn test_set_get_has_delete() {
        let store = MemoryCacheStore::new();
        assert!(!store.has("k").await.unwrap());

        store.set("k", entry("\"a\"")).await.unwrap();
        assert!(store.has("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().unwrap().etag.as_deref(), Some("\"a\""));

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let store = MemoryCacheStore::new();
        store.set("k", entry("\"a\"")).await.unwrap();
        store.set("k", entry("\"b\"")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k").await.unwrap().unwrap().etag.as_deref(), Some("\"b\""));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let base = Utc::now();
        let store = MemoryCacheStore::with_capacity(2);
        store.set("a", entry_at("1", base)).await.unwrap();
        store
            .set("b", entry_at("2", base + chrono::Duration::milliseconds(1)))
            .await
            .unwrap();
        store
            .set("c", entry_at("3", base + chrono::Duration::milliseconds(2)))
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert!(!store.has("a").await.unwrap());
        assert!(store.has("b").await.unwrap());
        assert!(store.has("c").await.unwrap());
    }

    #[test]
    fn test_freshness_follows_ttl() {
        let written = Utc::now();
        let later = written + chrono::Duration::seconds(61);
        let cached = entry_at("x", written);

        assert!(cached.is_fresh_at(written));
        assert!(cached.is_fresh_at(written + chrono::Duration::seconds(59)));
        assert!(!cached.is_fresh_at(later));
        assert!(cached.refreshed_at(later).is_fresh_at(later));
    }

    #[test]
    fn test_oversized_ttl_never_expires() {
        let mut cached = entry("x");
        cached.ttl = Duration::MAX;
        assert_eq!(cached.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(cached.is_fresh_at(Utc::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_clock_follows_paused_time() {
        let clock = CacheClock::runtime();
        let before = clock.now();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(clock.now() - before, chrono::Duration::seconds(30));
    }
}

//! Conditional HTTP caching.
//!
//! [`etag`], [`last_modified`] and [`conditional`] build a
//! [`ConditionalCache`] policy that keeps validated responses in a
//! [`CacheStore`] and revalidates them with conditional requests once their
//! TTL has passed.
//!
//! ## States
//!
//! | State | Condition | Behavior |
//! |-------|-----------|----------|
//! | MISS | no entry, or entry without a validator | send as-is; store on `ok` with a validator |
//! | FRESH | entry within its TTL | return the cached response (`HIT`), `next` is not called |
//! | STALE | entry past its TTL | send with `If-None-Match` / `If-Modified-Since`; `304` → `REVALIDATED` |
//!
//! When revalidation fails with a network or timeout error, the stale entry is
//! served and marked `STALE` instead of failing the request. The entry is
//! kept as it was. [`CacheBuilder::stale_if_error`] turns this off. Error
//! *responses* are not errors here: a `5xx` during revalidation drops the
//! entry and is returned as-is.
//!
//! Only `GET` and `HEAD` requests participate; every other method goes
//! straight to `next`. Error responses are never stored. Streamed bodies are
//! buffered before they are stored, so the caller receives the same bytes the
//! cache keeps. Entries are stamped by a [`CacheClock`].
//!
//! ## Example
//!
//! ```
//! use relay_http::cache::{conditional, MemoryCacheStore};
//! use std::time::Duration;
//!
//! let cache = conditional()
//!     .store(MemoryCacheStore::with_capacity(1_000))
//!     .ttl(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//! # let _ = cache;
//! ```

mod store;

pub use store::{CacheClock, CacheEntry, CacheStore, MemoryCacheStore};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{
    HeaderName, HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use http::{HeaderMap, Method, StatusCode};
use relay_core::{
    BoxFuture, Next, Policy, PolicyKind, PolicyMeta, RelayError, RelayResult,
    RequestContext, Response,
};

/// Default time an entry stays fresh.
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

/// Default response header carrying the [`CacheStatus`].
pub const DEFAULT_CACHE_HEADER: &str = "x-cache";

/// Derives the cache key of a request.
pub type KeyFn = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

/// How a response was produced, reported in the cache status header and the
/// response extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Served from a fresh entry without calling the transport.
    Hit,
    /// The server confirmed a stale entry with `304 Not Modified`.
    Revalidated,
    /// Fetched from the server and stored.
    Miss,
    /// Served from a stale entry because revalidation failed.
    Stale,
}

impl CacheStatus {
    /// Returns the header value for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Revalidated => "REVALIDATED",
            Self::Miss => "MISS",
            Self::Stale => "STALE",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which validators a cache policy uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validators {
    /// `ETag` / `If-None-Match` only.
    ETag,
    /// `Last-Modified` / `If-Modified-Since` only.
    LastModified,
    /// Both; `ETag` is preferred when a response carries both.
    Both,
}

impl Validators {
    const fn uses_etag(self) -> bool {
        matches!(self, Self::ETag | Self::Both)
    }

    const fn uses_last_modified(self) -> bool {
        matches!(self, Self::LastModified | Self::Both)
    }

    const fn policy_name(self) -> &'static str {
        match self {
            Self::ETag => "etag-cache",
            Self::LastModified => "last-modified-cache",
            Self::Both => "conditional-cache",
        }
    }
}

/// Creates a builder for a cache validated by `ETag`.
#[must_use]
pub fn etag() -> CacheBuilder {
    CacheBuilder::new(Validators::ETag)
}

/// Creates a builder for a cache validated by `Last-Modified`.
#[must_use]
pub fn last_modified() -> CacheBuilder {
    CacheBuilder::new(Validators::LastModified)
}

/// Creates a builder for a cache validated by either header, preferring
/// `ETag`.
#[must_use]
pub fn conditional() -> CacheBuilder {
    CacheBuilder::new(Validators::Both)
}

/// The default cache key: `METHOD:URL`.
#[must_use]
pub fn default_key(ctx: &RequestContext) -> String {
    format!("{}:{}", ctx.method(), ctx.url())
}

/// Builder for [`ConditionalCache`].
pub struct CacheBuilder {
    validators: Validators,
    store: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
    key: Option<KeyFn>,
    header: String,
    clock: CacheClock,
    stale_if_error: bool,
}

impl CacheBuilder {
    fn new(validators: Validators) -> Self {
        Self {
            validators,
            store: None,
            ttl: DEFAULT_TTL,
            key: None,
            header: DEFAULT_CACHE_HEADER.to_owned(),
            clock: CacheClock::system(),
            stale_if_error: true,
        }
    }

    /// Sets the store. Defaults to a private, unbounded [`MemoryCacheStore`].
    pub fn store<S: CacheStore>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Sets a store shared with other policies or with the caller.
    pub fn shared_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets how long entries stay fresh.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the cache key function.
    pub fn key<F>(mut self, key: F) -> Self
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        self.key = Some(Arc::new(key));
        self
    }

    /// Sets the name of the cache status header.
    pub fn status_header(mut self, name: impl Into<String>) -> Self {
        self.header = name.into();
        self
    }

    /// Sets the clock that stamps and ages entries. Defaults to
    /// [`CacheClock::system`].
    pub fn clock(mut self, clock: CacheClock) -> Self {
        self.clock = clock;
        self
    }

    /// Serves a stale entry when revalidation fails with a network or
    /// timeout error. Enabled by default.
    pub fn stale_if_error(mut self, enabled: bool) -> Self {
        self.stale_if_error = enabled;
        self
    }

    /// Builds the policy.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the status header name is
    /// invalid.
    pub fn build(self) -> RelayResult<ConditionalCache> {
        let header = HeaderName::try_from(self.header.as_str()).map_err(|e| {
            RelayError::invalid_request(format!("invalid cache header '{}': {e}", self.header))
        })?;
        Ok(ConditionalCache {
            validators: self.validators,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryCacheStore::new())),
            ttl: self.ttl,
            key: self.key.unwrap_or_else(|| Arc::new(default_key)),
            header,
            clock: self.clock,
            stale_if_error: self.stale_if_error,
        })
    }
}

/// Policy serving and revalidating cached responses. See the
/// [module documentation](self).
#[derive(Clone)]
pub struct ConditionalCache {
    validators: Validators,
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    key: KeyFn,
    header: HeaderName,
    clock: CacheClock,
    stale_if_error: bool,
}

impl ConditionalCache {
    /// Returns the validators in use.
    #[must_use]
    pub const fn validators(&self) -> Validators {
        self.validators
    }

    /// Returns the TTL applied to new entries.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Extracts the validators this policy uses from response headers.
    fn validators_of(&self, headers: &HeaderMap) -> (Option<String>, Option<String>) {
        let read = |name: &HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };
        let etag = if self.validators.uses_etag() {
            read(&ETAG)
        } else {
            None
        };
        let last_modified = if self.validators.uses_last_modified() {
            read(&LAST_MODIFIED).filter(|v| httpdate::parse_http_date(v).is_ok())
        } else {
            None
        };
        (etag, last_modified)
    }

    /// Adds the conditional header for a stale entry. Returns `false` when
    /// the entry has no usable validator.
    fn add_condition(entry: &CacheEntry, ctx: &mut RequestContext) -> bool {
        let (name, value) = match (&entry.etag, &entry.last_modified) {
            (Some(etag), _) => (IF_NONE_MATCH, etag),
            (None, Some(date)) => (IF_MODIFIED_SINCE, date),
            (None, None) => return false,
        };
        match HeaderValue::from_str(value) {
            Ok(value) => {
                if !ctx.headers().contains_key(&name) {
                    ctx.headers_mut().insert(name, value);
                }
                true
            }
            Err(_) => false,
        }
    }

    fn serve(&self, entry: &CacheEntry, status: CacheStatus) -> Response {
        let mut response = Response::buffered(entry.status, entry.data.clone());
        response.headers = entry.headers.clone();
        self.annotate(response, status)
    }

    fn annotate(&self, mut response: Response, status: CacheStatus) -> Response {
        response
            .headers
            .insert(self.header.clone(), HeaderValue::from_static(status.as_str()));
        response.extensions.insert(status);
        response
    }

    /// Stores a successful response carrying a validator, or drops `key` if
    /// the response is not cacheable and an older entry exists.
    async fn store_or_drop(
        &self,
        key: &str,
        response: Response,
        had_entry: bool,
    ) -> RelayResult<Response> {
        let (etag, last_modified) = self.validators_of(&response.headers);
        if !response.ok() || (etag.is_none() && last_modified.is_none()) {
            if had_entry {
                tracing::debug!(key, status = response.status.as_u16(), "dropping cache entry");
                self.store.delete(key).await?;
            }
            return Ok(response);
        }

        let buffered = response.buffer().await?;
        let entry = CacheEntry {
            status: buffered.status,
            headers: buffered.headers.clone(),
            data: buffered.data.clone(),
            etag,
            last_modified,
            cached_at: self.clock.now(),
            ttl: self.ttl,
        };
        self.store.set(key, entry).await?;
        tracing::debug!(key, "cache entry stored");
        Ok(self.annotate(buffered.into_content(), CacheStatus::Miss))
    }
}

impl fmt::Debug for ConditionalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalCache")
            .field("validators", &self.validators)
            .field("ttl", &self.ttl)
            .field("header", &self.header)
            .field("stale_if_error", &self.stale_if_error)
            .finish_non_exhaustive()
    }
}

fn is_cacheable_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

impl Policy for ConditionalCache {
    fn name(&self) -> &'static str {
        self.validators.policy_name()
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Cache)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        if !is_cacheable_method(ctx.method()) {
            return next.run(ctx);
        }

        Box::pin(async move {
            let key = (self.key)(&ctx);
            let cached = self.store.get(&key).await?.filter(CacheEntry::has_validator);

            let Some(entry) = cached else {
                let response = next.run(ctx).await?;
                return self.store_or_drop(&key, response, false).await;
            };

            if entry.is_fresh_at(self.clock.now()) {
                tracing::debug!(key = %key, "cache hit");
                return Ok(self.serve(&entry, CacheStatus::Hit));
            }

            let mut ctx = ctx;
            let conditional = Self::add_condition(&entry, &mut ctx);
            let response = match next.run(ctx).await {
                Ok(response) => response,
                Err(e) if self.stale_if_error && (e.is_network() || e.is_timeout()) => {
                    tracing::debug!(key = %key, error = %e, "revalidation failed, serving stale entry");
                    return Ok(self.serve(&entry, CacheStatus::Stale));
                }
                Err(e) => return Err(e),
            };

            if conditional && response.status == StatusCode::NOT_MODIFIED {
                tracing::debug!(key = %key, "cache entry revalidated");
                let entry = entry.refreshed_at(self.clock.now());
                let served = self.serve(&entry, CacheStatus::Revalidated);
                self.store.set(&key, entry).await?;
                return Ok(served);
            }

            self.store_or_drop(&key, response, true).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Payload;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_default_key_includes_method() {
        let ctx = RequestContext::new("https://a.test/x").unwrap();
        assert_eq!(default_key(&ctx), "GET:https://a.test/x");
    }

    #[test]
    fn test_validators_respect_policy_kind() {
        let both = headers(&[
            ("etag", "\"v1\""),
            ("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        ]);

        let etag_only = etag().build().unwrap();
        assert_eq!(etag_only.validators_of(&both), (Some("\"v1\"".into()), None));

        let lm_only = last_modified().build().unwrap();
        assert_eq!(
            lm_only.validators_of(&both),
            (None, Some("Wed, 21 Oct 2015 07:28:00 GMT".into()))
        );
    }

    #[test]
    fn test_unparseable_last_modified_is_ignored() {
        let cache = last_modified().build().unwrap();
        let bad = headers(&[("last-modified", "yesterday")]);
        assert_eq!(cache.validators_of(&bad), (None, None));
    }

    #[test]
    fn test_condition_prefers_etag() {
        let entry = CacheEntry {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            data: Payload::Empty,
            etag: Some("\"v1\"".into()),
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".into()),
            cached_at: chrono::Utc::now(),
            ttl: DEFAULT_TTL,
        };
        let mut ctx = RequestContext::new("/").unwrap();
        assert!(ConditionalCache::add_condition(&entry, &mut ctx));
        assert_eq!(ctx.header_str("if-none-match"), Some("\"v1\""));
        assert!(ctx.header_str("if-modified-since").is_none());
    }

    #[test]
    fn test_invalid_status_header_rejected() {
        assert!(conditional().status_header("x cache").build().is_err());
    }

    #[test]
    fn test_cache_status_strings() {
        assert_eq!(CacheStatus::Hit.to_string(), "HIT");
        assert_eq!(CacheStatus::Revalidated.as_str(), "REVALIDATED");
        assert_eq!(CacheStatus::Stale.as_str(), "STALE");
        assert_eq!(CacheStatus::Miss.as_str(), "MISS");
    }
}

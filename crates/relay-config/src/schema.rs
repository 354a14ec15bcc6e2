//! Configuration schema types.
//!
//! Each section knows how to turn itself into the policy or transport it
//! configures. Durations are written in milliseconds.

use std::time::Duration;

use relay_http::cache::{self, CacheBuilder};
use relay_http::{ConditionalCache, HttpRetry, HttpTransport, MemoryCacheStore};
use relay_policies::{Backoff, TimeoutConfig};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Timeout section. Unset phases are unbounded.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use relay_config::TimeoutsConfig;
///
/// let section = TimeoutsConfig {
///     request_ms: Some(5_000),
///     ..Default::default()
/// };
/// assert_eq!(section.to_timeout_config().request, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// Dispatch until response headers.
    pub request_ms: Option<u64>,

    /// Body download.
    pub body_ms: Option<u64>,

    /// Whole request.
    pub total_ms: Option<u64>,
}

impl TimeoutsConfig {
    /// Converts the section into a [`TimeoutConfig`].
    #[must_use]
    pub fn to_timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig {
            request: self.request_ms.map(Duration::from_millis),
            body: self.body_ms.map(Duration::from_millis),
            total: self.total_ms.map(Duration::from_millis),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("timeouts.request_ms", self.request_ms),
            ("timeouts.body_ms", self.body_ms),
            ("timeouts.total_ms", self.total_ms),
        ] {
            if value == Some(0) {
                return Err(ConfigError::invalid_value(field, "must be greater than 0"));
            }
        }
        Ok(())
    }
}

/// Exponential backoff between retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_ms: u64,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Upper bound on a single delay.
    pub max_ms: u64,

    /// Draw each delay uniformly from zero to the computed value.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 200,
            multiplier: 2.0,
            max_ms: 3_000,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    /// Converts the section into a [`Backoff`].
    #[must_use]
    pub fn to_backoff(&self) -> Backoff {
        Backoff::exponential(Duration::from_millis(self.initial_ms))
            .with_multiplier(self.multiplier)
            .with_max(Duration::from_millis(self.max_ms))
            .with_jitter(self.jitter)
    }
}

/// Retry section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Whether the retry policy is installed.
    pub enabled: bool,

    /// Attempt ceiling, including the first attempt.
    pub tries: u32,

    /// Status codes that trigger a retry.
    pub statuses: Vec<u16>,

    /// Only retry idempotent methods.
    pub idempotent_only: bool,

    /// Honor `Retry-After` response headers.
    pub respect_retry_after: bool,

    /// Longest `Retry-After` wait honored.
    pub max_wait_ms: u64,

    /// Backoff used when no `Retry-After` applies.
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tries: relay_policies::retry::DEFAULT_TRIES,
            statuses: relay_http::retry::DEFAULT_RETRY_STATUSES.to_vec(),
            idempotent_only: false,
            respect_retry_after: true,
            max_wait_ms: 60_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryConfig {
    /// Builds the HTTP retry policy, or `None` when retries are disabled.
    #[must_use]
    pub fn to_policy(&self) -> Option<HttpRetry> {
        if !self.enabled {
            return None;
        }
        let mut builder = relay_http::http_retry()
            .tries(self.tries)
            .statuses(self.statuses.iter().copied())
            .idempotent_only(self.idempotent_only)
            .backoff(self.backoff.to_backoff());
        builder = if self.respect_retry_after {
            builder.max_wait(Duration::from_millis(self.max_wait_ms))
        } else {
            builder.without_retry_after()
        };
        Some(builder.build())
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.tries == 0 {
            return Err(ConfigError::invalid_value("retry.tries", "must be at least 1"));
        }
        if let Some(status) = self.statuses.iter().find(|s| !(100..=599).contains(*s)) {
            return Err(ConfigError::invalid_value(
                "retry.statuses",
                format!("{status} is not an HTTP status code"),
            ));
        }
        if !self.backoff.multiplier.is_finite() || self.backoff.multiplier < 1.0 {
            return Err(ConfigError::invalid_value(
                "retry.backoff.multiplier",
                "must be a finite number of at least 1.0",
            ));
        }
        if self.backoff.max_ms < self.backoff.initial_ms {
            return Err(ConfigError::invalid_value(
                "retry.backoff.max_ms",
                "must not be less than retry.backoff.initial_ms",
            ));
        }
        Ok(())
    }
}

/// Which validators the cache uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheValidators {
    /// `ETag` / `If-None-Match` only.
    Etag,
    /// `Last-Modified` / `If-Modified-Since` only.
    LastModified,
    /// Both, preferring `ETag`.
    #[default]
    Conditional,
}

/// Conditional cache section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Whether the cache policy is installed.
    pub enabled: bool,

    /// Validators to use.
    pub validators: CacheValidators,

    /// How long entries stay fresh.
    pub ttl_ms: u64,

    /// Name of the cache status header.
    pub status_header: String,

    /// Bound on stored entries. Unbounded when unset.
    pub capacity: Option<usize>,

    /// Serve the stale entry when revalidation fails with a network or
    /// timeout error.
    pub stale_if_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            validators: CacheValidators::default(),
            ttl_ms: cache::DEFAULT_TTL.as_millis() as u64,
            status_header: cache::DEFAULT_CACHE_HEADER.to_string(),
            capacity: None,
            stale_if_error: true,
        }
    }
}

impl CacheConfig {
    /// Returns a cache builder configured from this section, backed by a
    /// fresh in-memory store.
    #[must_use]
    pub fn to_builder(&self) -> CacheBuilder {
        let builder = match self.validators {
            CacheValidators::Etag => relay_http::etag(),
            CacheValidators::LastModified => relay_http::last_modified(),
            CacheValidators::Conditional => relay_http::conditional(),
        };
        let store = self
            .capacity
            .map_or_else(MemoryCacheStore::new, MemoryCacheStore::with_capacity);
        builder
            .store(store)
            .ttl(Duration::from_millis(self.ttl_ms))
            .status_header(self.status_header.clone())
            .stale_if_error(self.stale_if_error)
    }

    /// Builds the cache policy, or `None` when caching is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Build`] if the status header name is invalid.
    pub fn to_policy(&self) -> Result<Option<ConditionalCache>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }
        Ok(Some(self.to_builder().build()?))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_ms == 0 {
            return Err(ConfigError::invalid_value("cache.ttl_ms", "must be greater than 0"));
        }
        if http::HeaderName::from_bytes(self.status_header.as_bytes()).is_err() {
            return Err(ConfigError::invalid_value(
                "cache.status_header",
                format!("invalid header name: {}", self.status_header),
            ));
        }
        if self.capacity == Some(0) {
            return Err(ConfigError::invalid_value("cache.capacity", "must be greater than 0"));
        }
        Ok(())
    }
}

/// HTTP transport section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Base URL relative request URLs are resolved against.
    pub base_url: Option<String>,

    /// `User-Agent` override.
    pub user_agent: Option<String>,

    /// Bound on connection establishment.
    pub connect_timeout_ms: Option<u64>,

    /// Idle time after which pooled connections close.
    pub pool_idle_timeout_ms: Option<u64>,

    /// Cap on idle pooled connections per host.
    pub pool_max_idle_per_host: Option<usize>,

    /// Return bodies as streams instead of buffering them.
    pub streaming: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_agent: None,
            connect_timeout_ms: None,
            pool_idle_timeout_ms: None,
            pool_max_idle_per_host: None,
            streaming: true,
        }
    }
}

impl TransportConfig {
    /// Builds the `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Build`] if the client cannot be initialized.
    pub fn to_transport(&self) -> Result<HttpTransport, ConfigError> {
        let mut builder = HttpTransport::builder().streaming(self.streaming);
        if let Some(base_url) = &self.base_url {
            builder = builder.base_url(base_url.clone());
        }
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(ms) = self.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.pool_idle_timeout_ms {
            builder = builder.pool_idle_timeout(Duration::from_millis(ms));
        }
        if let Some(max) = self.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(max);
        }
        Ok(builder.build()?)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(base_url) = &self.base_url {
            let valid = base_url
                .parse::<http::Uri>()
                .ok()
                .is_some_and(|uri| {
                    matches!(uri.scheme_str(), Some("http" | "https")) && uri.host().is_some()
                });
            if !valid {
                return Err(ConfigError::invalid_value(
                    "transport.base_url",
                    format!("expected an absolute http(s) URL, got '{base_url}'"),
                ));
            }
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_value(
                "transport.connect_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_convert_to_durations() {
        let section = TimeoutsConfig {
            request_ms: Some(1_500),
            body_ms: None,
            total_ms: Some(10_000),
        };
        let config = section.to_timeout_config();
        assert_eq!(config.request, Some(Duration::from_millis(1_500)));
        assert_eq!(config.body, None);
        assert_eq!(config.total, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_default_timeouts_are_unbounded() {
        assert!(TimeoutsConfig::default().to_timeout_config().is_unbounded());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let section = TimeoutsConfig {
            body_ms: Some(0),
            ..Default::default()
        };
        let err = section.validate().unwrap_err();
        assert!(err.to_string().contains("timeouts.body_ms"));
    }

    #[test]
    fn test_retry_defaults() {
        let section = RetryConfig::default();
        assert!(section.enabled);
        assert_eq!(section.tries, 3);
        assert_eq!(section.statuses, vec![408, 429, 500, 502, 503, 504]);
        assert!(section.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_from_section() {
        let section = RetryConfig {
            tries: 5,
            idempotent_only: true,
            ..Default::default()
        };
        let policy = section.to_policy().unwrap();
        assert_eq!(policy.tries(), 5);
        assert!(policy.idempotent_only());
    }

    #[test]
    fn test_disabled_retry_builds_nothing() {
        let section = RetryConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(section.to_policy().is_none());
    }

    #[test]
    fn test_retry_validation() {
        let zero = RetryConfig {
            tries: 0,
            ..Default::default()
        };
        assert!(zero.validate().unwrap_err().to_string().contains("retry.tries"));

        let bad_status = RetryConfig {
            statuses: vec![503, 42],
            ..Default::default()
        };
        assert!(bad_status.validate().unwrap_err().to_string().contains("42"));

        let shrinking = RetryConfig {
            backoff: BackoffConfig {
                multiplier: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());
    }

    #[test]
    fn test_backoff_conversion() {
        let backoff = BackoffConfig {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 300,
            jitter: false,
        }
        .to_backoff();
        assert_eq!(backoff.base_delay(1), Duration::from_millis(100));
        assert_eq!(backoff.base_delay(2), Duration::from_millis(200));
        assert_eq!(backoff.base_delay(3), Duration::from_millis(300));
    }

    #[test]
    fn test_cache_disabled_by_default() {
        let section = CacheConfig::default();
        assert!(!section.enabled);
        assert_eq!(section.ttl_ms, 300_000);
        assert_eq!(section.status_header, "x-cache");
        assert!(section.stale_if_error);
        assert!(section.to_policy().unwrap().is_none());
    }

    #[test]
    fn test_cache_policy_from_section() {
        let section = CacheConfig {
            enabled: true,
            validators: CacheValidators::Etag,
            ttl_ms: 1_000,
            ..Default::default()
        };
        let policy = section.to_policy().unwrap().unwrap();
        assert_eq!(policy.validators(), relay_http::Validators::ETag);
        assert_eq!(policy.ttl(), Duration::from_secs(1));
    }

    #[test]
    fn test_cache_validation() {
        let bad_header = CacheConfig {
            status_header: "x cache".to_string(),
            ..Default::default()
        };
        assert!(bad_header
            .validate()
            .unwrap_err()
            .to_string()
            .contains("cache.status_header"));

        let zero_capacity = CacheConfig {
            capacity: Some(0),
            ..Default::default()
        };
        assert!(zero_capacity.validate().is_err());
    }

    #[test]
    fn test_validators_deserialize_snake_case() {
        let v: CacheValidators = serde_json::from_str("\"last_modified\"").unwrap();
        assert_eq!(v, CacheValidators::LastModified);
    }

    #[test]
    fn test_transport_base_url_validation() {
        let valid = TransportConfig {
            base_url: Some("https://api.example.com/v1".to_string()),
            ..Default::default()
        };
        assert!(valid.validate().is_ok());

        let relative = TransportConfig {
            base_url: Some("/v1".to_string()),
            ..Default::default()
        };
        assert!(relative
            .validate()
            .unwrap_err()
            .to_string()
            .contains("transport.base_url"));
    }

    #[test]
    fn test_transport_from_section() {
        let section = TransportConfig {
            base_url: Some("https://api.example.com".to_string()),
            connect_timeout_ms: Some(2_000),
            streaming: false,
            ..Default::default()
        };
        let transport = section.to_transport().unwrap();
        assert_eq!(transport.base_url(), Some("https://api.example.com"));
    }
}

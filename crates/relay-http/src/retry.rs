//! HTTP-aware retry.
//!
//! - [`HttpRetryCondition`] retries network and timeout errors plus a
//!   configurable set of status codes (by default 408, 429, 500, 502, 503 and
//!   504).
//! - [`RetryAfter`] honours the `Retry-After` response header, in either
//!   delta-seconds or HTTP-date form, bounded by a maximum wait.
//! - [`http_retry`] assembles both with an exponential [`Backoff`] into one
//!   policy, optionally restricted to idempotent methods.
//!
//! ## Example
//!
//! ```
//! use relay_http::retry::http_retry;
//! use std::time::Duration;
//!
//! let retry = http_retry()
//!     .tries(4)
//!     .statuses([429, 503])
//!     .max_wait(Duration::from_secs(10))
//!     .idempotent_only(true)
//!     .build();
//! # let _ = retry;
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;
use http::Method;
use relay_core::{
    BoxFuture, Next, Policy, PolicyKind, PolicyMeta, RelayResult, RequestContext, Response,
};
use relay_policies::{Backoff, DelayPolicy, Outcome, Retry, RetryCondition, DEFAULT_TRIES};

/// Status codes retried by default.
pub const DEFAULT_RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Default ceiling for `Retry-After` waits.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// Retries retryable errors and responses with selected status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRetryCondition {
    statuses: BTreeSet<u16>,
}

impl HttpRetryCondition {
    /// Creates a condition over the given status codes.
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }

    /// Returns the retried status codes.
    #[must_use]
    pub const fn statuses(&self) -> &BTreeSet<u16> {
        &self.statuses
    }
}

impl Default for HttpRetryCondition {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_STATUSES)
    }
}

impl RetryCondition for HttpRetryCondition {
    fn should_retry(&self, outcome: Outcome<'_>, _attempt: u32) -> bool {
        match outcome {
            Ok(response) => self.statuses.contains(&response.status.as_u16()),
            Err(err) => err.is_retryable(),
        }
    }
}

/// Parses a `Retry-After` value relative to `now`.
///
/// Delta-seconds and HTTP-dates are accepted; a date in the past yields
/// zero. Anything else yields `None`.
#[must_use]
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

/// Delay policy reading `Retry-After` from the response.
///
/// Defers (returns `None`) for errors and for responses without a parseable
/// header, so a later delay policy such as [`Backoff`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter {
    max_wait: Duration,
}

impl RetryAfter {
    /// Creates the policy with the given ceiling.
    #[must_use]
    pub const fn new(max_wait: Duration) -> Self {
        Self { max_wait }
    }

    /// Returns the ceiling.
    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        self.max_wait
    }
}

impl Default for RetryAfter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WAIT)
    }
}

impl DelayPolicy for RetryAfter {
    fn name(&self) -> &'static str {
        "retry-after"
    }

    fn delay(&self, outcome: Outcome<'_>, _attempt: u32) -> Option<Duration> {
        let response = outcome.ok()?;
        let value = response.header_str(RETRY_AFTER.as_str())?;
        let wait = parse_retry_after(value, SystemTime::now())?;
        if wait > self.max_wait {
            tracing::debug!(
                requested_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                max_wait_ms = u64::try_from(self.max_wait.as_millis()).unwrap_or(u64::MAX),
                "clamping Retry-After"
            );
        }
        Some(wait.min(self.max_wait))
    }
}

/// Returns `true` for methods that are idempotent per HTTP semantics.
#[must_use]
pub fn is_idempotent(method: &Method) -> bool {
    method.is_idempotent()
}

/// Retry policy for HTTP requests. See [`http_retry`].
#[derive(Clone)]
pub struct HttpRetry {
    retry: Retry,
    idempotent_only: bool,
}

/// Creates a builder with the default statuses, [`DEFAULT_TRIES`] attempts,
/// `Retry-After` support and exponential backoff.
#[must_use]
pub fn http_retry() -> HttpRetryBuilder {
    HttpRetryBuilder::default()
}

impl HttpRetry {
    /// Returns the attempt ceiling.
    #[must_use]
    pub const fn tries(&self) -> u32 {
        self.retry.tries()
    }

    /// Returns `true` if non-idempotent requests bypass retrying.
    #[must_use]
    pub const fn idempotent_only(&self) -> bool {
        self.idempotent_only
    }
}

impl fmt::Debug for HttpRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRetry")
            .field("retry", &self.retry)
            .field("idempotent_only", &self.idempotent_only)
            .finish()
    }
}

impl Policy for HttpRetry {
    fn name(&self) -> &'static str {
        "http-retry"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Retry).with_children(vec![self.retry.meta()])
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        if self.idempotent_only && !is_idempotent(ctx.method()) {
            return next.run(ctx);
        }
        self.retry.handle(ctx, next)
    }
}

/// Builder for [`HttpRetry`].
#[derive(Debug, Clone)]
pub struct HttpRetryBuilder {
    tries: u32,
    statuses: BTreeSet<u16>,
    max_wait: Option<Duration>,
    backoff: Option<Backoff>,
    idempotent_only: bool,
}

impl Default for HttpRetryBuilder {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            statuses: DEFAULT_RETRY_STATUSES.into_iter().collect(),
            max_wait: Some(DEFAULT_MAX_WAIT),
            backoff: Some(Backoff::default()),
            idempotent_only: false,
        }
    }
}

impl HttpRetryBuilder {
    /// Sets the attempt ceiling, including the first attempt.
    pub fn tries(mut self, tries: u32) -> Self {
        self.tries = tries;
        self
    }

    /// Replaces the retried status codes.
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Sets the `Retry-After` ceiling.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Ignores `Retry-After`.
    pub fn without_retry_after(mut self) -> Self {
        self.max_wait = None;
        self
    }

    /// Sets the backoff used when no `Retry-After` applies.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Retries immediately when no `Retry-After` applies.
    pub fn without_backoff(mut self) -> Self {
        self.backoff = None;
        self
    }

    /// Restricts retrying to idempotent methods.
    pub fn idempotent_only(mut self, enabled: bool) -> Self {
        self.idempotent_only = enabled;
        self
    }

    /// Builds the policy.
    #[must_use]
    pub fn build(self) -> HttpRetry {
        let mut retry = Retry::builder()
            .tries(self.tries)
            .condition(HttpRetryCondition::new(self.statuses));
        if let Some(max_wait) = self.max_wait {
            retry = retry.delay(RetryAfter::new(max_wait));
        }
        if let Some(backoff) = self.backoff {
            retry = retry.delay(backoff);
        }
        HttpRetry {
            retry: retry.build(),
            idempotent_only: self.idempotent_only,
        }
    }
}

//! Phase timeouts.
//!
//! The [`Timeout`] policy enforces up to three independent deadlines:
//!
//! | Phase | Bounds |
//! |---|---|
//! | `request` | dispatch until response headers (connect + TTFB) |
//! | `body` | reading the response body once headers are known |
//! | `total` | both phases together |
//!
//! Each attempt runs under a child of the context's cancellation token.
//! When a deadline expires the child token is cancelled, so a transport that
//! watches the token abandons its I/O, and the policy returns
//! [`RelayError::Timeout`] tagged with the phase and its configured duration.
//!
//! When a body or total deadline applies, a streamed body is read chunk by
//! chunk inside the policy and returned buffered. Errors the stream yields
//! while reading are returned as they are.
//!
//! A per-request body deadline can be set through the [`BodyTimeout`]
//! extension, which takes precedence over the configured one.
//!
//! The body deadline only applies to streamed bodies. A transport that
//! returns the body already buffered has read it before the headers reach
//! this policy, so that time counts against the `request` phase and an
//! expiry is reported as [`TimeoutPhase::Request`]. The unenforced body
//! deadline is logged at `debug`.

use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use relay_core::{
    BoxFuture, CancellationToken, Content, Next, Payload, Policy, PolicyKind, PolicyMeta,
    RelayError, RelayResult, RequestContext, Response, TimeoutPhase,
};
use tokio::time::Instant;

/// Deadlines per request phase. Unset phases are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Dispatch until response headers.
    pub request: Option<Duration>,
    /// Body download.
    pub body: Option<Duration>,
    /// Whole request.
    pub total: Option<Duration>,
}

impl TimeoutConfig {
    /// Creates a configuration with no deadlines.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request: None,
            body: None,
            total: None,
        }
    }

    /// Sets the request-phase deadline.
    pub const fn with_request(mut self, timeout: Duration) -> Self {
        self.request = Some(timeout);
        self
    }

    /// Sets the body-phase deadline.
    pub const fn with_body(mut self, timeout: Duration) -> Self {
        self.body = Some(timeout);
        self
    }

    /// Sets the total deadline.
    pub const fn with_total(mut self, timeout: Duration) -> Self {
        self.total = Some(timeout);
        self
    }

    /// Returns `true` if no deadline is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.request.is_none() && self.body.is_none() && self.total.is_none()
    }
}

/// Per-request override of the body-phase deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyTimeout(pub Duration);

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    phase: TimeoutPhase,
    configured: Duration,
}

impl Deadline {
    fn start(phase: TimeoutPhase, configured: Option<Duration>) -> Option<Self> {
        configured.map(|configured| Self {
            at: Instant::now() + configured,
            phase,
            configured,
        })
    }

    fn expired(self, token: &CancellationToken) -> RelayError {
        token.cancel();
        tracing::warn!(
            phase = %self.phase,
            timeout_ms = u64::try_from(self.configured.as_millis()).unwrap_or(u64::MAX),
            "request timed out"
        );
        RelayError::timeout(self.phase, self.configured)
    }
}

/// The earliest of the candidates; on a tie the phase-specific deadline wins
/// over the total one.
fn earliest(phase: Option<Deadline>, total: Option<Deadline>) -> Option<Deadline> {
    [phase, total].into_iter().flatten().min_by_key(|d| d.at)
}

/// Policy enforcing phase deadlines.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeout {
    config: TimeoutConfig,
}

impl Timeout {
    /// Creates a timeout policy.
    #[must_use]
    pub const fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// Returns the configured deadlines.
    #[must_use]
    pub const fn config(&self) -> &TimeoutConfig {
        &self.config
    }
}

impl Policy for Timeout {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Timeout)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        Box::pin(async move {
            let body_timeout = ctx
                .extension::<BodyTimeout>()
                .map(|b| b.0)
                .or(self.config.body);
            let token = ctx
                .cancellation()
                .map_or_else(CancellationToken::new, CancellationToken::child_token);
            let ctx = ctx.with_cancellation(token.clone());
            let ctx_url = ctx.url().to_owned();

            let total = Deadline::start(TimeoutPhase::Total, self.config.total);
            let request = Deadline::start(TimeoutPhase::Request, self.config.request);

            let response = match earliest(request, total) {
                Some(deadline) => tokio::time::timeout_at(deadline.at, next.run(ctx))
                    .await
                    .map_err(|_| deadline.expired(&token))??,
                None => next.run(ctx).await?,
            };

            if body_timeout.is_none() && total.is_none() {
                return Ok(response);
            }

            let (head, content) = response.into_parts();
            let mut stream = match content {
                Content::Stream(stream) => stream,
                buffered @ Content::Buffered(_) => {
                    if let Some(timeout) = body_timeout {
                        tracing::debug!(
                            url = ctx_url.as_str(),
                            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                            "body already buffered by the transport, body deadline not applied"
                        );
                    }
                    return Ok(head.with_data(buffered));
                }
            };

            let body = Deadline::start(TimeoutPhase::Body, body_timeout);
            let deadline = earliest(body, total);
            let mut buf = BytesMut::new();
            loop {
                let chunk = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline.at, stream.next())
                        .await
                        .map_err(|_| deadline.expired(&token))?,
                    None => stream.next().await,
                };
                match chunk {
                    Some(chunk) => buf.extend_from_slice(&chunk?),
                    None => break,
                }
            }

            Ok(head.with_data(Content::Buffered(Payload::Bytes(buf.freeze()))))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = TimeoutConfig::new()
            .with_request(Duration::from_secs(1))
            .with_body(Duration::from_millis(50));
        assert_eq!(config.request, Some(Duration::from_secs(1)));
        assert_eq!(config.body, Some(Duration::from_millis(50)));
        assert!(config.total.is_none());
        assert!(!config.is_unbounded());
        assert!(TimeoutConfig::default().is_unbounded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_prefers_phase_on_tie() {
        let d = Duration::from_millis(10);
        let request = Deadline::start(TimeoutPhase::Request, Some(d));
        let total = Some(Deadline {
            at: request.unwrap().at,
            phase: TimeoutPhase::Total,
            configured: d,
        });
        assert_eq!(earliest(request, total).unwrap().phase, TimeoutPhase::Request);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_picks_sooner_total() {
        let request = Deadline::start(TimeoutPhase::Request, Some(Duration::from_secs(5)));
        let total = Deadline::start(TimeoutPhase::Total, Some(Duration::from_secs(1)));
        assert_eq!(earliest(request, total).unwrap().phase, TimeoutPhase::Total);
        assert!(earliest(None, None).is_none());
    }

    #[test]
    fn test_expired_cancels_token() {
        let token = CancellationToken::new();
        let deadline = Deadline {
            at: Instant::now(),
            phase: TimeoutPhase::Body,
            configured: Duration::from_millis(50),
        };
        let err = deadline.expired(&token);
        assert!(token.is_cancelled());
        assert_eq!(err.timeout_phase(), Some(TimeoutPhase::Body));
        assert_eq!(err.timeout_ms(), Some(50));
    }
}

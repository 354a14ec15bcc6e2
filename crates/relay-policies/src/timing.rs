//! Timing instrumentation.
//!
//! The [`Timing`] policy measures how long the rest of the chain takes. It
//! places a [`TimingMarker`] into the context's extensions before calling
//! `next`; a transport that sees the marker calls
//! [`TimingMarker::mark_ttfb`] the instant response headers arrive, which
//! splits the total into time-to-first-byte and download.
//!
//! Timing is recorded on success and on failure. On failure the error is
//! returned unchanged after the callback fires.
//!
//! A streamed response body is part of the measurement. Without a header the
//! stream is wrapped and the timing completes when it ends, fails or is
//! dropped; the response then carries a [`StreamTiming`] slot instead of a
//! [`TimingInfo`]. With [`TimingBuilder::include_in_headers`] the body is
//! buffered first, since the header must hold the final numbers.
//!
//! # Example
//!
//! ```
//! use relay_policies::timing::Timing;
//!
//! let timing = Timing::builder()
//!     .include_in_headers("x-response-timing")
//!     .on_timing(|info, ctx| {
//!         tracing::info!(url = ctx.url(), total_ms = info.total_ms(), "request timed");
//!     })
//!     .build()
//!     .unwrap();
//! # let _ = timing;
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use http::header::{HeaderName, HeaderValue};
use relay_core::{
    BoxFuture, ByteStream, Content, Next, Policy, PolicyKind, PolicyMeta, RelayError, RelayResult,
    RequestContext, Response,
};
use serde::{Serialize, Serializer};
use tokio::time::Instant;

/// Default response header used by [`TimingBuilder::include_in_headers`].
pub const DEFAULT_TIMING_HEADER: &str = "x-response-timing";

/// Callback invoked once per request with the final timing.
pub type TimingCallback = Arc<dyn Fn(&TimingInfo, &RequestContext) + Send + Sync>;

/// Mid-flight timing marks, shared between the timing policy and the
/// transport through the context's extensions.
#[derive(Debug)]
pub struct TimingMarker {
    start: Instant,
    ttfb: OnceLock<Instant>,
    dns: OnceLock<Duration>,
    tcp: OnceLock<Duration>,
    tls: OnceLock<Duration>,
    parent: Option<Arc<TimingMarker>>,
}

impl TimingMarker {
    /// Creates a marker whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Instant::now(), None)
    }

    fn starting_at(start: Instant, parent: Option<Arc<TimingMarker>>) -> Self {
        Self {
            start,
            ttfb: OnceLock::new(),
            dns: OnceLock::new(),
            tcp: OnceLock::new(),
            tls: OnceLock::new(),
            parent,
        }
    }

    /// Records that response headers are available.
    ///
    /// Only the first call has an effect. Enclosing timing policies are
    /// marked too.
    pub fn mark_ttfb(&self) {
        let _ = self.ttfb.set(Instant::now());
        if let Some(parent) = &self.parent {
            parent.mark_ttfb();
        }
    }

    /// Records the DNS lookup duration. Only the first call has an effect.
    pub fn record_dns(&self, duration: Duration) {
        let _ = self.dns.set(duration);
    }

    /// Records the TCP connect duration. Only the first call has an effect.
    pub fn record_tcp(&self, duration: Duration) {
        let _ = self.tcp.set(duration);
    }

    /// Records the TLS handshake duration. Only the first call has an effect.
    pub fn record_tls(&self, duration: Duration) {
        let _ = self.tls.set(duration);
    }

    /// Returns `true` once [`mark_ttfb`](Self::mark_ttfb) has been called.
    #[must_use]
    pub fn ttfb_marked(&self) -> bool {
        self.ttfb.get().is_some()
    }

    /// Freezes the marks into a [`TimingInfo`], using `end` as the end of the
    /// request.
    #[must_use]
    pub fn finish(&self, started_at: DateTime<Utc>, end: Instant) -> TimingInfo {
        let total = end.saturating_duration_since(self.start);
        let ttfb = self
            .ttfb
            .get()
            .map_or(Duration::ZERO, |mark| mark.saturating_duration_since(self.start))
            .min(total);
        let ended_at = started_at
            + chrono::Duration::from_std(total).unwrap_or_else(|_| chrono::Duration::zero());

        TimingInfo {
            dns: self.dns.get().copied(),
            tcp: self.tcp.get().copied(),
            tls: self.tls.get().copied(),
            ttfb,
            download: total - ttfb,
            total,
            start_time: started_at,
            end_time: ended_at,
        }
    }
}

impl Default for TimingMarker {
    fn default() -> Self {
        Self::new()
    }
}

/// Final timing of one request.
///
/// `ttfb + download == total` always holds. Durations serialize as
/// fractional milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingInfo {
    /// DNS lookup, if reported by the transport.
    #[serde(serialize_with = "opt_ms", skip_serializing_if = "Option::is_none")]
    pub dns: Option<Duration>,
    /// TCP connect, if reported by the transport.
    #[serde(serialize_with = "opt_ms", skip_serializing_if = "Option::is_none")]
    pub tcp: Option<Duration>,
    /// TLS handshake, if reported by the transport.
    #[serde(serialize_with = "opt_ms", skip_serializing_if = "Option::is_none")]
    pub tls: Option<Duration>,
    /// Start until response headers; zero when never marked.
    #[serde(serialize_with = "ms")]
    pub ttfb: Duration,
    /// Response headers until completion.
    #[serde(serialize_with = "ms")]
    pub download: Duration,
    /// Start until completion.
    #[serde(serialize_with = "ms")]
    pub total: Duration,
    /// Wall-clock start.
    pub start_time: DateTime<Utc>,
    /// Wall-clock end.
    pub end_time: DateTime<Utc>,
}

impl TimingInfo {
    /// Returns the total in fractional milliseconds.
    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.total.as_secs_f64() * 1000.0
    }

    /// Returns the time-to-first-byte in fractional milliseconds.
    #[must_use]
    pub fn ttfb_ms(&self) -> f64 {
        self.ttfb.as_secs_f64() * 1000.0
    }
}

fn ms<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

#[allow(clippy::ref_option)]
fn opt_ms<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match duration {
        Some(duration) => ms(duration, serializer),
        None => serializer.serialize_none(),
    }
}

/// Policy that measures the rest of the chain.
#[derive(Clone, Default)]
pub struct Timing {
    on_timing: Option<TimingCallback>,
    header: Option<HeaderName>,
}

impl Timing {
    /// Creates a timing policy with no callback and no header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> TimingBuilder {
        TimingBuilder::default()
    }

    fn attach_header(&self, response: &mut Response, info: &TimingInfo) -> RelayResult<()> {
        if let Some(name) = &self.header {
            let json = serde_json::to_string(info)?;
            let value = HeaderValue::from_str(&json)
                .map_err(|e| RelayError::serialization(e.to_string()))?;
            response.headers.insert(name.clone(), value);
        }
        Ok(())
    }
}

/// Pending measurement of one request; finishing it fires the callback.
struct Report {
    marker: Arc<TimingMarker>,
    started_at: DateTime<Utc>,
    ctx: RequestContext,
    on_timing: Option<TimingCallback>,
}

impl Report {
    fn finish(self) -> TimingInfo {
        let info = self.marker.finish(self.started_at, Instant::now());
        if let Some(callback) = &self.on_timing {
            callback(&info, &self.ctx);
        }
        info
    }
}

/// Timing of a streamed response, filled in once its body completes.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct StreamTiming(Arc<OnceLock<TimingInfo>>);

impl StreamTiming {
    /// Returns the timing once the body has ended, failed or been dropped.
    #[must_use]
    pub fn get(&self) -> Option<&TimingInfo> {
        self.0.get()
    }
}

/// Body stream that completes its [`Report`] at end, error or drop.
struct TimedStream {
    inner: ByteStream,
    report: Option<Report>,
    slot: StreamTiming,
}

impl TimedStream {
    fn complete(&mut self) {
        if let Some(report) = self.report.take() {
            let _ = self.slot.0.set(report.finish());
        }
    }
}

impl Stream for TimedStream {
    type Item = RelayResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_next(cx);
        if matches!(polled, Poll::Ready(None | Some(Err(_)))) {
            this.complete();
        }
        polled
    }
}

impl Drop for TimedStream {
    fn drop(&mut self) {
        self.complete();
    }
}

impl fmt::Debug for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timing")
            .field("on_timing", &self.on_timing.is_some())
            .field("header", &self.header)
            .finish()
    }
}

impl Policy for Timing {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Timing)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        Box::pin(async move {
            let started_at = Utc::now();
            let parent = ctx.extensions().get_arc::<TimingMarker>();
            let marker = Arc::new(TimingMarker::starting_at(Instant::now(), parent));

            let mut ctx = ctx;
            ctx.extensions_mut().insert_arc(Arc::clone(&marker));
            let report = Report {
                marker,
                started_at,
                ctx: ctx.clone(),
                on_timing: self.on_timing.clone(),
            };

            let response = match next.run(ctx).await {
                Ok(response) => response,
                Err(e) => {
                    report.finish();
                    return Err(e);
                }
            };

            let (head, content) = response.into_parts();
            match content {
                Content::Stream(inner) if self.header.is_none() => {
                    let slot = StreamTiming::default();
                    let timed = TimedStream {
                        inner,
                        report: Some(report),
                        slot: slot.clone(),
                    };
                    Ok(head.with_data(Content::stream(timed)).with_extension(slot))
                }
                content => {
                    let content = match content {
                        stream @ Content::Stream(_) => match stream.into_payload().await {
                            Ok(payload) => Content::Buffered(payload),
                            Err(e) => {
                                report.finish();
                                return Err(e);
                            }
                        },
                        buffered => buffered,
                    };
                    let info = report.finish();
                    let mut response = head.with_data(content);
                    self.attach_header(&mut response, &info)?;
                    response.extensions.insert(info);
                    Ok(response)
                }
            }
        })
    }
}

/// Builder for [`Timing`].
#[derive(Default)]
pub struct TimingBuilder {
    on_timing: Option<TimingCallback>,
    header: Option<String>,
}

impl TimingBuilder {
    /// Sets the callback fired once per request.
    pub fn on_timing<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TimingInfo, &RequestContext) + Send + Sync + 'static,
    {
        self.on_timing = Some(Arc::new(callback));
        self
    }

    /// Sets an already shared callback.
    pub fn on_timing_shared(mut self, callback: TimingCallback) -> Self {
        self.on_timing = Some(callback);
        self
    }

    /// Serializes the timing as JSON into the named response header.
    pub fn include_in_headers(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Uses [`DEFAULT_TIMING_HEADER`].
    pub fn include_in_default_header(self) -> Self {
        self.include_in_headers(DEFAULT_TIMING_HEADER)
    }

    /// Builds the policy.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the header name is invalid.
    pub fn build(self) -> RelayResult<Timing> {
        let header = self
            .header
            .map(|name| {
                HeaderName::try_from(name.as_str()).map_err(|e| {
                    RelayError::invalid_request(format!("invalid timing header '{name}': {e}"))
                })
            })
            .transpose()?;
        Ok(Timing {
            on_timing: self.on_timing,
            header,
        })
    }
}

//! Request logging.
//!
//! [`log_requests`] wraps the rest of the chain in a `tracing` span carrying
//! the method, URL and a request ID, and emits one event when the request
//! completes (`debug` on success, `warn` on error).
//!
//! ## Request IDs
//!
//! Each request gets a [`RequestId`] (UUID v7, time-ordered). An ID already
//! present in the `x-request-id` header is reused when it parses as a UUID;
//! otherwise a new one is generated and, if enabled, sent in that header.

use std::fmt;
use std::time::Instant;

use http::header::HeaderValue;
use relay_core::{
    BoxFuture, Next, Policy, PolicyKind, PolicyMeta, RelayResult, RequestContext, Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// The header used to propagate request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Unique identifier of one request, stored in the context's extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new time-ordered ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Policy logging each request. See [`log_requests`].
#[derive(Debug, Clone, Copy)]
pub struct LogRequests {
    propagate_id: bool,
}

/// Creates a logging policy that also sends the request ID header.
#[must_use]
pub const fn log_requests() -> LogRequests {
    LogRequests { propagate_id: true }
}

impl LogRequests {
    /// Controls whether the request ID is sent in `x-request-id`.
    #[must_use]
    pub const fn propagate_id(mut self, propagate: bool) -> Self {
        self.propagate_id = propagate;
        self
    }

    fn request_id(ctx: &RequestContext) -> RequestId {
        if let Some(id) = ctx.extension::<RequestId>() {
            return *id;
        }
        ctx.header_str(REQUEST_ID_HEADER)
            .and_then(|value| Uuid::parse_str(value).ok())
            .map_or_else(RequestId::new, RequestId)
    }
}

impl Default for LogRequests {
    fn default() -> Self {
        log_requests()
    }
}

impl Policy for LogRequests {
    fn name(&self) -> &'static str {
        "log-requests"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Logging)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        let id = Self::request_id(&ctx);
        let span = tracing::info_span!(
            "relay.request",
            request_id = %id,
            method = %ctx.method(),
            url = ctx.url(),
        );

        let mut ctx = ctx.with_extension(id);
        if self.propagate_id && !ctx.headers().contains_key(REQUEST_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
                ctx.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
        }

        Box::pin(
            async move {
                let started = Instant::now();
                let result = next.run(ctx).await;
                let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                match &result {
                    Ok(res) => tracing::debug!(
                        status = res.status.as_u16(),
                        duration_ms,
                        "request completed"
                    ),
                    Err(e) => tracing::warn!(
                        error = %e,
                        kind = e.kind(),
                        duration_ms,
                        "request failed"
                    ),
                }
                result
            }
            .instrument(span),
        )
    }
}

//! # Relay Policies
//!
//! Protocol-neutral policies for the Relay middleware framework.
//!
//! | Module | Policy | Purpose |
//! |--------|--------|---------|
//! | [`timing`] | [`Timing`] | TTFB/download/total measurement with a context marker |
//! | [`retry`] | [`Retry`] | Re-run the chain on retryable outcomes |
//! | [`backoff`] | [`Backoff`] | Exponential delay with cap and jitter |
//! | [`timeout`] | [`Timeout`] | Request, body and total deadlines |
//! | [`headers`] | [`headers()`], [`credential()`] | Default headers and credentials |
//! | [`body`] | [`serialize_body()`], [`parse_response()`] | Body encoding and decoding |
//! | [`logging`] | [`log_requests()`] | Per-request `tracing` span |
//!
//! HTTP-specific policies (conditional caching, status-based retry,
//! `Retry-After`, multipart) live in `relay-http`.
//!
//! ## Example
//!
//! ```
//! use relay_core::Pipeline;
//! use relay_policies::{log_requests, Backoff, Retry, Timeout, TimeoutConfig, Timing};
//! use std::time::Duration;
//!
//! let builder = Pipeline::builder()
//!     .policy(log_requests())
//!     .policy(Timing::new())
//!     .policy(
//!         Retry::builder()
//!             .tries(3)
//!             .delay(Backoff::exponential(Duration::from_millis(100)))
//!             .build(),
//!     )
//!     .policy(Timeout::new(TimeoutConfig::new().with_request(Duration::from_secs(5))));
//! # let _ = builder;
//! ```

#![doc(html_root_url = "https://docs.rs/relay-policies/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod backoff;
pub mod body;
pub mod headers;
pub mod logging;
pub mod retry;
pub mod timeout;
pub mod timing;

pub use backoff::Backoff;
pub use body::{
    decode_payload, media_range_matches, parse_response, serialize_body, BodyReader,
    ParseResponse, SerializeBody,
};
pub use headers::{credential, headers, Credential, CredentialLocation, CredentialPolicy, DefaultHeaders};
pub use logging::{log_requests, LogRequests, RequestId, REQUEST_ID_HEADER};
pub use retry::{
    DelayPolicy, FnCondition, Outcome, Retry, RetryBuilder, RetryCondition, RetryState,
    RetryableErrors, DEFAULT_TRIES,
};
pub use timeout::{BodyTimeout, Timeout, TimeoutConfig};
pub use timing::{
    StreamTiming, Timing, TimingBuilder, TimingCallback, TimingInfo, TimingMarker,
    DEFAULT_TIMING_HEADER,
};

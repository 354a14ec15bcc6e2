//! # Relay
//!
//! **Protocol-agnostic request/response middleware for Rust clients**
//!
//! Relay composes small policies around a pluggable transport:
//!
//! - **Composition** – ordered policy chains, conditional branches and
//!   nested pipelines
//! - **Conditional caching** – `ETag` / `Last-Modified` revalidation against a
//!   pluggable store
//! - **Resilience** – retry with backoff and `Retry-After`, phase timeouts,
//!   cancellation
//! - **Observability** – per-phase timing, `tracing` spans and Prometheus
//!   metrics
//! - **Streaming** – server-sent events and multipart bodies with capability
//!   negotiation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::builder()
//!         .policy(log_requests())
//!         .policy(conditional().build()?)
//!         .policy(http_retry().tries(3).build())
//!         .policy(Timeout::new(TimeoutConfig::new().with_request(std::time::Duration::from_secs(5))))
//!         .policy(parse_response().accept(["application/json"]))
//!         .transport(HttpTransport::builder().base_url("https://api.example.com").build()?)
//!         .build()?;
//!
//!     let res = pipeline.execute(RequestContext::new("/users/1")?).await?;
//!     println!("{} {:?}", res.status, res.payload());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Policies run in order on the way in and in reverse on the way out:
//!
//! ```text
//! Request → p1 → p2 → p3 → Transport
//!                              ↓
//! Response ← p1 ← p2 ← p3 ←───┘
//! ```

#![doc(html_root_url = "https://docs.rs/relay/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use relay_core as core;

// Re-export transport-agnostic policies
pub use relay_policies as policies;

// Re-export HTTP policies and transport
pub use relay_http as http;

// Re-export SSE types
pub use relay_sse as sse;

// Re-export logging and metrics
pub use relay_telemetry as telemetry;

// Re-export configuration
pub use relay_config as config;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use relay::prelude::*;
///
/// let ctx = RequestContext::new("/items").unwrap();
/// assert_eq!(ctx.url(), "/items");
/// ```
pub mod prelude {
    pub use relay_core::{
        compose, either, match_policy, Body, CancellationToken, Capabilities, Content, Next,
        Payload, Pipeline, Policy, RelayError, RelayResult, RequestContext, Response, Transport,
    };

    // Re-export generic policies
    pub use relay_policies::{
        credential, headers, log_requests, parse_response, serialize_body, Backoff, Credential,
        Retry, Timeout, TimeoutConfig, Timing, TimingInfo,
    };

    // Re-export HTTP policies and transport
    pub use relay_http::{
        conditional, etag, http_retry, last_modified, multipart, HttpTransport, MemoryCacheStore,
    };

    // Re-export SSE types
    pub use relay_sse::{events, SseEvent, SseStream};

    // Re-export configuration
    pub use relay_config::{ConfigLoader, RelayConfig};
}

//! # Relay HTTP
//!
//! HTTP-specific policies and the `reqwest` transport for the Relay
//! middleware framework.
//!
//! | Module | Items | Purpose |
//! |--------|-------|---------|
//! | [`cache`] | [`etag()`], [`last_modified()`], [`conditional()`] | Conditional caching with revalidation |
//! | [`retry`] | [`http_retry()`], [`RetryAfter`] | Status-aware retry and `Retry-After` delays |
//! | [`multipart`] | [`multipart()`] | MIME validation and `multipart/form-data` encoding |
//! | [`transport`] | [`HttpTransport`] | `reqwest` adapter with TTFB marking and cancellation |
//!
//! ## Example
//!
//! ```no_run
//! use relay_core::{Pipeline, RequestContext};
//! use relay_http::{conditional, http_retry, multipart, HttpTransport};
//! use relay_policies::Timing;
//!
//! # async fn example() -> relay_core::RelayResult<()> {
//! let pipeline = Pipeline::builder()
//!     .policy(Timing::new())
//!     .policy(http_retry().build())
//!     .policy(conditional().build()?)
//!     .policy(multipart().allow(["image/*", "application/pdf"]))
//!     .transport(HttpTransport::builder().base_url("https://api.example.com").build()?)
//!     .build()?;
//!
//! let response = pipeline.execute(RequestContext::new("/items/1")?).await?;
//! println!("{} {:?}", response.status, response.header_str("x-cache"));
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/relay-http/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod multipart;
pub mod retry;
pub mod transport;

pub use cache::{
    conditional, etag, last_modified, CacheBuilder, CacheClock, CacheEntry, CacheStatus,
    CacheStore, ConditionalCache, MemoryCacheStore, Validators,
};
pub use multipart::{multipart, Multipart};
pub use retry::{http_retry, HttpRetry, HttpRetryBuilder, HttpRetryCondition, RetryAfter};
pub use transport::{HttpTransport, HttpTransportBuilder};

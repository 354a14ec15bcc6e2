//! # Relay Test
//!
//! Test utilities for Relay pipelines, with no network involved.
//!
//! ## Key Features
//!
//! - **Scripted transport**: [`MockTransport`] replays responses and errors in
//!   order, records every call and advertises configurable capabilities
//! - **Streaming bodies**: chunked, failing and never-ending body streams via
//!   [`MockBody`], with a flag telling whether the stream was dropped
//! - **Ordering assertions**: [`RecordingPolicy`] writes `name-before` /
//!   `name-after` events into a shared [`EventLog`]
//!
//! ## Example
//!
//! ```
//! use relay_core::{Pipeline, RequestContext};
//! use relay_test::{EventLog, MockTransport, RecordingPolicy};
//!
//! # tokio_test::block_on(async {
//! let log = EventLog::new();
//! let pipeline = Pipeline::builder()
//!     .policy(RecordingPolicy::new("outer", &log))
//!     .policy(RecordingPolicy::new("inner", &log))
//!     .transport(MockTransport::new())
//!     .build()
//!     .unwrap();
//!
//! pipeline.execute(RequestContext::new("/").unwrap()).await.unwrap();
//! assert_eq!(log.events(), ["outer-before", "inner-before", "inner-after", "outer-after"]);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/relay-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod policy;
mod response;
mod transport;

pub use policy::{EventLog, RecordingPolicy};
pub use response::{MockBody, MockResponse};
pub use transport::{MockReply, MockTransport, RecordedCall};

//! # Relay Core
//!
//! Core types and the composition engine for the Relay middleware framework.
//!
//! A request is described by a [`RequestContext`], threaded through a chain of
//! [`Policy`] values and finally handed to a [`Transport`]. Each policy wraps
//! the rest of the chain, reachable through its [`Next`] continuation:
//!
//! ```text
//! ctx → p1 → p2 → p3 → transport
//!                          ↓
//! res ← p1 ← p2 ← p3 ←─────┘
//! ```
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`RequestContext`] | URL, method, headers, body, cancellation, extensions |
//! | [`Response`] | Status, headers, body ([`Content`]) and response extensions |
//! | [`Policy`] / [`Next`] | One layer of behavior and the rest of the chain |
//! | [`compose`], [`either`], [`match_policy`] | Policy combinators |
//! | [`Pipeline`] | Policies bound to a transport |
//! | [`Transport`] / [`Capabilities`] | The backend seam and its feature flags |
//! | [`SessionTransport`] | Lazily opened, per-endpoint sessions |
//! | [`RelayError`] | The error taxonomy shared by every layer |

#![doc(html_root_url = "https://docs.rs/relay-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod body;
pub mod compose;
pub mod context;
pub mod error;
pub mod extensions;
pub mod pipeline;
pub mod policy;
pub mod response;
pub mod session;
pub mod transport;

pub use body::{Body, ByteStream, Content, MultipartForm, MultipartPart, Payload};
pub use compose::{compose, either, match_policy, Composed, Either, Match, Predicate};
pub use context::RequestContext;
pub use error::{RelayError, RelayResult, TimeoutPhase};
pub use extensions::Extensions;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use policy::{BoxFuture, FnPolicy, Next, Policy, PolicyKind, PolicyMeta, SharedPolicy};
pub use response::Response;
pub use session::{Connector, SessionTransport};
pub use transport::{resolve_url, Capabilities, FnTransport, Transport};

pub use tokio_util::sync::CancellationToken;

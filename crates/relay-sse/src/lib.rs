//! # Relay SSE
//!
//! Incremental Server-Sent Events parsing for Relay response bodies.
//!
//! ## Features
//!
//! - **Lazy**: events are parsed as the consumer pulls them; nothing is read
//!   ahead of demand
//! - **Chunk-safe**: lines and UTF-8 sequences may be split across chunks
//! - **Lenient**: comments, unknown fields and malformed `retry` values are
//!   ignored rather than failing the stream
//! - **Bounded**: line and event sizes are capped by [`SseConfig`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use relay_core::{Pipeline, RequestContext};
//! use relay_http::HttpTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::builder()
//!     .transport(HttpTransport::builder().base_url("https://api.example.com").build()?)
//!     .build()?;
//!
//! let ctx = RequestContext::new("/events")?.with_header("accept", "text/event-stream")?;
//! let response = pipeline.execute(ctx).await?;
//!
//! let mut events = relay_sse::events(response.data)?;
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{}: {}", event.event_type().unwrap_or("message"), event.data());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Wire format
//!
//! ```text
//! id: 1
//! event: update
//! data: Hello, World!
//! retry: 3000
//!
//! ```
//!
//! - `id`: event ID for reconnection tracking
//! - `event`: event type (default: "message")
//! - `data`: event payload (can span multiple lines)
//! - `retry`: reconnection interval hint in milliseconds
//! - Lines starting with `:` are comments

#![doc(html_root_url = "https://docs.rs/relay-sse/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod event;
mod parser;
mod stream;

pub use config::{SseConfig, SseConfigBuilder, DEFAULT_MAX_EVENT_SIZE, DEFAULT_MAX_LINE_LENGTH};
pub use error::{SseError, SseResult};
pub use event::SseEvent;
pub use parser::{parse_sse, SseParser};
pub use stream::{events, SseStream};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::SseConfig;
    pub use crate::error::{SseError, SseResult};
    pub use crate::event::SseEvent;
    pub use crate::parser::parse_sse;
    pub use crate::stream::{events, SseStream};
}

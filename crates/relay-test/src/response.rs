//! Scripted responses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use relay_core::{Content, Payload, RelayError, Response};

/// How a scripted response delivers its body.
#[derive(Debug, Clone)]
pub enum MockBody {
    /// A buffered payload.
    Payload(Payload),
    /// A stream yielding the given chunks, then ending.
    Chunks(Vec<Bytes>),
    /// A stream yielding the given chunks, then failing with a network error.
    ChunksThenError(Vec<Bytes>, String),
    /// A stream yielding the given chunks, then never resolving.
    Stalled(Vec<Bytes>),
}

/// A response the mock transport will produce.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: MockBody,
    delay: Option<Duration>,
}

impl MockResponse {
    /// A response with the given status and an empty body.
    ///
    /// # Panics
    ///
    /// Panics if `status` is not a valid status code.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).expect("valid status code"),
            headers: HeaderMap::new(),
            body: MockBody::Payload(Payload::Empty),
            delay: None,
        }
    }

    /// A `200 OK` with an empty body.
    #[must_use]
    pub fn ok() -> Self {
        Self::status(200)
    }

    /// Adds a header.
    ///
    /// # Panics
    ///
    /// Panics if the name or value is invalid.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(
            HeaderName::try_from(name).expect("valid header name"),
            HeaderValue::try_from(value).expect("valid header value"),
        );
        self
    }

    /// Sets a text body and `Content-Type: text/plain`.
    #[must_use]
    pub fn text(self, text: &str) -> Self {
        self.header("content-type", "text/plain")
            .body(MockBody::Payload(Payload::Text(text.to_owned())))
    }

    /// Sets a raw JSON body (as bytes) and `Content-Type: application/json`.
    #[must_use]
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(MockBody::Payload(Payload::Bytes(Bytes::from(value.to_string()))))
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: MockBody) -> Self {
        self.body = body;
        self
    }

    /// Streams the given chunks.
    #[must_use]
    pub fn chunks<I, B>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.body(MockBody::Chunks(chunks.into_iter().map(Into::into).collect()))
    }

    /// A body stream that never produces a chunk.
    #[must_use]
    pub fn stalled_body(self) -> Self {
        self.body(MockBody::Stalled(Vec::new()))
    }

    /// Delays the response headers.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the header delay, if any.
    #[must_use]
    pub const fn header_delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Builds the pipeline response. `dropped` is set once a streamed body is
    /// dropped.
    pub(crate) fn build(&self, dropped: &Arc<AtomicBool>) -> Response {
        let data = match &self.body {
            MockBody::Payload(payload) => Content::Buffered(payload.clone()),
            MockBody::Chunks(chunks) => {
                let guard = DropFlag(Arc::clone(dropped));
                Content::stream(stream::iter(chunks.clone()).map(move |chunk| {
                    let _ = &guard;
                    Ok(chunk)
                }))
            }
            MockBody::ChunksThenError(chunks, message) => {
                let guard = DropFlag(Arc::clone(dropped));
                let items: Vec<Result<Bytes, RelayError>> = chunks
                    .iter()
                    .cloned()
                    .map(Ok)
                    .chain(std::iter::once(Err(RelayError::network(message.clone()))))
                    .collect();
                Content::stream(stream::iter(items).map(move |item| {
                    let _ = &guard;
                    item
                }))
            }
            MockBody::Stalled(chunks) => {
                let guard = DropFlag(Arc::clone(dropped));
                Content::stream(
                    stream::iter(chunks.clone())
                        .chain(stream::pending())
                        .map(move |chunk| {
                            let _ = &guard;
                            Ok(chunk)
                        }),
                )
            }
        };
        let mut response = Response::new(self.status, data);
        response.headers = self.headers.clone();
        response
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

//! Response type.

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

use crate::body::{Content, Payload};
use crate::extensions::Extensions;

/// A response flowing back out through the policy chain.
///
/// `ok` is derived from the status (`200..300`). The `extensions` bag carries
/// read-only fields policies attach on the way out, such as timing data.
#[derive(Debug)]
pub struct Response<T = Content> {
    /// Status code.
    pub status: StatusCode,
    /// Reason phrase, as reported by the transport.
    pub status_text: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub data: T,
    /// Typed response extensions.
    pub extensions: Extensions,
}

impl<T> Response<T> {
    /// Creates a response with the canonical reason phrase for `status`.
    pub fn new(status: StatusCode, data: T) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            headers: HeaderMap::new(),
            data,
            extensions: Extensions::new(),
        }
    }

    /// Returns `true` when the status is in `200..300`.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Returns a header value as a string, if present and visible ASCII.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the `Content-Type` header without parameters, lowercased.
    #[must_use]
    pub fn media_type(&self) -> Option<String> {
        self.header_str(http::header::CONTENT_TYPE.as_str())
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty())
    }

    /// Sets a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the reason phrase.
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    /// Stores a typed extension.
    pub fn with_extension<E: Send + Sync + 'static>(mut self, value: E) -> Self {
        self.extensions.insert(value);
        self
    }

    /// Returns the typed extension `E`, if present.
    #[must_use]
    pub fn extension<E: Send + Sync + 'static>(&self) -> Option<&E> {
        self.extensions.get::<E>()
    }

    /// Transforms the body while keeping status, headers and extensions.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            data: f(self.data),
            extensions: self.extensions,
        }
    }

    /// Splits the response into its body and the rest.
    pub fn into_parts(self) -> (Response<()>, T) {
        let Self {
            status,
            status_text,
            headers,
            data,
            extensions,
        } = self;
        (
            Response {
                status,
                status_text,
                headers,
                data: (),
                extensions,
            },
            data,
        )
    }
}

impl Response<()> {
    /// Reattaches a body to a split response.
    pub fn with_data<U>(self, data: U) -> Response<U> {
        self.map(|()| data)
    }
}

impl Response<Content> {
    /// Creates a buffered response.
    pub fn buffered(status: StatusCode, payload: impl Into<Payload>) -> Self {
        Self::new(status, Content::Buffered(payload.into()))
    }

    /// Returns the buffered payload, if the body is not a stream.
    #[must_use]
    pub const fn payload(&self) -> Option<&Payload> {
        self.data.as_payload()
    }

    /// Buffers a streaming body in place.
    pub async fn buffer(self) -> crate::RelayResult<Response<Payload>> {
        let (head, content) = self.into_parts();
        let payload = content.into_payload().await?;
        Ok(head.with_data(payload))
    }
}

impl Response<Payload> {
    /// Converts a buffered response back into pipeline content.
    pub fn into_content(self) -> Response<Content> {
        self.map(Content::Buffered)
    }
}

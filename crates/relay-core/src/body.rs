//! Request and response bodies.
//!
//! Requests carry a [`Body`], a cloneable description of what to send.
//! Responses carry [`Content`], which is either a buffered [`Payload`] or a
//! single-use [`ByteStream`]. The split matters to policies: a buffered payload
//! can be cached and replayed, a stream can only be consumed once.

use std::fmt;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{RelayError, RelayResult};

/// A boxed stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = RelayResult<Bytes>> + Send + 'static>>;

/// A request body.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// UTF-8 text.
    Text(String),
    /// A JSON document, serialized by the body policy or the transport.
    Json(Value),
    /// Raw bytes.
    Bytes(Bytes),
    /// URL-encoded form fields, in order.
    Form(Vec<(String, String)>),
    /// A multipart form descriptor.
    Multipart(MultipartForm),
}

impl Body {
    /// Returns `true` for [`Body::Empty`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns a short name for the body kind, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Bytes(_) => "bytes",
            Self::Form(_) => "form",
            Self::Multipart(_) => "multipart",
        }
    }

    /// Returns the multipart descriptor, if this is a multipart body.
    #[must_use]
    pub const fn as_multipart(&self) -> Option<&MultipartForm> {
        match self {
            Self::Multipart(form) => Some(form),
            _ => None,
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<MultipartForm> for Body {
    fn from(value: MultipartForm) -> Self {
        Self::Multipart(value)
    }
}

/// A multipart form: an ordered list of named parts.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    parts: Vec<MultipartPart>,
}

impl MultipartForm {
    /// Creates an empty form.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a part.
    pub fn part(mut self, part: MultipartPart) -> Self {
        self.parts.push(part);
        self
    }

    /// Appends a text part without an explicit content type.
    pub fn text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.part(MultipartPart::new(name, Body::Text(value.into())))
    }

    /// Returns the parts in order.
    #[must_use]
    pub fn parts(&self) -> &[MultipartPart] {
        &self.parts
    }

    /// Returns the number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns `true` if the form has no parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// One part of a [`MultipartForm`].
#[derive(Debug, Clone)]
pub struct MultipartPart {
    /// The form field name.
    pub name: String,
    /// Inline data (text or bytes) or a nested body.
    pub body: Body,
    /// Optional filename.
    pub filename: Option<String>,
    /// Declared MIME type; `None` means "not specified".
    pub content_type: Option<String>,
}

impl MultipartPart {
    /// Creates a part with no filename and no content type.
    pub fn new(name: impl Into<String>, body: impl Into<Body>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            filename: None,
            content_type: None,
        }
    }

    /// Sets the filename.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the declared MIME type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A buffered response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    /// No body.
    #[default]
    Empty,
    /// Decoded text.
    Text(String),
    /// Decoded JSON.
    Json(Value),
    /// Raw bytes.
    Bytes(Bytes),
}

impl Payload {
    /// Returns the payload as bytes, serializing JSON if needed.
    pub fn to_bytes(&self) -> RelayResult<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Self::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Returns the text, if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the JSON value, if this is a JSON payload.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the raw bytes, if this is a bytes payload.
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns `true` for [`Payload::Empty`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

/// A response body as seen by the pipeline.
pub enum Content {
    /// Fully buffered content.
    Buffered(Payload),
    /// A single-use stream of chunks.
    Stream(ByteStream),
}

impl Content {
    /// Wraps a chunk stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = RelayResult<Bytes>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }

    /// Returns `true` if the content is an unread stream.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Returns the buffered payload, if not streaming.
    #[must_use]
    pub const fn as_payload(&self) -> Option<&Payload> {
        match self {
            Self::Buffered(payload) => Some(payload),
            Self::Stream(_) => None,
        }
    }

    /// Reads the whole body into memory.
    ///
    /// Stream errors are returned unchanged.
    pub async fn into_bytes(self) -> RelayResult<Bytes> {
        match self {
            Self::Buffered(payload) => payload.to_bytes(),
            Self::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Buffers the content, turning a stream into [`Payload::Bytes`].
    pub async fn into_payload(self) -> RelayResult<Payload> {
        match self {
            Self::Buffered(payload) => Ok(payload),
            stream @ Self::Stream(_) => Ok(Payload::Bytes(stream.into_bytes().await?)),
        }
    }

    /// Converts the content into a stream, wrapping buffered payloads as a
    /// single chunk.
    pub fn into_stream(self) -> RelayResult<ByteStream> {
        match self {
            Self::Stream(stream) => Ok(stream),
            Self::Buffered(payload) => {
                let bytes = payload.to_bytes()?;
                Ok(Box::pin(futures_util::stream::iter(
                    (!bytes.is_empty()).then_some(Ok(bytes)),
                )))
            }
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Buffered(Payload::Empty)
    }
}

impl From<Payload> for Content {
    fn from(value: Payload) -> Self {
        Self::Buffered(value)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(payload) => f.debug_tuple("Buffered").field(payload).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Decodes bytes as UTF-8, mapping failures to a serialization error.
pub fn utf8(bytes: &[u8]) -> RelayResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| RelayError::serialization(format!("invalid UTF-8 body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    #[tokio::test]
    async fn test_stream_into_bytes_concatenates_chunks() {
        let content = Content::stream(stream::iter(vec![
            Ok(Bytes::from_static(b"hel")),
            Ok(Bytes::from_static(b"lo")),
        ]));
        assert!(content.is_stream());
        assert_eq!(content.into_bytes().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_stream_error_surfaces() {
        let content = Content::stream(stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(RelayError::network("reset")),
        ]));
        let err = content.into_payload().await.unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn test_json_payload_to_bytes() {
        let payload = Payload::from(json!({"a": 1}));
        assert_eq!(payload.to_bytes().unwrap(), Bytes::from_static(br#"{"a":1}"#));
    }

    #[tokio::test]
    async fn test_buffered_into_stream_single_chunk() {
        let mut stream = Content::from(Payload::from("abc")).into_stream().unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_multipart_builder() {
        let form = MultipartForm::new().text("title", "hello").part(
            MultipartPart::new("file", Bytes::from_static(b"\x89PNG"))
                .with_filename("a.png")
                .with_content_type("image/png"),
        );
        assert_eq!(form.len(), 2);
        assert_eq!(form.parts()[1].filename.as_deref(), Some("a.png"));
        assert_eq!(Body::from(form).kind(), "multipart");
    }

    #[test]
    fn test_utf8_rejects_invalid() {
        assert!(utf8(&[0xff, 0xfe]).is_err());
        assert_eq!(utf8(b"ok").unwrap(), "ok");
    }
}

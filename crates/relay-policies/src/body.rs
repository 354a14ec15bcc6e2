//! Request body serialization and response parsing.
//!
//! - [`serialize_body`] turns JSON, form and text bodies into bytes and sets
//!   `Content-Type` when the request does not carry one.
//! - [`parse_response`] buffers the response body and decodes it by content
//!   type, optionally enforcing an `Accept` list and delegating to a custom
//!   [`BodyReader`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use mime::Mime;
use relay_core::{
    Body, BoxFuture, Next, Payload, Policy, PolicyKind, PolicyMeta, RelayError, RelayResult,
    RequestContext, Response,
};

/// Returns `true` if `media_type` falls inside the media range `range`.
///
/// Ranges may be exact (`image/png`), a type wildcard (`image/*`) or `*/*`.
/// Parameters on either side are ignored and comparison is case-insensitive.
///
/// ```
/// use relay_policies::body::media_range_matches;
///
/// assert!(media_range_matches("image/*", "image/png"));
/// assert!(media_range_matches("text/plain", "Text/Plain; charset=utf-8"));
/// assert!(!media_range_matches("image/*", "text/plain"));
/// ```
#[must_use]
pub fn media_range_matches(range: &str, media_type: &str) -> bool {
    let parse = |s: &str| s.trim().to_ascii_lowercase().parse::<Mime>().ok();
    let (Some(range), Some(actual)) = (parse(range), parse(media_type)) else {
        return false;
    };
    if range.type_() == mime::STAR {
        return true;
    }
    range.type_() == actual.type_()
        && (range.subtype() == mime::STAR || range.subtype() == actual.subtype())
}

fn is_json(media_type: &str) -> bool {
    media_type == "application/json" || media_type.ends_with("+json")
}

fn is_textual(media_type: &str) -> bool {
    media_type.starts_with("text/")
        || media_type.ends_with("+xml")
        || matches!(
            media_type,
            "application/xml" | "application/x-www-form-urlencoded" | "application/javascript"
        )
}

/// Policy encoding request bodies. See [`serialize_body`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializeBody;

/// Creates a policy that serializes JSON, form and text bodies.
///
/// Bytes and multipart bodies pass through untouched. A JSON value that
/// cannot be encoded fails with [`RelayError::Serialization`].
#[must_use]
pub const fn serialize_body() -> SerializeBody {
    SerializeBody
}

impl SerializeBody {
    fn encode(ctx: RequestContext) -> RelayResult<RequestContext> {
        let (bytes, content_type) = match ctx.body() {
            Some(Body::Json(value)) => (Bytes::from(serde_json::to_vec(value)?), "application/json"),
            Some(Body::Form(fields)) => (
                Bytes::from(
                    serde_urlencoded::to_string(fields)
                        .map_err(|e| RelayError::serialization(e.to_string()))?,
                ),
                "application/x-www-form-urlencoded",
            ),
            Some(Body::Text(text)) => (
                Bytes::copy_from_slice(text.as_bytes()),
                "text/plain; charset=utf-8",
            ),
            _ => return Ok(ctx),
        };
        let ctx = if ctx.headers().contains_key(CONTENT_TYPE) {
            ctx
        } else {
            ctx.with_header_value(CONTENT_TYPE, HeaderValue::from_static(content_type))
        };
        Ok(ctx.with_body(Body::Bytes(bytes)))
    }
}

impl Policy for SerializeBody {
    fn name(&self) -> &'static str {
        "serialize-body"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Body)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        match Self::encode(ctx) {
            Ok(ctx) => next.run(ctx),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}

/// Custom decoder for response bodies.
pub trait BodyReader: Send + Sync + 'static {
    /// Decodes `bytes` declared as `media_type` (lowercase, without
    /// parameters). Failures should be [`RelayError::Serialization`].
    fn read(&self, media_type: Option<&str>, bytes: Bytes) -> RelayResult<Payload>;
}

impl<F> BodyReader for F
where
    F: Fn(Option<&str>, Bytes) -> RelayResult<Payload> + Send + Sync + 'static,
{
    fn read(&self, media_type: Option<&str>, bytes: Bytes) -> RelayResult<Payload> {
        self(media_type, bytes)
    }
}

/// Decodes a body by media type: JSON to [`Payload::Json`], textual types to
/// [`Payload::Text`], everything else to [`Payload::Bytes`].
pub fn decode_payload(media_type: Option<&str>, bytes: Bytes) -> RelayResult<Payload> {
    if bytes.is_empty() {
        return Ok(Payload::Empty);
    }
    match media_type {
        Some(mt) if is_json(mt) => Ok(Payload::Json(
            serde_json::from_slice(&bytes)
                .map_err(|e| RelayError::serialization(format!("malformed JSON body: {e}")))?,
        )),
        Some(mt) if is_textual(mt) => Ok(Payload::Text(relay_core::body::utf8(&bytes)?)),
        _ => Ok(Payload::Bytes(bytes)),
    }
}

/// Policy decoding response bodies. See [`parse_response`].
#[derive(Clone, Default)]
pub struct ParseResponse {
    accept: Vec<String>,
    reader: Option<Arc<dyn BodyReader>>,
}

/// Creates a response-parsing policy with no `Accept` constraint.
#[must_use]
pub fn parse_response() -> ParseResponse {
    ParseResponse::default()
}

impl ParseResponse {
    /// Declares the acceptable media ranges.
    ///
    /// The list is sent as the `Accept` header (unless the request sets one)
    /// and a successful response whose content type matches none of them
    /// fails with [`RelayError::NotAcceptable`].
    pub fn accept<I, S>(mut self, ranges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accept = ranges.into_iter().map(Into::into).collect();
        self
    }

    /// Uses a custom body reader instead of [`decode_payload`].
    pub fn reader<R: BodyReader>(mut self, reader: R) -> Self {
        self.reader = Some(Arc::new(reader));
        self
    }

    fn with_accept_header(&self, ctx: RequestContext) -> RelayResult<RequestContext> {
        if self.accept.is_empty() || ctx.headers().contains_key(ACCEPT) {
            return Ok(ctx);
        }
        ctx.with_header(ACCEPT.as_str(), &self.accept.join(", "))
    }

    fn check_acceptable(&self, response: &Response) -> RelayResult<()> {
        if self.accept.is_empty() || !response.ok() {
            return Ok(());
        }
        match response.media_type() {
            Some(mt) if !self.accept.iter().any(|range| media_range_matches(range, &mt)) => {
                Err(RelayError::not_acceptable(mt, self.accept.clone()))
            }
            _ => Ok(()),
        }
    }

    fn decode(&self, media_type: Option<&str>, bytes: Bytes) -> RelayResult<Payload> {
        match &self.reader {
            Some(reader) => reader.read(media_type, bytes),
            None => decode_payload(media_type, bytes),
        }
    }
}

impl fmt::Debug for ParseResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseResponse")
            .field("accept", &self.accept)
            .field("reader", &self.reader.is_some())
            .finish()
    }
}

impl Policy for ParseResponse {
    fn name(&self) -> &'static str {
        "parse-response"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Body)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        Box::pin(async move {
            let ctx = self.with_accept_header(ctx)?;
            let response = next.run(ctx).await?;
            self.check_acceptable(&response)?;

            let media_type = response.media_type();
            let (head, content) = response.into_parts();
            let payload = match content.into_payload().await? {
                Payload::Bytes(bytes) => self.decode(media_type.as_deref(), bytes)?,
                decoded => decoded,
            };
            Ok(head.with_data(payload.into()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_range_matches() {
        assert!(media_range_matches("*/*", "application/octet-stream"));
        assert!(media_range_matches("application/json", "application/json"));
        assert!(!media_range_matches("application/json", "application/xml"));
        assert!(!media_range_matches("image/*", ""));
        assert!(!media_range_matches("", "image/png"));
    }

    #[test]
    fn test_encode_json_sets_content_type() {
        let ctx = RequestContext::new("/").unwrap().with_body(json!({"a": 1}));
        let encoded = SerializeBody::encode(ctx).unwrap();
        assert_eq!(encoded.header_str("content-type"), Some("application/json"));
        assert!(matches!(encoded.body(), Some(Body::Bytes(b)) if b.as_ref() == br#"{"a":1}"#));
    }

    #[test]
    fn test_encode_keeps_explicit_content_type() {
        let ctx = RequestContext::new("/")
            .unwrap()
            .with_header("content-type", "application/vnd.api+json")
            .unwrap()
            .with_body(json!([1]));
        let encoded = SerializeBody::encode(ctx).unwrap();
        assert_eq!(encoded.header_str("content-type"), Some("application/vnd.api+json"));
    }

    #[test]
    fn test_encode_form() {
        let ctx = RequestContext::new("/").unwrap().with_body(Body::Form(vec![
            ("q".into(), "a b".into()),
            ("n".into(), "1".into()),
        ]));
        let encoded = SerializeBody::encode(ctx).unwrap();
        assert!(matches!(encoded.body(), Some(Body::Bytes(b)) if b.as_ref() == b"q=a+b&n=1"));
    }

    #[test]
    fn test_decode_payload_by_type() {
        let json = decode_payload(Some("application/json"), Bytes::from_static(b"{\"x\":true}")).unwrap();
        assert_eq!(json, Payload::Json(json!({"x": true})));

        let text = decode_payload(Some("text/html"), Bytes::from_static(b"<p>")).unwrap();
        assert_eq!(text, Payload::Text("<p>".into()));

        let raw = decode_payload(Some("image/png"), Bytes::from_static(b"\x89P")).unwrap();
        assert!(matches!(raw, Payload::Bytes(_)));

        assert_eq!(decode_payload(None, Bytes::new()).unwrap(), Payload::Empty);
    }

    #[test]
    fn test_decode_malformed_json_is_serialization_error() {
        let err = decode_payload(Some("application/json"), Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.kind(), "serialization");
    }
}

//! `multipart/form-data` requests.
//!
//! The [`Multipart`] policy validates every part of a
//! [`Body::Multipart`](relay_core::Body::Multipart) request against an
//! optional MIME allow-list, then either hands the form to a transport that
//! advertises `multipart_form_data` or encodes it into bytes itself.
//!
//! ## MIME validation
//!
//! | Allow-list | Part type | Result |
//! |------------|-----------|--------|
//! | none | missing or empty | `text/plain` |
//! | none | any | kept as declared |
//! | set | missing, empty or unlisted | `Invalid MIME type` error |
//! | set | matches an exact entry or a `type/*` entry | kept as declared |

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderValue, CONTENT_TYPE};
use mime::Mime;
use relay_core::{
    Body, BoxFuture, MultipartForm, MultipartPart, Next, Policy, PolicyKind, PolicyMeta,
    RelayError, RelayResult, RequestContext, Response,
};
use relay_policies::media_range_matches;
use uuid::Uuid;

/// Type assigned to parts without one when no allow-list is set.
pub const DEFAULT_PART_TYPE: &str = "text/plain";

/// Resolves the MIME type of one part.
///
/// # Errors
///
/// Returns [`RelayError::Validation`] with the message `Invalid MIME type`
/// when an allow-list is set and the declared type is missing, empty,
/// malformed or not allowed.
pub fn resolve_part_type(part: &MultipartPart, allow: Option<&[String]>) -> RelayResult<String> {
    let declared = part
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(allow) = allow else {
        return Ok(declared.unwrap_or(DEFAULT_PART_TYPE).to_owned());
    };

    let invalid = || {
        RelayError::validation(format!(
            "Invalid MIME type for part '{}': {:?} is not one of {allow:?}",
            part.name,
            declared.unwrap_or_default()
        ))
    };
    let declared = declared.ok_or_else(invalid)?;
    if declared.parse::<Mime>().is_err() {
        return Err(invalid());
    }
    if allow.iter().any(|range| media_range_matches(range, declared)) {
        Ok(declared.to_owned())
    } else {
        Err(invalid())
    }
}

/// Validates every part, returning a form whose parts all carry a resolved
/// content type.
pub fn validate_form(form: &MultipartForm, allow: Option<&[String]>) -> RelayResult<MultipartForm> {
    form.parts().iter().try_fold(MultipartForm::new(), |out, part| {
        let content_type = resolve_part_type(part, allow)?;
        Ok(out.part(part.clone().with_content_type(content_type)))
    })
}

/// Escapes a quoted-string parameter of `Content-Disposition`.
fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}

pub(crate) fn part_bytes(part: &MultipartPart) -> RelayResult<Bytes> {
    match &part.body {
        Body::Empty => Ok(Bytes::new()),
        Body::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
        Body::Bytes(bytes) => Ok(bytes.clone()),
        Body::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
        Body::Form(fields) => serde_urlencoded::to_string(fields)
            .map(Bytes::from)
            .map_err(|e| RelayError::serialization(e.to_string())),
        Body::Multipart(_) => Err(RelayError::invalid_request(format!(
            "part '{}' nests a multipart form, which cannot be encoded",
            part.name
        ))),
    }
}

/// Generates a boundary unlikely to appear in any part.
#[must_use]
pub fn generate_boundary() -> String {
    format!("relay-{}", Uuid::new_v4().simple())
}

/// Encodes a validated form with the given boundary.
///
/// Parts without a content type are written without a `Content-Type` line.
pub fn encode_form(form: &MultipartForm, boundary: &str) -> RelayResult<Bytes> {
    let mut buf = BytesMut::new();
    for part in form.parts() {
        buf.put_slice(b"--");
        buf.put_slice(boundary.as_bytes());
        buf.put_slice(b"\r\n");

        let mut disposition = format!(
            "Content-Disposition: form-data; name=\"{}\"",
            escape_quoted(&part.name)
        );
        if let Some(filename) = &part.filename {
            disposition.push_str(&format!("; filename=\"{}\"", escape_quoted(filename)));
        }
        buf.put_slice(disposition.as_bytes());
        buf.put_slice(b"\r\n");
        if let Some(content_type) = &part.content_type {
            buf.put_slice(b"Content-Type: ");
            buf.put_slice(content_type.as_bytes());
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&part_bytes(part)?);
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(b"--\r\n");
    Ok(buf.freeze())
}

/// Policy validating and, when needed, encoding multipart bodies.
#[derive(Debug, Clone, Default)]
pub struct Multipart {
    allow: Option<Vec<String>>,
}

/// Creates a multipart policy without an allow-list.
#[must_use]
pub fn multipart() -> Multipart {
    Multipart::default()
}

impl Multipart {
    /// Restricts part types to the given exact types and `type/*` ranges.
    pub fn allow<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the allow-list.
    #[must_use]
    pub fn allowed(&self) -> Option<&[String]> {
        self.allow.as_deref()
    }

    fn prepare(&self, ctx: RequestContext, native: bool) -> RelayResult<RequestContext> {
        let Some(form) = ctx.body().and_then(Body::as_multipart) else {
            return Ok(ctx);
        };
        let form = validate_form(form, self.allowed())?;
        if native {
            return Ok(ctx.with_body(form));
        }

        let boundary = generate_boundary();
        let bytes = encode_form(&form, &boundary)?;
        let content_type = HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}"))
            .map_err(|e| RelayError::invalid_request(e.to_string()))?;
        tracing::trace!(parts = form.len(), bytes = bytes.len(), "multipart form encoded");
        Ok(ctx
            .with_header_value(CONTENT_TYPE, content_type)
            .with_body(Body::Bytes(bytes)))
    }
}

impl Policy for Multipart {
    fn name(&self) -> &'static str {
        "multipart"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Body)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        let native = next.capabilities().multipart_form_data;
        match self.prepare(ctx, native) {
            Ok(ctx) => next.run(ctx),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_missing_type_defaults_without_allow_list() {
        let part = MultipartPart::new("note", "hi");
        assert_eq!(resolve_part_type(&part, None).unwrap(), "text/plain");

        let blank = MultipartPart::new("note", "hi").with_content_type("  ");
        assert_eq!(resolve_part_type(&blank, None).unwrap(), "text/plain");
    }

    #[test]
    fn test_empty_type_rejected_with_allow_list() {
        let part = MultipartPart::new("note", "hi").with_content_type("");
        let err = resolve_part_type(&part, Some(&allow(&["text/plain"]))).unwrap_err();
        assert!(matches!(err, RelayError::Validation { .. }));
        assert!(err.to_string().starts_with("Invalid MIME type"));
    }

    #[test]
    fn test_wildcard_allows_subtype() {
        let part = MultipartPart::new("avatar", Bytes::from_static(b"\x89PNG"))
            .with_content_type("image/png");
        assert_eq!(
            resolve_part_type(&part, Some(&allow(&["image/*"]))).unwrap(),
            "image/png"
        );
    }

    #[test]
    fn test_unlisted_and_missing_types_rejected() {
        let list = allow(&["image/*", "application/pdf"]);
        let text = MultipartPart::new("a", "x").with_content_type("text/plain");
        let missing = MultipartPart::new("b", "x");
        assert!(resolve_part_type(&text, Some(&list)).is_err());
        assert!(resolve_part_type(&missing, Some(&list)).is_err());
    }

    #[test]
    fn test_encode_form_layout() {
        let form = MultipartForm::new()
            .part(MultipartPart::new("title", "Hello").with_content_type("text/plain"))
            .part(
                MultipartPart::new("file", Bytes::from_static(b"abc"))
                    .with_filename("a\"b.txt")
                    .with_content_type("application/octet-stream"),
            );
        let bytes = encode_form(&form, "XYZ").unwrap();
        let expected = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            Hello\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"a\\\"b.txt\"\r\n\
            Content-Type: application/octet-stream\r\n\r\n\
            abc\r\n\
            --XYZ--\r\n";
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), expected);
    }

    #[test]
    fn test_nested_multipart_is_rejected() {
        let form = MultipartForm::new().part(MultipartPart::new("inner", MultipartForm::new()));
        let err = encode_form(&form, "b").unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[test]
    fn test_boundaries_are_unique() {
        assert_ne!(generate_boundary(), generate_boundary());
    }
}

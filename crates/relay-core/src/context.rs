//! Request context.
//!
//! [`RequestContext`] is the value threaded through a policy chain. It is
//! immutable by convention: the `with_*` builders consume the context and
//! return the updated one, so a policy that wants to change the request hands
//! a new context to `next` rather than mutating shared state.
//!
//! # Example
//!
//! ```
//! use relay_core::{Body, RequestContext};
//! use http::Method;
//!
//! let ctx = RequestContext::new("/users")
//!     .unwrap()
//!     .with_method(Method::POST)
//!     .with_header("x-tenant", "acme")
//!     .unwrap()
//!     .with_body(Body::from(serde_json::json!({"name": "ada"})));
//!
//! assert_eq!(ctx.url(), "/users");
//! assert_eq!(ctx.header_str("X-Tenant"), Some("acme"));
//! ```

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;

use crate::body::Body;
use crate::error::{RelayError, RelayResult};
use crate::extensions::Extensions;

/// Everything a policy or transport needs to know about one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    url: String,
    method: Method,
    headers: HeaderMap,
    body: Option<Body>,
    cancellation: Option<CancellationToken>,
    extensions: Extensions,
}

impl RequestContext {
    /// Creates a `GET` context for the given URL.
    ///
    /// The URL may be absolute or relative to the transport's base URL.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the URL is empty.
    pub fn new(url: impl Into<String>) -> RelayResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(RelayError::invalid_request("url must not be empty"));
        }
        Ok(Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            cancellation: None,
            extensions: Extensions::new(),
        })
    }

    /// Creates a context with the given method.
    pub fn with_method_and_url(method: Method, url: impl Into<String>) -> RelayResult<Self> {
        Ok(Self::new(url)?.with_method(method))
    }

    /// Returns the request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns mutable access to the headers of an owned context.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns a header value as a string, if present and visible ASCII.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the request body, if any.
    #[must_use]
    pub const fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Returns the cancellation token, if any.
    #[must_use]
    pub const fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Returns `true` if the cancellation token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Returns the extension bag.
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Returns mutable access to the extension bag of an owned context.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Returns the typed extension `T`, if present.
    #[must_use]
    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Replaces the URL.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the URL is empty.
    pub fn with_url(mut self, url: impl Into<String>) -> RelayResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(RelayError::invalid_request("url must not be empty"));
        }
        self.url = url;
        Ok(self)
    }

    /// Replaces the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets a header, replacing existing values of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the name or value is not a
    /// valid header.
    pub fn with_header(mut self, name: &str, value: &str) -> RelayResult<Self> {
        let name = HeaderName::try_from(name)
            .map_err(|e| RelayError::invalid_request(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| RelayError::invalid_request(format!("invalid value for header '{name}': {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets an already validated header.
    pub fn with_header_value(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces all headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Removes a header.
    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Removes the body.
    pub fn without_body(mut self) -> Self {
        self.body = None;
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Stores a typed extension.
    pub fn with_extension<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }
}

//! Transport contract.
//!
//! A [`Transport`] is the innermost step of a pipeline: it turns a
//! [`RequestContext`] into a [`Response`] over some wire. It also advertises a
//! static [`Capabilities`] record so policies can feature-detect optional
//! behaviors (streaming, multipart, range requests) instead of assuming them.
//!
//! Connection lifecycle stays inside the transport. See
//! [`SessionTransport`](crate::session::SessionTransport) for lazily opened,
//! per-endpoint sessions.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::RelayResult;
use crate::policy::BoxFuture;
use crate::response::Response;

/// The seam between a pipeline and a concrete backend.
pub trait Transport: Send + Sync + 'static {
    /// Returns the transport name, used in logs.
    fn name(&self) -> &'static str {
        "transport"
    }

    /// Returns the optional behaviors this transport supports.
    fn capabilities(&self) -> &Capabilities;

    /// Performs one request.
    fn call<'a>(&'a self, ctx: RequestContext) -> BoxFuture<'a, RelayResult<Response>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn capabilities(&self) -> &Capabilities {
        (**self).capabilities()
    }

    fn call<'a>(&'a self, ctx: RequestContext) -> BoxFuture<'a, RelayResult<Response>> {
        (**self).call(ctx)
    }
}

/// Optional behaviors a transport supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// The transport can return bodies as incremental streams.
    pub streaming: bool,
    /// The transport encodes multipart descriptors natively.
    pub multipart_form_data: bool,
    /// The transport honours `Range` requests.
    pub range_requests: bool,
    /// Named flags for transport-specific behaviors.
    pub custom: BTreeSet<String>,
}

impl Capabilities {
    /// Creates an empty capability record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the streaming flag.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    /// Sets the multipart flag.
    pub fn with_multipart_form_data(mut self, enabled: bool) -> Self {
        self.multipart_form_data = enabled;
        self
    }

    /// Sets the range-requests flag.
    pub fn with_range_requests(mut self, enabled: bool) -> Self {
        self.range_requests = enabled;
        self
    }

    /// Adds a named custom flag.
    pub fn with_flag(mut self, name: impl Into<String>) -> Self {
        self.custom.insert(name.into());
        self
    }

    /// Checks a capability by name, covering both built-in and custom flags.
    ///
    /// Built-in names are `streaming`, `multipart_form_data` and
    /// `range_requests`.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        match name {
            "streaming" => self.streaming,
            "multipart_form_data" => self.multipart_form_data,
            "range_requests" => self.range_requests,
            other => self.custom.contains(other),
        }
    }
}

/// A transport backed by a closure.
///
/// Handy for custom connectors and tests.
///
/// # Example
///
/// ```
/// use relay_core::{FnTransport, Payload, Response};
/// use http::StatusCode;
///
/// let transport = FnTransport::new(|_ctx| {
///     Box::pin(async { Ok(Response::buffered(StatusCode::OK, Payload::from("pong"))) })
/// });
/// # let _ = transport;
/// ```
pub struct FnTransport {
    name: &'static str,
    capabilities: Capabilities,
    func: Box<dyn Fn(RequestContext) -> BoxFuture<'static, RelayResult<Response>> + Send + Sync>,
}

impl FnTransport {
    /// Creates a closure-backed transport with no capabilities.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(RequestContext) -> BoxFuture<'static, RelayResult<Response>> + Send + Sync + 'static,
    {
        Self {
            name: "fn",
            capabilities: Capabilities::default(),
            func: Box::new(func),
        }
    }

    /// Sets the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the transport name.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl Transport for FnTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn call<'a>(&'a self, ctx: RequestContext) -> BoxFuture<'a, RelayResult<Response>> {
        (self.func)(ctx)
    }
}

/// Returns `true` if `target` carries its own scheme (`scheme://...`).
#[must_use]
pub fn is_absolute_url(target: &str) -> bool {
    match target.find("://") {
        Some(idx) if idx > 0 => {
            let scheme = &target[..idx];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

/// Combines a base endpoint with a request target.
///
/// Absolute targets bypass the base. Relative targets are joined with exactly
/// one `/` between base and path. An empty target resolves to the base.
///
/// ```
/// use relay_core::resolve_url;
///
/// assert_eq!(resolve_url(Some("https://api.test/v1/"), "/users"), "https://api.test/v1/users");
/// assert_eq!(resolve_url(Some("https://api.test"), "https://other.test/x"), "https://other.test/x");
/// assert_eq!(resolve_url(None, "/users"), "/users");
/// ```
#[must_use]
pub fn resolve_url(base: Option<&str>, target: &str) -> String {
    if is_absolute_url(target) {
        return target.to_owned();
    }
    match base {
        None | Some("") => target.to_owned(),
        Some(base) => {
            let path = target.trim_start_matches('/');
            if path.is_empty() {
                return base.to_owned();
            }
            format!("{}/{}", base.trim_end_matches('/'), path)
        }
    }
}

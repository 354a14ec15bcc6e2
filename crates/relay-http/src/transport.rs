//! `reqwest`-backed HTTP transport.
//!
//! [`HttpTransport`] resolves relative URLs against an optional base URL,
//! encodes request bodies (multipart forms natively), marks time-to-first-byte
//! on the request's [`TimingMarker`] when headers arrive and abandons the
//! request as soon as the context's cancellation token fires.
//!
//! ## Example
//!
//! ```no_run
//! use relay_core::{Pipeline, RequestContext};
//! use relay_http::transport::HttpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> relay_core::RelayResult<()> {
//! let transport = HttpTransport::builder()
//!     .base_url("https://api.example.com/v1")
//!     .connect_timeout(Duration::from_secs(5))
//!     .build()?;
//! let pipeline = Pipeline::builder().transport(transport).build()?;
//!
//! let response = pipeline.execute(RequestContext::new("/users")?).await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use relay_core::{
    Body, BoxFuture, CancellationToken, Capabilities, Content, MultipartForm, Payload,
    RelayError, RelayResult, RequestContext, Response, TimeoutPhase, Transport,
};
use relay_policies::TimingMarker;

use crate::multipart::part_bytes;

/// Default `User-Agent`.
pub const DEFAULT_USER_AGENT: &str = concat!("relay/", env!("CARGO_PKG_VERSION"));

/// HTTP transport over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Option<String>,
    capabilities: Capabilities,
    connect_timeout: Option<Duration>,
}

impl HttpTransport {
    /// Creates a transport with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Network`] if the client cannot be initialized.
    pub fn new() -> RelayResult<Self> {
        Self::builder().build()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    /// Wraps an existing client. Streaming is enabled.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: None,
            capabilities: default_capabilities(true),
            connect_timeout: None,
        }
    }

    /// Sets the base URL relative request URLs are resolved against.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn map_error(&self, err: reqwest::Error) -> RelayError {
        if err.is_builder() {
            return RelayError::invalid_request(err.to_string());
        }
        if err.is_timeout() {
            if let Some(timeout) = self.connect_timeout {
                return RelayError::timeout(TimeoutPhase::Request, timeout);
            }
        }
        if err.is_decode() || err.is_body() {
            return RelayError::network_with_source("failed to read response body", err);
        }
        RelayError::network_with_source(describe(&err), err)
    }

    fn request(&self, ctx: &RequestContext) -> RelayResult<reqwest::RequestBuilder> {
        let url = relay_core::resolve_url(self.base_url.as_deref(), ctx.url());
        let url = reqwest::Url::parse(&url)
            .map_err(|e| RelayError::invalid_request(format!("invalid URL '{url}': {e}")))?;

        let mut headers = ctx.headers().clone();
        let builder = self.client.request(ctx.method().clone(), url);
        let builder = match ctx.body() {
            None | Some(Body::Empty) => builder,
            Some(Body::Text(text)) => {
                default_content_type(&mut headers, "text/plain; charset=utf-8");
                builder.body(text.clone())
            }
            Some(Body::Json(value)) => {
                default_content_type(&mut headers, "application/json");
                builder.body(serde_json::to_vec(value)?)
            }
            Some(Body::Bytes(bytes)) => builder.body(bytes.clone()),
            Some(Body::Form(fields)) => {
                default_content_type(&mut headers, "application/x-www-form-urlencoded");
                let encoded = serde_urlencoded::to_string(fields)
                    .map_err(|e| RelayError::serialization(e.to_string()))?;
                builder.body(encoded)
            }
            Some(Body::Multipart(form)) => {
                headers.remove(CONTENT_TYPE);
                builder.multipart(native_form(form)?)
            }
        };
        Ok(builder.headers(headers))
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_connect() {
        "connection failed".to_owned()
    } else if err.is_redirect() {
        "redirect loop".to_owned()
    } else if err.is_timeout() {
        "request timed out".to_owned()
    } else {
        "request failed".to_owned()
    }
}

fn default_content_type(headers: &mut HeaderMap, value: &'static str) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
    }
}

fn native_form(form: &MultipartForm) -> RelayResult<reqwest::multipart::Form> {
    form.parts().iter().try_fold(reqwest::multipart::Form::new(), |out, part| {
        let mut native = reqwest::multipart::Part::bytes(part_bytes(part)?.to_vec());
        if let Some(filename) = &part.filename {
            native = native.file_name(filename.clone());
        }
        if let Some(content_type) = &part.content_type {
            native = native.mime_str(content_type).map_err(|e| {
                RelayError::validation(format!("Invalid MIME type for part '{}': {e}", part.name))
            })?;
        }
        Ok(out.part(part.name.clone(), native))
    })
}

const fn default_capabilities(streaming: bool) -> Capabilities {
    Capabilities {
        streaming,
        multipart_form_data: true,
        range_requests: true,
        custom: std::collections::BTreeSet::new(),
    }
}

/// Races `fut` against the token, if any.
async fn cancellable<F, T>(token: Option<&CancellationToken>, fut: F) -> RelayResult<T>
where
    F: std::future::Future<Output = RelayResult<T>>,
{
    match token {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => Err(RelayError::Cancelled),
            result = fut => result,
        },
        None => fut.await,
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn call<'a>(&'a self, ctx: RequestContext) -> BoxFuture<'a, RelayResult<Response>> {
        Box::pin(async move {
            let token = ctx.cancellation().cloned();
            let request = self.request(&ctx)?;
            tracing::trace!(method = %ctx.method(), url = ctx.url(), "sending request");

            let response = cancellable(token.as_ref(), async {
                request.send().await.map_err(|e| self.map_error(e))
            })
            .await?;
            if let Some(marker) = ctx.extension::<TimingMarker>() {
                marker.mark_ttfb();
            }

            let status = response.status();
            let headers = response.headers().clone();
            let data = if self.capabilities.streaming {
                body_stream(response, token)
            } else {
                let bytes = cancellable(token.as_ref(), async {
                    response.bytes().await.map_err(|e| self.map_error(e))
                })
                .await?;
                Content::Buffered(if bytes.is_empty() {
                    Payload::Empty
                } else {
                    Payload::Bytes(bytes)
                })
            };

            let mut out = Response::new(status, data);
            out.headers = headers;
            Ok(out)
        })
    }
}

/// Streams the body, ending with [`RelayError::Cancelled`] if the token fires
/// mid-download.
fn body_stream(response: reqwest::Response, token: Option<CancellationToken>) -> Content {
    let chunks = response.bytes_stream().map(|chunk| {
        chunk.map_err(|e| RelayError::network_with_source("failed to read response body", e))
    });
    let Some(token) = token else {
        return Content::stream(chunks);
    };

    let state = (Box::pin(chunks), token, false);
    Content::stream(stream::unfold(state, |(mut chunks, token, done)| async move {
        if done {
            return None;
        }
        tokio::select! {
            biased;
            () = token.cancelled() => Some((Err(RelayError::Cancelled), (chunks, token, true))),
            item = chunks.next() => item.map(|item: RelayResult<Bytes>| (item, (chunks, token, false))),
        }
    }))
}

/// Builder for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    base_url: Option<String>,
    user_agent: String,
    connect_timeout: Option<Duration>,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: Option<usize>,
    streaming: bool,
    default_headers: HeaderMap,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout: None,
            pool_idle_timeout: None,
            pool_max_idle_per_host: None,
            streaming: true,
            default_headers: HeaderMap::new(),
        }
    }
}

impl HttpTransportBuilder {
    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the `User-Agent`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Bounds connection establishment.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Closes pooled connections idle for longer than `timeout`.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Caps idle pooled connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = Some(max);
        self
    }

    /// Returns bodies as streams (`true`, the default) or buffers them in the
    /// transport.
    pub fn streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    /// Sends `headers` with every request.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// Builds the transport.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Network`] if the client cannot be initialized.
    pub fn build(self) -> RelayResult<HttpTransport> {
        let mut client = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .default_headers(self.default_headers);
        if let Some(timeout) = self.connect_timeout {
            client = client.connect_timeout(timeout);
        }
        if let Some(timeout) = self.pool_idle_timeout {
            client = client.pool_idle_timeout(timeout);
        }
        if let Some(max) = self.pool_max_idle_per_host {
            client = client.pool_max_idle_per_host(max);
        }
        let client = client
            .build()
            .map_err(|e| RelayError::network_with_source("failed to build HTTP client", e))?;

        Ok(HttpTransport {
            client,
            base_url: self.base_url,
            capabilities: default_capabilities(self.streaming),
            connect_timeout: self.connect_timeout,
        })
    }
}

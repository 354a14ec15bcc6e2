//! Scripted mock transport.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::{HeaderMap, Method};
use parking_lot::Mutex;
use relay_core::{
    Body, BoxFuture, Capabilities, RelayError, RelayResult, RequestContext, Response, Transport,
};

use crate::response::MockResponse;

/// One scripted outcome.
#[derive(Debug)]
pub enum MockReply {
    /// Respond with the given response.
    Respond(MockResponse),
    /// Fail with the given error.
    Fail(RelayError),
}

impl From<MockResponse> for MockReply {
    fn from(value: MockResponse) -> Self {
        Self::Respond(value)
    }
}

impl From<RelayError> for MockReply {
    fn from(value: RelayError) -> Self {
        Self::Fail(value)
    }
}

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Request method.
    pub method: Method,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Body>,
}

impl RecordedCall {
    /// Returns a header as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

type Hook = Arc<dyn Fn(&RequestContext) + Send + Sync>;

/// A transport that replays scripted replies and records every call.
///
/// Replies are consumed in order; once the script is exhausted the fallback
/// response (by default `200 OK` with an empty body) is returned.
///
/// # Example
///
/// ```
/// use relay_core::{Pipeline, RelayError, RequestContext};
/// use relay_test::{MockResponse, MockTransport};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let mock = Arc::new(
///     MockTransport::new()
///         .reply(RelayError::network("reset"))
///         .reply(MockResponse::ok().text("done")),
/// );
/// let pipeline = Pipeline::builder().transport(Arc::clone(&mock)).build().unwrap();
///
/// assert!(pipeline.execute(RequestContext::new("/a").unwrap()).await.is_err());
/// assert!(pipeline.execute(RequestContext::new("/a").unwrap()).await.unwrap().ok());
/// assert_eq!(mock.call_count(), 2);
/// # });
/// ```
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: MockResponse,
    calls: Mutex<Vec<RecordedCall>>,
    capabilities: Capabilities,
    hook: Option<Hook>,
    body_dropped: Arc<AtomicBool>,
}

impl MockTransport {
    /// Creates a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: MockResponse::ok(),
            calls: Mutex::new(Vec::new()),
            capabilities: Capabilities::default(),
            hook: None,
            body_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Appends a reply to the script.
    #[must_use]
    pub fn reply(self, reply: impl Into<MockReply>) -> Self {
        self.replies.lock().push_back(reply.into());
        self
    }

    /// Appends a reply to the script of a shared transport.
    pub fn push_reply(&self, reply: impl Into<MockReply>) {
        self.replies.lock().push_back(reply.into());
    }

    /// Sets the response returned once the script is exhausted.
    #[must_use]
    pub fn fallback(mut self, response: MockResponse) -> Self {
        self.fallback = response;
        self
    }

    /// Sets the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Runs `hook` with the context of every call, before the reply is
    /// produced. Useful for reaching context extensions such as timing
    /// markers.
    #[must_use]
    pub fn on_call<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RequestContext) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the most recent call.
    #[must_use]
    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().last().cloned()
    }

    /// Returns `true` once any streamed body produced by this transport has
    /// been dropped.
    #[must_use]
    pub fn body_dropped(&self) -> bool {
        self.body_dropped.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("pending_replies", &self.replies.lock().len())
            .field("calls", &self.call_count())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn call<'a>(&'a self, ctx: RequestContext) -> BoxFuture<'a, RelayResult<Response>> {
        Box::pin(async move {
            self.calls.lock().push(RecordedCall {
                method: ctx.method().clone(),
                url: ctx.url().to_owned(),
                headers: ctx.headers().clone(),
                body: ctx.body().cloned(),
            });
            if let Some(hook) = &self.hook {
                hook(&ctx);
            }

            let reply = self.replies.lock().pop_front();
            let response = match reply {
                Some(MockReply::Fail(err)) => return Err(err),
                Some(MockReply::Respond(response)) => response,
                None => self.fallback.clone(),
            };
            if let Some(delay) = response.header_delay() {
                tokio::time::sleep(delay).await;
            }
            Ok(response.build(&self.body_dropped))
        })
    }
}

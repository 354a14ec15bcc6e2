//! Session-holding transports ("bring your own connector").
//!
//! Some backends need a connection or login before they can serve requests
//! (an IMAP session, a pooled database handle). A [`Connector`] describes how
//! to open such a session and how to run a request over it;
//! [`SessionTransport`] opens one session lazily per base endpoint on first
//! use, reuses it afterwards and closes everything on
//! [`SessionTransport::disconnect_all`]. Policies never see any of this.
//!
//! Each endpoint has its own slot, so a slow connect only holds up requests
//! to that endpoint. A session whose request fails with a network error is
//! closed and forgotten; the next request to the endpoint reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::context::RequestContext;
use crate::error::RelayResult;
use crate::policy::BoxFuture;
use crate::response::Response;
use crate::transport::{resolve_url, Capabilities, Transport};

/// Opens sessions and performs requests over them.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// An open session.
    type Session: Send + Sync + 'static;

    /// Returns the capabilities requests over this connector support.
    fn capabilities(&self) -> &Capabilities;

    /// Opens a session to `endpoint` (scheme and authority).
    async fn connect(&self, endpoint: &str) -> RelayResult<Self::Session>;

    /// Performs a request over an open session. `ctx.url()` is absolute.
    async fn request(&self, session: &Self::Session, ctx: RequestContext) -> RelayResult<Response>;

    /// Closes a session.
    async fn disconnect(&self, _session: &Self::Session) -> RelayResult<()> {
        Ok(())
    }
}

/// A transport that keeps one lazily opened session per endpoint.
pub struct SessionTransport<C: Connector> {
    connector: C,
    base_url: Option<String>,
    sessions: Mutex<HashMap<String, Slot<C::Session>>>,
}

/// A session being opened or already open.
type Slot<S> = Arc<OnceCell<Arc<S>>>;

impl<C: Connector> SessionTransport<C> {
    /// Creates a transport with no base URL.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            base_url: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the base endpoint relative URLs are resolved against.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Returns the connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Returns the number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Closes and forgets every open session.
    ///
    /// Failures to disconnect are logged; the session is dropped regardless.
    /// Returns the number of sessions that were open.
    pub async fn disconnect_all(&self) -> usize {
        let drained: Vec<_> = self
            .sessions
            .lock()
            .drain()
            .filter_map(|(endpoint, slot)| slot.get().cloned().map(|session| (endpoint, session)))
            .collect();
        let count = drained.len();
        for (endpoint, session) in drained {
            if let Err(e) = self.connector.disconnect(&session).await {
                tracing::warn!(endpoint = %endpoint, error = %e, "failed to disconnect session");
            }
        }
        count
    }

    async fn session_for(&self, endpoint: &str) -> RelayResult<Arc<C::Session>> {
        let slot = Arc::clone(self.sessions.lock().entry(endpoint.to_owned()).or_default());
        let session = slot
            .get_or_try_init(|| async {
                tracing::debug!(endpoint = %endpoint, "opening session");
                self.connector.connect(endpoint).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(session))
    }

    /// Forgets `session` if it is still the one open for `endpoint`.
    async fn evict(&self, endpoint: &str, session: &Arc<C::Session>) {
        let removed = {
            let mut sessions = self.sessions.lock();
            let current = sessions
                .get(endpoint)
                .and_then(|slot| slot.get())
                .is_some_and(|open| Arc::ptr_eq(open, session));
            if current {
                sessions.remove(endpoint);
            }
            current
        };
        if removed {
            tracing::debug!(endpoint = %endpoint, "dropping failed session");
            if let Err(e) = self.connector.disconnect(session).await {
                tracing::warn!(endpoint = %endpoint, error = %e, "failed to disconnect session");
            }
        }
    }
}

impl<C: Connector> Transport for SessionTransport<C> {
    fn name(&self) -> &'static str {
        "session"
    }

    fn capabilities(&self) -> &Capabilities {
        self.connector.capabilities()
    }

    fn call<'a>(&'a self, ctx: RequestContext) -> BoxFuture<'a, RelayResult<Response>> {
        Box::pin(async move {
            let url = resolve_url(self.base_url.as_deref(), ctx.url());
            let endpoint = endpoint_of(&url);
            let session = self.session_for(&endpoint).await?;
            let ctx = ctx.with_url(url)?;
            let result = self.connector.request(&session, ctx).await;
            if matches!(&result, Err(e) if e.is_network()) {
                self.evict(&endpoint, &session).await;
            }
            result
        })
    }
}

/// Returns the `scheme://authority` prefix of a URL, or the URL itself when
/// it has no scheme.
#[must_use]
pub fn endpoint_of(url: &str) -> String {
    match url.find("://") {
        Some(idx) => {
            let rest = &url[idx + 3..];
            let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
            url[..idx + 3 + end].to_owned()
        }
        None => url.to_owned(),
    }
}

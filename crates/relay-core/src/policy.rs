//! Policy trait and continuation.
//!
//! A [`Policy`] wraps the rest of the chain. It receives the request context
//! and a [`Next`] continuation, and may:
//!
//! - pass a (possibly new) context onward with `next.run(ctx)`,
//! - short-circuit by returning a response without calling `next`,
//! - intercept or transform the error `next` returns.
//!
//! Work done before awaiting `next` happens in declaration order; work done
//! after it happens in reverse order (the onion model).
//!
//! # Example
//!
//! ```
//! use relay_core::{BoxFuture, Next, Policy, RelayResult, RequestContext, Response};
//!
//! struct AddTenant;
//!
//! impl Policy for AddTenant {
//!     fn name(&self) -> &'static str {
//!         "add-tenant"
//!     }
//!
//!     fn handle<'a>(
//!         &'a self,
//!         ctx: RequestContext,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, RelayResult<Response>> {
//!         Box::pin(async move {
//!             let ctx = ctx.with_header("x-tenant", "acme")?;
//!             next.run(ctx).await
//!         })
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

use crate::context::RequestContext;
use crate::error::{RelayError, RelayResult};
use crate::response::Response;
use crate::transport::{Capabilities, Transport};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased policy that can be stored in a list.
pub type SharedPolicy = Arc<dyn Policy>;

/// The core policy trait.
///
/// # Invariants
///
/// - A policy calls `next.run()` at most once per attempt. Policies that
///   re-enter the chain (retry) clone `next` explicitly for each attempt.
/// - A policy does not suppress errors it does not understand.
pub trait Policy: Send + Sync + 'static {
    /// Returns the name of this policy, used for logging and introspection.
    fn name(&self) -> &'static str;

    /// Returns structured introspection metadata.
    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Custom)
    }

    /// Handles one request.
    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>>;
}

/// What kind of behavior a policy implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// A composition of other policies.
    Compose,
    /// A two-way conditional branch.
    Either,
    /// A multi-way conditional branch.
    Match,
    /// Timing instrumentation.
    Timing,
    /// Retry with delay policies.
    Retry,
    /// Phase timeouts.
    Timeout,
    /// Response caching.
    Cache,
    /// Header or credential injection.
    Headers,
    /// Request body serialization or response parsing.
    Body,
    /// Request and response logging.
    Logging,
    /// Anything else.
    Custom,
}

/// Introspection metadata for a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyMeta {
    /// Policy name.
    pub name: &'static str,
    /// Policy kind.
    pub kind: PolicyKind,
    /// Metadata of wrapped policies, in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PolicyMeta>,
}

impl PolicyMeta {
    /// Creates metadata for a leaf policy.
    #[must_use]
    pub const fn new(name: &'static str, kind: PolicyKind) -> Self {
        Self {
            name,
            kind,
            children: Vec::new(),
        }
    }

    /// Adds child metadata.
    pub fn with_children(mut self, children: Vec<PolicyMeta>) -> Self {
        self.children = children;
        self
    }
}

/// The rest of the chain, as seen by one policy.
///
/// Calling [`Next::run`] consumes the continuation. Cloning it is cheap and
/// is how a policy re-enters the chain more than once.
#[derive(Clone)]
pub struct Next<'a> {
    policies: &'a [SharedPolicy],
    terminal: Terminal<'a>,
}

#[derive(Clone, Copy)]
enum Terminal<'a> {
    /// End of the pipeline: call the transport.
    Transport(&'a dyn Transport),
    /// End of a nested composition: resume the enclosing chain.
    Continue(&'a Next<'a>),
}

impl<'a> Next<'a> {
    /// Creates a continuation that runs `policies` and then the transport.
    pub fn new(policies: &'a [SharedPolicy], transport: &'a dyn Transport) -> Self {
        Self {
            policies,
            terminal: Terminal::Transport(transport),
        }
    }

    /// Creates a continuation that runs `policies` and then resumes `outer`.
    pub fn nested(policies: &'a [SharedPolicy], outer: &'a Next<'a>) -> Self {
        Self {
            policies,
            terminal: Terminal::Continue(outer),
        }
    }

    /// Returns the capabilities of the transport at the end of the chain.
    #[must_use]
    pub fn capabilities(&self) -> &'a Capabilities {
        match self.terminal {
            Terminal::Transport(transport) => transport.capabilities(),
            Terminal::Continue(outer) => outer.capabilities(),
        }
    }

    /// Runs the rest of the chain.
    ///
    /// If the context carries a cancellation token, the continuation is raced
    /// against it; once the token fires, the in-flight future is dropped and
    /// [`RelayError::Cancelled`] is returned.
    pub fn run(self, ctx: RequestContext) -> BoxFuture<'a, RelayResult<Response>> {
        Box::pin(async move {
            match ctx.cancellation().cloned() {
                Some(token) => {
                    if token.is_cancelled() {
                        return Err(RelayError::Cancelled);
                    }
                    // Inner hops observe the token first, so suspended
                    // policies see the error innermost first.
                    let fut = self.dispatch(ctx);
                    tokio::select! {
                        biased;
                        result = fut => result,
                        () = token.cancelled() => Err(RelayError::Cancelled),
                    }
                }
                None => self.dispatch(ctx).await,
            }
        })
    }

    fn dispatch(self, ctx: RequestContext) -> BoxFuture<'a, RelayResult<Response>> {
        match self.policies.split_first() {
            Some((head, rest)) => head.handle(
                ctx,
                Next {
                    policies: rest,
                    terminal: self.terminal,
                },
            ),
            None => match self.terminal {
                Terminal::Transport(transport) => transport.call(ctx),
                Terminal::Continue(outer) => outer.clone().run(ctx),
            },
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.policies.iter().map(|p| p.name()).collect();
        f.debug_struct("Next")
            .field("policies", &names)
            .field(
                "terminal",
                &match self.terminal {
                    Terminal::Transport(t) => t.name(),
                    Terminal::Continue(_) => "continue",
                },
            )
            .finish()
    }
}

/// A policy defined by a closure.
///
/// # Example
///
/// ```
/// use relay_core::FnPolicy;
///
/// let policy = FnPolicy::new("passthrough", |ctx, next| next.run(ctx));
/// # let _ = policy;
/// ```
pub struct FnPolicy<F> {
    name: &'static str,
    func: F,
}

impl<F> FnPolicy<F>
where
    F: for<'a> Fn(RequestContext, Next<'a>) -> BoxFuture<'a, RelayResult<Response>>
        + Send
        + Sync
        + 'static,
{
    /// Creates a function-based policy.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Policy for FnPolicy<F>
where
    F: for<'a> Fn(RequestContext, Next<'a>) -> BoxFuture<'a, RelayResult<Response>>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        (self.func)(ctx, next)
    }
}

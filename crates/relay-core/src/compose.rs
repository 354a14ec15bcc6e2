//! Policy composition.
//!
//! - [`compose`] chains policies into a single [`Composed`] policy.
//! - [`either`] picks one of two policies from a predicate over the context.
//! - [`match_policy`] picks the first policy whose predicate matches.
//!
//! All three produce ordinary policies, so compositions nest freely.
//!
//! # Example
//!
//! ```
//! use relay_core::{compose, either, FnPolicy, SharedPolicy};
//! use std::sync::Arc;
//!
//! let noop: SharedPolicy = Arc::new(FnPolicy::new("noop", |ctx, next| next.run(ctx)));
//! let only_post: SharedPolicy = Arc::new(either(
//!     |ctx| ctx.method() == http::Method::POST,
//!     Arc::clone(&noop),
//!     None,
//! ));
//!
//! // `None` entries are skipped, so conditional wiring stays flat.
//! let chain = compose([Some(noop), None, Some(only_post)]);
//! assert_eq!(chain.names(), vec!["noop", "either"]);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::RelayResult;
use crate::policy::{BoxFuture, Next, Policy, PolicyKind, PolicyMeta, SharedPolicy};
use crate::response::Response;

/// A predicate over the request context.
pub type Predicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Chains policies so that `policies[0]` runs first and the last one calls
/// the enclosing continuation.
///
/// Entries may be `Option`s; `None` is skipped. An empty composition passes
/// the context straight through.
pub fn compose<I, P>(policies: I) -> Composed
where
    I: IntoIterator<Item = P>,
    P: Into<Option<SharedPolicy>>,
{
    Composed {
        policies: policies.into_iter().filter_map(Into::into).collect(),
    }
}

/// A sequence of policies acting as one.
#[derive(Clone, Default)]
pub struct Composed {
    policies: Vec<SharedPolicy>,
}

impl Composed {
    /// Returns the number of composed policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` if nothing was composed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Returns the composed policy names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Returns the composed policies.
    #[must_use]
    pub fn policies(&self) -> &[SharedPolicy] {
        &self.policies
    }
}

impl fmt::Debug for Composed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composed")
            .field("policies", &self.names())
            .finish()
    }
}

impl Policy for Composed {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Compose)
            .with_children(self.policies.iter().map(|p| p.meta()).collect())
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        if self.policies.is_empty() {
            return next.run(ctx);
        }
        Box::pin(async move {
            let outer = next;
            Next::nested(&self.policies, &outer).run(ctx).await
        })
    }
}

/// Builds a two-way branch.
///
/// When `predicate` holds, `then` handles the request; otherwise `otherwise`
/// does, or the request passes through untouched when it is `None`.
pub fn either<F>(predicate: F, then: SharedPolicy, otherwise: Option<SharedPolicy>) -> Either
where
    F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
{
    Either {
        predicate: Arc::new(predicate),
        then,
        otherwise,
    }
}

/// A two-way conditional policy. See [`either`].
pub struct Either {
    predicate: Predicate,
    then: SharedPolicy,
    otherwise: Option<SharedPolicy>,
}

impl Policy for Either {
    fn name(&self) -> &'static str {
        "either"
    }

    fn meta(&self) -> PolicyMeta {
        let mut children = vec![self.then.meta()];
        children.extend(self.otherwise.as_ref().map(|p| p.meta()));
        PolicyMeta::new(self.name(), PolicyKind::Either).with_children(children)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        if (self.predicate)(&ctx) {
            self.then.handle(ctx, next)
        } else {
            match &self.otherwise {
                Some(policy) => policy.handle(ctx, next),
                None => next.run(ctx),
            }
        }
    }
}

/// Builds a multi-way branch.
///
/// Cases are evaluated in order and the first matching predicate wins. With
/// no match, `default` handles the request, or it passes through untouched.
pub fn match_policy(cases: Vec<(Predicate, SharedPolicy)>, default: Option<SharedPolicy>) -> Match {
    Match { cases, default }
}

/// A multi-way conditional policy. See [`match_policy`].
pub struct Match {
    cases: Vec<(Predicate, SharedPolicy)>,
    default: Option<SharedPolicy>,
}

impl Match {
    /// Creates an empty match with no default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cases: Vec::new(),
            default: None,
        }
    }

    /// Appends a case.
    pub fn case<F>(mut self, predicate: F, policy: SharedPolicy) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        self.cases.push((Arc::new(predicate), policy));
        self
    }

    /// Sets the fallback policy.
    pub fn default_policy(mut self, policy: SharedPolicy) -> Self {
        self.default = Some(policy);
        self
    }
}

impl Default for Match {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for Match {
    fn name(&self) -> &'static str {
        "match"
    }

    fn meta(&self) -> PolicyMeta {
        let mut children: Vec<_> = self.cases.iter().map(|(_, p)| p.meta()).collect();
        children.extend(self.default.as_ref().map(|p| p.meta()));
        PolicyMeta::new(self.name(), PolicyKind::Match).with_children(children)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        let chosen = self
            .cases
            .iter()
            .find(|(predicate, _)| predicate(&ctx))
            .map(|(_, policy)| policy)
            .or(self.default.as_ref());
        match chosen {
            Some(policy) => policy.handle(ctx, next),
            None => next.run(ctx),
        }
    }
}

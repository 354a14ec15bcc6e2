//! Generic retry.
//!
//! [`Retry`] re-runs the rest of the chain while a [`RetryCondition`] says the
//! last outcome is worth retrying and the `tries` ceiling is not reached.
//! Between attempts it waits for the first delay any [`DelayPolicy`] yields;
//! with no delay policies, or when none yields a delay, it retries
//! immediately.
//!
//! Every attempt starts from a clone of the original context; only the
//! [`RetryState`] extension changes between attempts. Cancellation is never
//! retried, and sleeping between attempts stops as soon as the context's
//! cancellation token fires.
//!
//! # Example
//!
//! ```
//! use relay_policies::backoff::Backoff;
//! use relay_policies::retry::Retry;
//! use std::time::Duration;
//!
//! let retry = Retry::builder()
//!     .tries(4)
//!     .predicate(|outcome, _attempt| match outcome {
//!         Ok(res) => res.status.is_server_error(),
//!         Err(err) => err.is_retryable(),
//!     })
//!     .delay(Backoff::exponential(Duration::from_millis(100)).with_jitter(true))
//!     .build();
//! # let _ = retry;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    BoxFuture, Next, Policy, PolicyKind, PolicyMeta, RelayError, RelayResult, RequestContext,
    Response,
};

/// The result of one attempt, as seen by conditions and delay policies.
pub type Outcome<'r> = Result<&'r Response, &'r RelayError>;

/// Default attempt ceiling.
pub const DEFAULT_TRIES: u32 = 3;

/// Decides whether an attempt's outcome should be retried.
pub trait RetryCondition: Send + Sync + 'static {
    /// Returns `true` to retry after attempt number `attempt` (1-based).
    fn should_retry(&self, outcome: Outcome<'_>, attempt: u32) -> bool;
}

/// A [`RetryCondition`] backed by a closure.
pub struct FnCondition<F>(F);

impl<F> RetryCondition for FnCondition<F>
where
    F: Fn(Outcome<'_>, u32) -> bool + Send + Sync + 'static,
{
    fn should_retry(&self, outcome: Outcome<'_>, attempt: u32) -> bool {
        (self.0)(outcome, attempt)
    }
}

/// Retries errors for which [`RelayError::is_retryable`] holds and never
/// retries responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryableErrors;

impl RetryCondition for RetryableErrors {
    fn should_retry(&self, outcome: Outcome<'_>, _attempt: u32) -> bool {
        outcome.err().is_some_and(RelayError::is_retryable)
    }
}

/// Computes how long to wait before the next attempt.
///
/// Returning `None` defers to the next delay policy in the list.
pub trait DelayPolicy: Send + Sync + 'static {
    /// Returns the delay policy name, used in logs.
    fn name(&self) -> &'static str;

    /// Returns the delay after attempt number `attempt` (1-based).
    fn delay(&self, outcome: Outcome<'_>, attempt: u32) -> Option<Duration>;
}

/// The attempt currently in flight, stored in the context's extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

/// Policy that re-runs the rest of the chain on retryable outcomes.
#[derive(Clone)]
pub struct Retry {
    tries: u32,
    condition: Arc<dyn RetryCondition>,
    delays: Vec<Arc<dyn DelayPolicy>>,
}

impl Retry {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> RetryBuilder {
        RetryBuilder::default()
    }

    /// Returns the attempt ceiling.
    #[must_use]
    pub const fn tries(&self) -> u32 {
        self.tries
    }

    fn next_delay(&self, outcome: Outcome<'_>, attempt: u32) -> Option<Duration> {
        self.delays.iter().find_map(|policy| {
            let delay = policy.delay(outcome, attempt);
            if delay.is_some() {
                tracing::trace!(policy = policy.name(), ?delay, "delay selected");
            }
            delay
        })
    }
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("tries", &self.tries)
            .field(
                "delays",
                &self.delays.iter().map(|d| d.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Policy for Retry {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Retry)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        Box::pin(async move {
            let mut attempt = 1;
            loop {
                let attempt_ctx = ctx.clone().with_extension(RetryState { attempt });
                let result = next.clone().run(attempt_ctx).await;

                if matches!(result, Err(RelayError::Cancelled))
                    || attempt >= self.tries
                    || !self.condition.should_retry(result.as_ref(), attempt)
                {
                    return result;
                }

                let delay = self.next_delay(result.as_ref(), attempt);
                match &result {
                    Ok(res) => tracing::debug!(
                        url = ctx.url(),
                        attempt,
                        status = res.status.as_u16(),
                        ?delay,
                        "retrying response"
                    ),
                    Err(e) => tracing::debug!(
                        url = ctx.url(),
                        attempt,
                        error = %e,
                        ?delay,
                        "retrying error"
                    ),
                }
                drop(result);

                if let Some(delay) = delay {
                    sleep_unless_cancelled(&ctx, delay).await?;
                }
                attempt += 1;
            }
        })
    }
}

async fn sleep_unless_cancelled(ctx: &RequestContext, delay: Duration) -> RelayResult<()> {
    match ctx.cancellation() {
        Some(token) => tokio::select! {
            () = token.cancelled() => Err(RelayError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Builder for [`Retry`].
pub struct RetryBuilder {
    tries: u32,
    condition: Arc<dyn RetryCondition>,
    delays: Vec<Arc<dyn DelayPolicy>>,
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            condition: Arc::new(RetryableErrors),
            delays: Vec::new(),
        }
    }
}

impl RetryBuilder {
    /// Sets the maximum number of attempts, including the first. Values below
    /// 1 are treated as 1.
    pub fn tries(mut self, tries: u32) -> Self {
        self.tries = tries.max(1);
        self
    }

    /// Sets the retry condition.
    pub fn condition<C: RetryCondition>(mut self, condition: C) -> Self {
        self.condition = Arc::new(condition);
        self
    }

    /// Sets the retry condition from a closure over `(outcome, attempt)`.
    pub fn predicate<F>(self, predicate: F) -> Self
    where
        F: Fn(Outcome<'_>, u32) -> bool + Send + Sync + 'static,
    {
        self.condition(FnCondition(predicate))
    }

    /// Appends a delay policy. Earlier policies take precedence.
    pub fn delay<D: DelayPolicy>(mut self, delay: D) -> Self {
        self.delays.push(Arc::new(delay));
        self
    }

    /// Builds the policy.
    #[must_use]
    pub fn build(self) -> Retry {
        Retry {
            tries: self.tries,
            condition: self.condition,
            delays: self.delays,
        }
    }
}

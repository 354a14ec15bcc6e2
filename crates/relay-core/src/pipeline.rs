//! Pipelines: a policy list bound to a transport.
//!
//! A [`Pipeline`] owns its policies and its transport, and is the usual entry
//! point for callers. It is cheap to share (`Arc` inside) and safe to use from
//! many concurrent requests.
//!
//! # Example
//!
//! ```
//! use relay_core::{FnTransport, Payload, Pipeline, RequestContext, Response};
//! use http::StatusCode;
//!
//! # tokio_test::block_on(async {
//! let pipeline = Pipeline::builder()
//!     .transport(FnTransport::new(|_ctx| {
//!         Box::pin(async { Ok(Response::buffered(StatusCode::OK, Payload::from("hi"))) })
//!     }))
//!     .build()
//!     .unwrap();
//!
//! let res = pipeline.execute(RequestContext::new("/greet").unwrap()).await.unwrap();
//! assert!(res.ok());
//! # });
//! ```

use std::fmt;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{RelayError, RelayResult};
use crate::policy::{Next, Policy, PolicyMeta, SharedPolicy};
use crate::response::Response;
use crate::transport::{Capabilities, Transport};

/// A composed policy chain bound to a transport.
#[derive(Clone)]
pub struct Pipeline {
    policies: Arc<[SharedPolicy]>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs a request through every policy and the transport.
    pub async fn execute(&self, ctx: RequestContext) -> RelayResult<Response> {
        Next::new(&self.policies, self.transport.as_ref())
            .run(ctx)
            .await
    }

    /// Returns the policy names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Returns the number of policies.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.policies.len()
    }

    /// Returns structured metadata for every policy.
    #[must_use]
    pub fn describe(&self) -> Vec<PolicyMeta> {
        self.policies.iter().map(|p| p.meta()).collect()
    }

    /// Returns the transport's capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        self.transport.capabilities()
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.stage_names())
            .field("transport", &self.transport.name())
            .finish()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    policies: Vec<SharedPolicy>,
    transport: Option<Arc<dyn Transport>>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a policy.
    pub fn policy<P: Policy>(mut self, policy: P) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Appends an already shared policy.
    pub fn shared(mut self, policy: SharedPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Appends a policy if present.
    pub fn policy_opt(mut self, policy: Option<SharedPolicy>) -> Self {
        self.policies.extend(policy);
        self
    }

    /// Sets the transport.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets an already shared transport.
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if no transport was set.
    pub fn build(self) -> RelayResult<Pipeline> {
        let transport = self
            .transport
            .ok_or_else(|| RelayError::invalid_request("pipeline has no transport"))?;
        Ok(Pipeline {
            policies: self.policies.into(),
            transport,
        })
    }
}

//! Error types for Relay.
//!
//! This module provides the [`RelayError`] type, the single error type that
//! flows through the continuation chain. Policies and transports raise it;
//! policies that want to intercept errors (retry, cache revalidation) match
//! on its variants.
//!
//! # Taxonomy
//!
//! | Variant | Raised by |
//! |---|---|
//! | `Network` | transports, on I/O failure |
//! | `Timeout` | the timeout policy, tagged with the phase that expired |
//! | `Serialization` | body encoders/decoders and custom body readers |
//! | `NotAcceptable` | response parsing when `Accept` is not satisfied |
//! | `Cancelled` | any hop of the chain once the cancellation token fires |
//! | `InvalidRequest` | context construction and URL resolution |
//! | `Validation` | request validation (e.g. multipart MIME allow-lists) |
//! | `Unsupported` | policies that require a transport capability |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`RelayError`].
pub type RelayResult<T> = Result<T, RelayError>;

/// The phase of a request lifecycle a timeout applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPhase {
    /// Dispatch until response headers are available (connect + TTFB).
    Request,
    /// Download of the response body once headers are known.
    Body,
    /// Hard ceiling across the whole request.
    Total,
}

impl TimeoutPhase {
    /// Returns the phase name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Body => "body",
            Self::Total => "total",
        }
    }
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error type for Relay pipelines.
///
/// # Example
///
/// ```
/// use relay_core::{RelayError, TimeoutPhase};
/// use std::time::Duration;
///
/// let err = RelayError::timeout(TimeoutPhase::Body, Duration::from_millis(50));
/// assert!(err.is_timeout());
/// assert_eq!(err.timeout_ms(), Some(50));
/// ```
#[derive(Error, Debug)]
pub enum RelayError {
    /// Transport-level I/O failure.
    #[error("Network error: {message}")]
    Network {
        /// Human-readable error message.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A phase deadline expired.
    #[error("Timeout: {phase} phase exceeded {timeout_ms}ms")]
    Timeout {
        /// The phase whose deadline expired.
        phase: TimeoutPhase,
        /// The configured duration of that phase, in milliseconds.
        timeout_ms: u64,
    },

    /// Body encoding or decoding failed.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message.
        message: String,
    },

    /// The response content type does not satisfy the declared `Accept` list.
    #[error("Not acceptable: received '{content_type}', expected one of {accepted:?}")]
    NotAcceptable {
        /// The content type the server returned (empty when absent).
        content_type: String,
        /// The accepted media ranges.
        accepted: Vec<String>,
    },

    /// The request was cancelled through its cancellation token.
    #[error("Request cancelled")]
    Cancelled,

    /// The request could not be constructed or addressed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Human-readable error message.
        message: String,
    },

    /// A request field failed validation.
    #[error("{message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },

    /// The transport lacks a capability a policy requires.
    #[error("Unsupported: transport does not support {capability}")]
    Unsupported {
        /// Name of the missing capability.
        capability: String,
    },
}

impl RelayError {
    /// Creates a network error with a message.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a network error wrapping an underlying error.
    #[must_use]
    pub fn network_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network {
            message: message.into(),
            source: Some(anyhow::Error::new(source)),
        }
    }

    /// Creates a timeout error for the given phase and configured duration.
    #[must_use]
    pub fn timeout(phase: TimeoutPhase, duration: Duration) -> Self {
        Self::Timeout {
            phase,
            timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a not-acceptable error.
    #[must_use]
    pub fn not_acceptable(content_type: impl Into<String>, accepted: Vec<String>) -> Self {
        Self::NotAcceptable {
            content_type: content_type.into(),
            accepted,
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::Cancelled
    }

    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an unsupported-capability error.
    #[must_use]
    pub fn unsupported(capability: impl Into<String>) -> Self {
        Self::Unsupported {
            capability: capability.into(),
        }
    }

    /// Returns `true` for transport-level failures.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Returns `true` for phase timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the request was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for error kinds a retry can plausibly fix.
    ///
    /// Only network failures and timeouts qualify; cancellation, validation
    /// and decoding failures are deterministic.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Returns the timeout phase, if this is a timeout.
    #[must_use]
    pub const fn timeout_phase(&self) -> Option<TimeoutPhase> {
        match self {
            Self::Timeout { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Returns the configured timeout in milliseconds, if this is a timeout.
    #[must_use]
    pub const fn timeout_ms(&self) -> Option<u64> {
        match self {
            Self::Timeout { timeout_ms, .. } => Some(*timeout_ms),
            _ => None,
        }
    }

    /// Returns a stable, machine-readable kind name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Serialization { .. } => "serialization",
            Self::NotAcceptable { .. } => "not_acceptable",
            Self::Cancelled => "cancelled",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Validation { .. } => "validation",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_carries_phase_and_duration() {
        let err = RelayError::timeout(TimeoutPhase::Request, Duration::from_millis(250));
        assert_eq!(err.timeout_phase(), Some(TimeoutPhase::Request));
        assert_eq!(err.timeout_ms(), Some(250));
        assert_eq!(err.to_string(), "Timeout: request phase exceeded 250ms");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(RelayError::network("reset").is_retryable());
        assert!(RelayError::timeout(TimeoutPhase::Total, Duration::from_secs(1)).is_retryable());
        assert!(!RelayError::cancelled().is_retryable());
        assert!(!RelayError::serialization("bad json").is_retryable());
        assert!(!RelayError::validation("Invalid MIME type").is_retryable());
    }

    #[test]
    fn test_network_with_source_keeps_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let err = RelayError::network_with_source("read failed", io);
        assert!(err.is_network());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: RelayError = parse_err.into();
        assert_eq!(err.kind(), "serialization");
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = RelayError::validation("Invalid MIME type for part 'file'");
        assert_eq!(err.to_string(), "Invalid MIME type for part 'file'");
    }
}

//! Error types for SSE parsing.

use relay_core::RelayError;
use thiserror::Error;

/// Result type for SSE operations.
pub type SseResult<T> = Result<T, SseError>;

/// Errors that can occur while reading an event stream.
#[derive(Debug, Error)]
pub enum SseError {
    /// The underlying byte stream failed.
    #[error(transparent)]
    Source(#[from] RelayError),

    /// A single line grew past the configured limit.
    #[error("line exceeds {limit} bytes")]
    LineTooLong {
        /// The configured limit.
        limit: usize,
    },

    /// The data of one event grew past the configured limit.
    #[error("event data exceeds {limit} bytes")]
    EventTooLarge {
        /// The configured limit.
        limit: usize,
    },

    /// Event data could not be encoded or decoded as JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl SseError {
    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    /// Check if the error came from the byte stream rather than the parser.
    pub const fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }
}

impl From<SseError> for RelayError {
    fn from(err: SseError) -> Self {
        match err {
            SseError::Source(inner) => inner,
            other => Self::serialization(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_round_trips_into_relay_error() {
        let err = SseError::from(RelayError::network("reset"));
        assert!(err.is_source());
        let back: RelayError = err.into();
        assert!(back.is_network());
    }

    #[test]
    fn test_parser_errors_become_serialization() {
        let back: RelayError = SseError::LineTooLong { limit: 8 }.into();
        assert_eq!(back.kind(), "serialization");
        assert!(back.to_string().contains("line exceeds 8 bytes"));
    }
}

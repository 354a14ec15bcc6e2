//! Parser limits.

/// Default cap on a single line, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Default cap on the joined data of one event, in bytes.
pub const DEFAULT_MAX_EVENT_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for an SSE parser.
///
/// Limits bound memory use against a peer that never sends a line
/// terminator or a blank line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SseConfig {
    /// Longest accepted line, in bytes.
    pub max_line_length: usize,
    /// Largest accepted event data, in bytes.
    pub max_event_size: usize,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_event_size: DEFAULT_MAX_EVENT_SIZE,
        }
    }
}

impl SseConfig {
    /// Create a configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for configuration.
    pub fn builder() -> SseConfigBuilder {
        SseConfigBuilder::default()
    }

    /// Set the maximum line length.
    pub fn with_max_line_length(mut self, limit: usize) -> Self {
        self.max_line_length = limit;
        self
    }

    /// Set the maximum event size.
    pub fn with_max_event_size(mut self, limit: usize) -> Self {
        self.max_event_size = limit;
        self
    }
}

/// Builder for [`SseConfig`].
#[derive(Debug, Default)]
pub struct SseConfigBuilder {
    max_line_length: Option<usize>,
    max_event_size: Option<usize>,
}

impl SseConfigBuilder {
    /// Set the maximum line length.
    pub fn max_line_length(mut self, limit: usize) -> Self {
        self.max_line_length = Some(limit);
        self
    }

    /// Set the maximum event size.
    pub fn max_event_size(mut self, limit: usize) -> Self {
        self.max_event_size = Some(limit);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SseConfig {
        let mut config = SseConfig::default();
        if let Some(limit) = self.max_line_length {
            config.max_line_length = limit;
        }
        if let Some(limit) = self.max_event_size {
            config.max_event_size = limit;
        }
        config
    }
}

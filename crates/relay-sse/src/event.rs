//! SSE event type.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{SseError, SseResult};

/// A Server-Sent Event.
///
/// Only the fields a block actually carried are set:
/// - `event` - the event type; consumers treat `None` as `"message"`
/// - `data` - the payload, with multiple `data:` lines joined by `\n`
/// - `id` - the event ID
/// - `retry` - the reconnection hint, in whole milliseconds
///
/// # Example
///
/// ```
/// use relay_sse::SseEvent;
///
/// let event = SseEvent::new("Hello, World!")
///     .id("1")
///     .event("greeting");
///
/// assert_eq!(event.data(), "Hello, World!");
/// assert_eq!(event.id_value(), Some("1"));
/// assert_eq!(event.event_type(), Some("greeting"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    id: Option<String>,
    event: Option<String>,
    data: String,
    retry: Option<Duration>,
}

impl SseEvent {
    /// Create a new SSE event with the given data.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub(crate) fn from_parts(
        event: Option<String>,
        data: String,
        id: Option<String>,
        retry: Option<Duration>,
    ) -> Self {
        Self {
            id,
            event,
            data,
            retry,
        }
    }

    /// Create an SSE event from a JSON-serializable value.
    pub fn json<T: Serialize>(value: &T) -> SseResult<Self> {
        let data = serde_json::to_string(value).map_err(|e| SseError::serialization(e.to_string()))?;
        Ok(Self::new(data))
    }

    /// Set the event ID.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the event type.
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Set the retry interval.
    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Get the event ID.
    pub fn id_value(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Get the event type.
    pub fn event_type(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Get the event data.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Consume the event, returning its data.
    pub fn into_data(self) -> String {
        self.data
    }

    /// Get the retry interval.
    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry
    }

    /// Decode the data as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> SseResult<T> {
        serde_json::from_str(&self.data).map_err(|e| SseError::serialization(e.to_string()))
    }

    /// Format the event as an SSE text block.
    ///
    /// ```text
    /// id: <id>
    /// event: <event>
    /// data: <data line 1>
    /// data: <data line 2>
    /// retry: <ms>
    ///
    /// ```
    ///
    /// Parsing the output yields an equal event.
    pub fn to_sse_string(&self) -> String {
        let mut result = String::new();

        if let Some(id) = &self.id {
            push_field(&mut result, "id", id);
        }
        if let Some(event) = &self.event {
            push_field(&mut result, "event", event);
        }
        for line in self.data.split('\n') {
            push_field(&mut result, "data", line.strip_suffix('\r').unwrap_or(line));
        }
        if let Some(retry) = &self.retry {
            push_field(&mut result, "retry", &retry.as_millis().to_string());
        }

        result.push('\n');
        result
    }

    /// Convert to bytes for sending.
    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::from(self.to_sse_string())
    }
}

fn push_field(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

impl From<String> for SseEvent {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

impl From<&str> for SseEvent {
    fn from(data: &str) -> Self {
        Self::new(data)
    }
}

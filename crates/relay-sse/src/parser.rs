//! Push-based line parser.
//!
//! [`SseParser`] accepts arbitrary byte chunks and returns the events they
//! complete. Chunk boundaries may fall anywhere, including inside a CRLF pair
//! or a multi-byte UTF-8 sequence: bytes are held until a line terminator
//! arrives and only whole lines are decoded.
//!
//! ## Line rules
//!
//! | Line | Effect |
//! |------|--------|
//! | empty | dispatches the pending block if it carried a `data` line |
//! | `:...` | comment, ignored |
//! | `field: value` | one leading space after the colon is dropped |
//! | `field` | field with an empty value |
//! | `retry: <digits>` | reconnection hint in ms; anything else is ignored |
//! | unknown field | ignored |

use std::time::Duration;

use bytes::BytesMut;

use crate::config::SseConfig;
use crate::error::{SseError, SseResult};
use crate::event::SseEvent;

const BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Default)]
struct Pending {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
    retry: Option<Duration>,
}

/// Incremental SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    config: SseConfig,
    line: BytesMut,
    skip_lf: bool,
    started: bool,
    bom_matched: usize,
    pending: Pending,
    last_event_id: Option<String>,
    reconnection_time: Option<Duration>,
}

impl SseParser {
    /// Creates a parser with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser with the given limits.
    pub fn with_config(config: SseConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Returns the most recent `id` seen, dispatched or not.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Returns the most recent valid `retry` hint, including hints from
    /// blocks that carried no data.
    pub fn reconnection_time(&self) -> Option<Duration> {
        self.reconnection_time
    }

    /// Feeds one chunk, returning the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> SseResult<Vec<SseEvent>> {
        let mut rest = chunk;
        if rest.is_empty() {
            return Ok(Vec::new());
        }
        if self.skip_lf {
            self.skip_lf = false;
            if rest[0] == b'\n' {
                rest = &rest[1..];
            }
        }
        if !self.started {
            // The BOM may itself be split across chunks.
            while self.bom_matched < BOM.len() {
                match rest.first() {
                    None => return Ok(Vec::new()),
                    Some(&b) if b == BOM[self.bom_matched] => {
                        self.bom_matched += 1;
                        rest = &rest[1..];
                    }
                    Some(_) => {
                        self.extend_line(&BOM[..self.bom_matched])?;
                        break;
                    }
                }
            }
            self.started = true;
        }

        let mut events = Vec::new();
        while let Some(pos) = rest.iter().position(|b| matches!(b, b'\n' | b'\r')) {
            self.extend_line(&rest[..pos])?;
            let terminator = rest[pos];
            rest = &rest[pos + 1..];
            if terminator == b'\r' {
                match rest.first() {
                    Some(b'\n') => rest = &rest[1..],
                    Some(_) => {}
                    None => self.skip_lf = true,
                }
            }

            let line = self.line.split();
            if let Some(event) = self.process_line(&line)? {
                events.push(event);
            }
        }
        self.extend_line(rest)?;
        Ok(events)
    }

    /// Signals the end of input.
    ///
    /// A block still waiting for its blank line is discarded, as is an
    /// unterminated final line.
    pub fn finish(&mut self) {
        if !self.line.is_empty() || self.pending.data.is_some() {
            tracing::trace!(
                partial_line = self.line.len(),
                "discarding incomplete event at end of stream"
            );
        }
        self.line.clear();
        self.pending = Pending::default();
        self.skip_lf = false;
    }

    fn extend_line(&mut self, bytes: &[u8]) -> SseResult<()> {
        if self.line.len() + bytes.len() > self.config.max_line_length {
            return Err(SseError::LineTooLong {
                limit: self.config.max_line_length,
            });
        }
        self.line.extend_from_slice(bytes);
        Ok(())
    }

    fn process_line(&mut self, raw: &[u8]) -> SseResult<Option<SseEvent>> {
        if raw.is_empty() {
            return Ok(self.dispatch());
        }
        let line = String::from_utf8_lossy(raw);
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };
        match field {
            "data" => self.push_data(value)?,
            "event" => self.pending.event = Some(value.to_owned()),
            "id" => {
                if !value.contains('\0') {
                    self.pending.id = Some(value.to_owned());
                    self.last_event_id = Some(value.to_owned());
                }
            }
            "retry" => match parse_retry(value) {
                Some(retry) => {
                    self.pending.retry = Some(retry);
                    self.reconnection_time = Some(retry);
                }
                None => tracing::trace!(value, "ignoring invalid retry field"),
            },
            _ => tracing::trace!(field, "ignoring unknown field"),
        }
        Ok(None)
    }

    fn push_data(&mut self, value: &str) -> SseResult<()> {
        let limit = self.config.max_event_size;
        let needed = match &self.pending.data {
            Some(data) => data.len() + 1 + value.len(),
            None => value.len(),
        };
        if needed > limit {
            return Err(SseError::EventTooLarge { limit });
        }
        if let Some(data) = self.pending.data.as_mut() {
            data.push('\n');
            data.push_str(value);
            return Ok(());
        }
        self.pending.data = Some(value.to_owned());
        Ok(())
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let pending = std::mem::take(&mut self.pending);
        let data = pending.data?;
        Some(SseEvent::from_parts(pending.event, data, pending.id, pending.retry))
    }
}

fn parse_retry(value: &str) -> Option<Duration> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok().map(Duration::from_millis)
}

/// Parses a complete event stream held in memory.
///
/// # Example
///
/// ```
/// let events = relay_sse::parse_sse("retry: 1000\ndata: test\n\n").unwrap();
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].data(), "test");
/// assert_eq!(events[0].retry_interval(), Some(std::time::Duration::from_millis(1000)));
/// ```
pub fn parse_sse(input: &str) -> SseResult<Vec<SseEvent>> {
    let mut parser = SseParser::new();
    let events = parser.feed(input.as_bytes())?;
    parser.finish();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(chunks: &[&[u8]]) -> Vec<SseEvent> {
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.feed(chunk).unwrap());
        }
        parser.finish();
        events
    }

    #[test]
    fn test_retry_and_data() {
        let events = parse_sse("retry: 1000\ndata: test\n\n").unwrap();
        assert_eq!(
            events,
            vec![SseEvent::new("test").retry(Duration::from_millis(1000))]
        );
    }

    #[test]
    fn test_leading_blank_lines_produce_nothing() {
        let events = parse_sse("\n\ndata: hello\n\n").unwrap();
        assert_eq!(events, vec![SseEvent::new("hello")]);
    }

    #[test]
    fn test_block_without_data_is_discarded() {
        let events = parse_sse("event: ping\nid: 7\n\ndata: x\n\n").unwrap();
        assert_eq!(events, vec![SseEvent::new("x")]);
    }

    #[test]
    fn test_empty_data_line_dispatches_empty_event() {
        let events = parse_sse("data\n\n").unwrap();
        assert_eq!(events, vec![SseEvent::new("")]);
    }

    #[test]
    fn test_multiple_data_lines_join_with_newline() {
        let events = parse_sse("data: a\ndata:b\ndata:  c\n\n").unwrap();
        assert_eq!(events[0].data(), "a\nb\n c");
    }

    #[test]
    fn test_all_fields() {
        let events = parse_sse("event: update\nid: 42\ndata: {}\nretry: 250\n\n").unwrap();
        let event = &events[0];
        assert_eq!(event.event_type(), Some("update"));
        assert_eq!(event.id_value(), Some("42"));
        assert_eq!(event.data(), "{}");
        assert_eq!(event.retry_interval(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_retry_is_ignored() {
        for input in ["retry: soon\ndata: x\n\n", "retry: 10s\ndata: x\n\n", "retry: -5\ndata: x\n\n", "retry:\ndata: x\n\n"] {
            let events = parse_sse(input).unwrap();
            assert_eq!(events, vec![SseEvent::new("x")], "input {input:?}");
        }
    }

    #[test]
    fn test_comments_and_unknown_fields_ignored() {
        let events = parse_sse(": keep-alive\nfoo: bar\ndata: x\n:\n\n").unwrap();
        assert_eq!(events, vec![SseEvent::new("x")]);
    }

    #[test]
    fn test_line_endings() {
        let lf = parse_sse("data: a\n\ndata: b\n\n").unwrap();
        let crlf = parse_sse("data: a\r\n\r\ndata: b\r\n\r\n").unwrap();
        let cr = parse_sse("data: a\r\rdata: b\r\r").unwrap();
        assert_eq!(lf, crlf);
        assert_eq!(lf, cr);
        assert_eq!(lf.len(), 2);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let events = feed_all(&[b"data: a\r", b"\n\r", b"\ndata: b\r\n\r\n"]);
        assert_eq!(events, vec![SseEvent::new("a"), SseEvent::new("b")]);
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let bytes = "data: caf\u{e9} \u{1F600}\n\n".as_bytes();
        let split = bytes.len() - 4;
        let events = feed_all(&[&bytes[..split], &bytes[split..]]);
        assert_eq!(events[0].data(), "caf\u{e9} \u{1F600}");
    }

    #[test]
    fn test_byte_at_a_time() {
        let input = b"id: 1\nevent: e\ndata: one\ndata: two\n\n";
        let chunks: Vec<&[u8]> = input.chunks(1).collect();
        let events = feed_all(&chunks);
        assert_eq!(
            events,
            vec![SseEvent::new("one\ntwo").id("1").event("e")]
        );
    }

    #[test]
    fn test_incomplete_block_discarded_at_end() {
        assert!(parse_sse("data: partial\n").unwrap().is_empty());
        assert!(parse_sse("data: partial").unwrap().is_empty());
    }

    #[test]
    fn test_leading_bom_stripped() {
        let events = feed_all(&[b"\xEF\xBB\xBFdata: x\n\n"]);
        assert_eq!(events, vec![SseEvent::new("x")]);
    }

    #[test]
    fn test_bom_split_across_chunks_stripped() {
        let events = feed_all(&[b"\xEF", b"\xBB", b"\xBFdata: x\n\n"]);
        assert_eq!(events, vec![SseEvent::new("x")]);

        let events = feed_all(&[b"\xEF\xBB", b"", b"\xBF", b"data: y\n\n"]);
        assert_eq!(events, vec![SseEvent::new("y")]);
    }

    #[test]
    fn test_last_event_id_and_retry_persist() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"id: 9\nretry: 3000\n\n").unwrap();
        assert!(events.is_empty());
        assert_eq!(parser.last_event_id(), Some("9"));
        assert_eq!(parser.reconnection_time(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_line_limit() {
        let mut parser = SseParser::with_config(SseConfig::new().with_max_line_length(8));
        assert!(parser.feed(b"data: 12").is_ok());
        let err = parser.feed(b"3").unwrap_err();
        assert!(matches!(err, SseError::LineTooLong { limit: 8 }));
    }

    #[test]
    fn test_event_size_limit() {
        let mut parser = SseParser::with_config(SseConfig::new().with_max_event_size(5));
        let err = parser.feed(b"data: abc\ndata: def\n").unwrap_err();
        assert!(matches!(err, SseError::EventTooLarge { limit: 5 }));
    }

    #[test]
    fn test_to_sse_string_parses_back() {
        let event = SseEvent::new("multi\nline")
            .id("3")
            .event("x")
            .retry(Duration::from_millis(10));
        assert_eq!(parse_sse(&event.to_sse_string()).unwrap(), vec![event]);
    }
}

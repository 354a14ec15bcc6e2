//! Lazy event stream over response bytes.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::FusedStream;
use futures_util::Stream;
use relay_core::{ByteStream, Content, RelayResult, Response};

use crate::config::SseConfig;
use crate::error::{SseError, SseResult};
use crate::event::SseEvent;
use crate::parser::SseParser;

/// A forward-only stream of events parsed from a byte stream.
///
/// Bytes are pulled from the source only when the consumer asks for the next
/// event. The stream ends after the source ends or after the first error; it
/// cannot be restarted.
pub struct SseStream<S> {
    source: Option<S>,
    parser: SseParser,
    ready: VecDeque<SseEvent>,
}

impl<S> SseStream<S>
where
    S: Stream<Item = RelayResult<Bytes>> + Unpin,
{
    /// Wraps a byte stream with default limits.
    pub fn new(source: S) -> Self {
        Self::with_config(source, SseConfig::default())
    }

    /// Wraps a byte stream with the given limits.
    pub fn with_config(source: S, config: SseConfig) -> Self {
        Self {
            source: Some(source),
            parser: SseParser::with_config(config),
            ready: VecDeque::new(),
        }
    }

    /// Returns the most recent event ID seen so far.
    pub fn last_event_id(&self) -> Option<&str> {
        self.parser.last_event_id()
    }

    /// Returns the most recent `retry` hint seen so far.
    pub fn reconnection_time(&self) -> Option<Duration> {
        self.parser.reconnection_time()
    }
}

impl SseStream<ByteStream> {
    /// Parses a response body, buffered or streamed.
    pub fn from_content(content: Content) -> SseResult<Self> {
        Ok(Self::new(content.into_stream()?))
    }

    /// Parses the body of a response.
    pub fn from_response(response: Response) -> SseResult<Self> {
        Self::from_content(response.data)
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = RelayResult<Bytes>> + Unpin,
{
    type Item = SseResult<SseEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            let Some(source) = this.source.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(Pin::new(source).poll_next(cx)) {
                Some(Ok(chunk)) => match this.parser.feed(&chunk) {
                    Ok(events) => this.ready.extend(events),
                    Err(e) => {
                        this.source = None;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    this.source = None;
                    return Poll::Ready(Some(Err(SseError::from(e))));
                }
                None => {
                    this.parser.finish();
                    this.source = None;
                }
            }
        }
    }
}

impl<S> FusedStream for SseStream<S>
where
    S: Stream<Item = RelayResult<Bytes>> + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.source.is_none() && self.ready.is_empty()
    }
}

impl<S> std::fmt::Debug for SseStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseStream")
            .field("exhausted", &self.source.is_none())
            .field("queued", &self.ready.len())
            .field("last_event_id", &self.parser.last_event_id())
            .finish()
    }
}

/// Parses a response body as an event stream.
///
/// # Example
///
/// ```
/// use futures_util::StreamExt;
/// use relay_core::{Content, Payload};
///
/// # tokio_test::block_on(async {
/// let body = Content::Buffered(Payload::Text("data: hi\n\n".into()));
/// let mut events = relay_sse::events(body).unwrap();
/// assert_eq!(events.next().await.unwrap().unwrap().data(), "hi");
/// assert!(events.next().await.is_none());
/// # });
/// ```
pub fn events(content: Content) -> SseResult<SseStream<ByteStream>> {
    SseStream::from_content(content)
}

//! Parsing event streams delivered through a pipeline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use proptest::prelude::*;
use relay_core::{Pipeline, RelayError, RequestContext};
use relay_sse::{events, parse_sse, SseEvent, SseParser};
use relay_test::{MockBody, MockResponse, MockTransport};

fn pipeline(mock: &Arc<MockTransport>) -> Pipeline {
    Pipeline::builder()
        .transport(Arc::clone(mock))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_streamed_response_yields_events_in_order() {
    let mock = Arc::new(MockTransport::new().reply(
        MockResponse::ok()
            .header("content-type", "text/event-stream")
            .chunks([
                ": hello\nretry: 1500\n\nevent: tick\nda",
                "ta: 1\nid: a\n\ndata: {\"n\":",
                "2}\r\n\r\n",
            ]),
    ));

    let response = pipeline(&mock)
        .execute(RequestContext::new("/events").unwrap())
        .await
        .unwrap();
    let mut stream = events(response.data).unwrap();

    let tick = stream.next().await.unwrap().unwrap();
    assert_eq!(tick, SseEvent::new("1").event("tick").id("a"));
    assert_eq!(stream.reconnection_time(), Some(Duration::from_millis(1500)));

    let json = stream.next().await.unwrap().unwrap();
    assert_eq!(json.parse_json::<serde_json::Value>().unwrap()["n"], 2);

    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_body_error_surfaces_after_complete_events() {
    let mock = Arc::new(MockTransport::new().reply(MockResponse::ok().body(
        MockBody::ChunksThenError(vec![Bytes::from_static(b"data: ok\n\ndata: cut")], "reset".into()),
    )));

    let response = pipeline(&mock)
        .execute(RequestContext::new("/events").unwrap())
        .await
        .unwrap();
    let collected: Vec<_> = events(response.data).unwrap().collect().await;

    assert_eq!(collected.len(), 2);
    assert_eq!(collected[0].as_ref().unwrap().data(), "ok");
    let err: RelayError = collected.into_iter().nth(1).unwrap().unwrap_err().into();
    assert!(err.is_network());
}

#[tokio::test]
async fn test_buffered_body_parses_too() {
    let mock = Arc::new(MockTransport::new().reply(MockResponse::ok().text("data: one\n\ndata: two\n\n")));
    let response = pipeline(&mock)
        .execute(RequestContext::new("/events").unwrap())
        .await
        .unwrap();

    let data: Vec<String> = events(response.data)
        .unwrap()
        .map(|e| e.unwrap().into_data())
        .collect()
        .await;
    assert_eq!(data, vec!["one", "two"]);
}

#[tokio::test]
async fn test_dropping_the_stream_releases_the_body() {
    let mock = Arc::new(MockTransport::new().reply(MockResponse::ok().stalled_body()));
    let response = pipeline(&mock)
        .execute(RequestContext::new("/events").unwrap())
        .await
        .unwrap();
    let stream = events(response.data).unwrap();
    assert!(!mock.body_dropped());
    drop(stream);
    assert!(mock.body_dropped());
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_events(split in 0usize..64) {
        let input = "id: 1\r\nevent: e\r\ndata: caf\u{e9}\r\ndata: \u{1F600}\r\n\r\n: c\ndata: z\n\n";
        let bytes = input.as_bytes();
        let split = split.min(bytes.len());

        let mut parser = SseParser::new();
        let mut chunked = parser.feed(&bytes[..split]).unwrap();
        chunked.extend(parser.feed(&bytes[split..]).unwrap());

        prop_assert_eq!(chunked, parse_sse(input).unwrap());
    }
}

//! `HttpTransport` against a local mock server.

use std::time::Duration;

use futures_util::StreamExt;
use http::Method;
use relay_core::{CancellationToken, Pipeline, RelayError, RequestContext, Transport};
use relay_http::HttpTransport;
use relay_policies::{Timing, TimingInfo};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::builder().base_url(server.uri()).build().unwrap()
}

#[tokio::test]
async fn test_get_resolves_against_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/1"))
        .and(query_param("expand", "owner"))
        .and(header("x-trace", "t-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .set_body_string("item"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let ctx = RequestContext::new("/items/1?expand=owner")
        .unwrap()
        .with_header("x-trace", "t-1")
        .unwrap();
    let res = transport(&server).await.call(ctx).await.unwrap();

    assert!(res.ok());
    assert_eq!(res.header_str("etag"), Some("\"v1\""));
    assert_eq!(&res.data.into_bytes().await.unwrap()[..], b"item");
}

#[tokio::test]
async fn test_json_body_sets_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"name": "widget"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = RequestContext::with_method_and_url(Method::POST, "/items")
        .unwrap()
        .with_body(json!({"name": "widget"}));
    let res = transport(&server).await.call(ctx).await.unwrap();
    assert_eq!(res.status.as_u16(), 201);
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&server)
        .await;

    let res = transport(&server)
        .await
        .call(RequestContext::new("/nope").unwrap())
        .await
        .unwrap();
    assert_eq!(res.status.as_u16(), 404);
    assert!(!res.ok());
}

#[tokio::test]
async fn test_body_streams_in_chunks() {
    let server = MockServer::start().await;
    let payload = "x".repeat(64 * 1024);
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(payload.clone()))
        .mount(&server)
        .await;

    let res = transport(&server)
        .await
        .call(RequestContext::new("/big").unwrap())
        .await
        .unwrap();
    let mut stream = res.data.into_stream().unwrap();
    let mut total = 0;
    while let Some(chunk) = stream.next().await {
        total += chunk.unwrap().len();
    }
    assert_eq!(total, payload.len());
}

#[tokio::test]
async fn test_buffered_mode_reads_whole_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("whole"))
        .mount(&server)
        .await;

    let transport = HttpTransport::builder()
        .base_url(server.uri())
        .streaming(false)
        .build()
        .unwrap();
    let res = transport.call(RequestContext::new("/").unwrap()).await.unwrap();
    assert!(!res.data.is_stream());
    assert_eq!(&res.data.into_bytes().await.unwrap()[..], b"whole");
}

#[tokio::test]
async fn test_timing_marks_first_byte() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(40))
                .set_body_string("slow"),
        )
        .mount(&server)
        .await;

    let pipeline = Pipeline::builder()
        .policy(Timing::builder().include_in_default_header().build().unwrap())
        .transport(transport(&server).await)
        .build()
        .unwrap();
    let res = pipeline
        .execute(RequestContext::new("/timed").unwrap())
        .await
        .unwrap();

    let info = res.extension::<TimingInfo>().unwrap();
    assert!(info.ttfb >= Duration::from_millis(40));
    assert!(info.total >= info.ttfb);
    assert!(res.header_str("x-response-timing").is_some());
}

#[tokio::test]
async fn test_cancellation_aborts_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let ctx = RequestContext::new("/hang")
        .unwrap()
        .with_cancellation(token.clone());
    let transport = transport(&server).await;

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let err = transport.call(ctx).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, RelayError::Cancelled));
}

#[tokio::test]
async fn test_connection_failure_is_network_error() {
    let transport = HttpTransport::new().unwrap();
    let err = transport
        .call(RequestContext::new("http://127.0.0.1:1/").unwrap())
        .await
        .unwrap_err();
    assert!(err.is_network());
    assert!(err.to_string().starts_with("Network error:"));
}

#[tokio::test]
async fn test_relative_url_without_base_is_invalid() {
    let transport = HttpTransport::new().unwrap();
    let err = transport
        .call(RequestContext::new("/relative").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
}

//! Integration tests for retry and timing policies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use http::StatusCode;
use relay_core::{
    CancellationToken, Content, FnTransport, Pipeline, RelayError, RequestContext, Response,
};
use relay_policies::{
    Backoff, Retry, RetryState, StreamTiming, Timing, TimingInfo, TimingMarker,
};
use support::Captured;
use relay_test::{MockResponse, MockTransport};

/// Minimal capture cell for callback assertions.
mod support {
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    pub struct Captured<T>(Arc<Mutex<Vec<T>>>);

    impl<T> Default for Captured<T> {
        fn default() -> Self {
            Self(Arc::default())
        }
    }

    impl<T: Clone> Captured<T> {
        pub fn push(&self, value: T) {
            self.0.lock().unwrap().push(value);
        }

        pub fn all(&self) -> Vec<T> {
            self.0.lock().unwrap().clone()
        }
    }
}

fn ctx() -> RequestContext {
    RequestContext::new("/resource").unwrap()
}

#[tokio::test]
async fn test_retry_succeeds_on_third_attempt() {
    let mock = Arc::new(
        MockTransport::new()
            .reply(RelayError::network("reset"))
            .reply(RelayError::network("reset"))
            .reply(MockResponse::ok().text("finally")),
    );
    let pipeline = Pipeline::builder()
        .policy(Retry::builder().tries(3).build())
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    let res = pipeline.execute(ctx()).await.unwrap();
    assert!(res.ok());
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn test_retry_exhausted_returns_last_failure() {
    let mock = Arc::new(
        MockTransport::new()
            .reply(RelayError::network("first"))
            .reply(RelayError::network("second"))
            .reply(MockResponse::ok()),
    );
    let pipeline = Pipeline::builder()
        .policy(Retry::builder().tries(2).build())
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    let err = pipeline.execute(ctx()).await.unwrap_err();
    assert_eq!(err.to_string(), "Network error: second");
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn test_retry_on_response_predicate() {
    let mock = Arc::new(
        MockTransport::new()
            .reply(MockResponse::status(503))
            .reply(MockResponse::status(200)),
    );
    let pipeline = Pipeline::builder()
        .policy(
            Retry::builder()
                .predicate(|outcome, _| outcome.is_ok_and(|res| res.status.as_u16() == 503))
                .build(),
        )
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    let res = pipeline.execute(ctx()).await.unwrap();
    assert_eq!(res.status.as_u16(), 200);
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn test_each_attempt_sees_original_context() {
    let attempts = Captured::<(u32, Option<String>)>::default();
    let seen = attempts.clone();
    let mock = Arc::new(
        MockTransport::new()
            .reply(RelayError::network("x"))
            .reply(RelayError::network("x"))
            .on_call(move |ctx| {
                let state = ctx.extension::<RetryState>().map_or(0, |s| s.attempt);
                seen.push((state, ctx.header_str("x-trace").map(str::to_owned)));
            }),
    );
    let pipeline = Pipeline::builder()
        .policy(Retry::builder().tries(5).build())
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    let original = ctx().with_header("x-trace", "t1").unwrap();
    pipeline.execute(original).await.unwrap();

    assert_eq!(
        attempts.all(),
        vec![
            (1, Some("t1".to_owned())),
            (2, Some("t1".to_owned())),
            (3, Some("t1".to_owned())),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_for_backoff() {
    let mock = Arc::new(
        MockTransport::new()
            .reply(RelayError::network("x"))
            .reply(MockResponse::ok()),
    );
    let pipeline = Pipeline::builder()
        .policy(
            Retry::builder()
                .delay(Backoff::fixed(Duration::from_secs(2)))
                .build(),
        )
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    pipeline.execute(ctx()).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_retrying() {
    let mock = Arc::new(
        MockTransport::new()
            .reply(RelayError::network("x"))
            .reply(MockResponse::ok()),
    );
    let pipeline = Pipeline::builder()
        .policy(
            Retry::builder()
                .delay(Backoff::fixed(Duration::from_secs(60)))
                .build(),
        )
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = pipeline
        .execute(ctx().with_cancellation(token))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timing_splits_ttfb_and_download() {
    let infos = Captured::<TimingInfo>::default();
    let sink = infos.clone();
    let mock = Arc::new(
        MockTransport::new()
            .reply(MockResponse::ok().delay(Duration::from_millis(30)))
            .on_call(|ctx| {
                if let Some(marker) = ctx.extension::<TimingMarker>() {
                    marker.mark_ttfb();
                }
            }),
    );
    let timing = Timing::builder()
        .on_timing(move |info, _| sink.push(info.clone()))
        .include_in_default_header()
        .build()
        .unwrap();
    let pipeline = Pipeline::builder()
        .policy(timing)
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    let res = pipeline.execute(ctx()).await.unwrap();

    let recorded = infos.all();
    assert_eq!(recorded.len(), 1);
    let info = &recorded[0];
    assert_eq!(info.ttfb + info.download, info.total);
    assert_eq!(info.ttfb, Duration::ZERO);
    assert_eq!(info.download, Duration::from_millis(30));
    assert_eq!(res.extension::<TimingInfo>(), Some(info));

    let header: serde_json::Value =
        serde_json::from_str(res.header_str("x-response-timing").unwrap()).unwrap();
    let total = header["total"].as_f64().unwrap();
    assert!((total - 30.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_timing_without_mark_has_zero_ttfb() {
    let infos = Captured::<TimingInfo>::default();
    let sink = infos.clone();
    let pipeline = Pipeline::builder()
        .policy(
            Timing::builder()
                .on_timing(move |info, _| sink.push(info.clone()))
                .build()
                .unwrap(),
        )
        .transport(MockTransport::new().reply(MockResponse::ok().delay(Duration::from_millis(15))))
        .build()
        .unwrap();

    pipeline.execute(ctx()).await.unwrap();
    let info = &infos.all()[0];
    assert_eq!(info.ttfb, Duration::ZERO);
    assert_eq!(info.download, info.total);
    assert_eq!(info.total, Duration::from_millis(15));
}

#[tokio::test]
async fn test_timing_fires_once_on_failure_and_rethrows() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let pipeline = Pipeline::builder()
        .policy(
            Timing::builder()
                .on_timing(move |_, ctx| {
                    assert_eq!(ctx.url(), "/resource");
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .build()
                .unwrap(),
        )
        .transport(MockTransport::new().reply(RelayError::network("boom")))
        .build()
        .unwrap();

    let err = pipeline.execute(ctx()).await.unwrap_err();
    assert_eq!(err.to_string(), "Network error: boom");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Marks TTFB after 20ms, then delivers one chunk 500ms later.
fn slow_body_transport() -> FnTransport {
    FnTransport::new(|ctx| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(marker) = ctx.extension::<TimingMarker>() {
                marker.mark_ttfb();
            }
            let body = stream::once(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Bytes::from_static(b"late"))
            });
            Ok(Response::new(StatusCode::OK, Content::stream(body)))
        })
    })
}

#[tokio::test(start_paused = true)]
async fn test_timing_covers_streamed_body() {
    let infos = Captured::<TimingInfo>::default();
    let sink = infos.clone();
    let pipeline = Pipeline::builder()
        .policy(
            Timing::builder()
                .on_timing(move |info, _| sink.push(info.clone()))
                .build()
                .unwrap(),
        )
        .transport(slow_body_transport())
        .build()
        .unwrap();

    let res = pipeline.execute(ctx()).await.unwrap();
    assert!(infos.all().is_empty());
    let slot = res.extension::<StreamTiming>().unwrap().clone();
    assert!(slot.get().is_none());

    let body = res.data.into_bytes().await.unwrap();
    assert_eq!(body, Bytes::from_static(b"late"));

    let recorded = infos.all();
    assert_eq!(recorded.len(), 1);
    let info = &recorded[0];
    assert_eq!(info.ttfb, Duration::from_millis(20));
    assert_eq!(info.download, Duration::from_millis(500));
    assert_eq!(info.total, Duration::from_millis(520));
    assert_eq!(slot.get(), Some(info));
}

#[tokio::test(start_paused = true)]
async fn test_timing_header_buffers_streamed_body() {
    let pipeline = Pipeline::builder()
        .policy(Timing::builder().include_in_default_header().build().unwrap())
        .transport(slow_body_transport())
        .build()
        .unwrap();

    let res = pipeline.execute(ctx()).await.unwrap();
    assert!(!res.data.is_stream());

    let info = res.extension::<TimingInfo>().unwrap();
    assert_eq!(info.download, Duration::from_millis(500));
    let header: serde_json::Value =
        serde_json::from_str(res.header_str("x-response-timing").unwrap()).unwrap();
    assert!((header["total"].as_f64().unwrap() - 520.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_timing_fires_once_when_stream_dropped() {
    let infos = Captured::<TimingInfo>::default();
    let sink = infos.clone();
    let pipeline = Pipeline::builder()
        .policy(
            Timing::builder()
                .on_timing(move |info, _| sink.push(info.clone()))
                .build()
                .unwrap(),
        )
        .transport(slow_body_transport())
        .build()
        .unwrap();

    let res = pipeline.execute(ctx()).await.unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    drop(res);

    let recorded = infos.all();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].ttfb, Duration::from_millis(20));
    assert_eq!(recorded[0].total, Duration::from_millis(120));
}

//! Prometheus metrics for Relay.
//!
//! [`TimingRecorder`] turns the [`TimingInfo`] reported by the timing policy
//! into `metrics` observations. It records into whatever recorder is
//! installed; [`init_metrics`] installs the Prometheus one.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `relay_requests_total` | Counter | `method`, `host` | Completed requests, successful or not |
//! | `relay_request_duration_seconds` | Histogram | `method`, `host` | Total request time |
//! | `relay_ttfb_seconds` | Histogram | `method`, `host` | Time to first byte |
//! | `relay_download_seconds` | Histogram | `method`, `host` | Response headers until completion |
//! | `relay_phase_seconds` | Histogram | `phase` | DNS, TCP and TLS phases, when reported |
//!
//! # Example
//!
//! ```rust
//! use relay_policies::Timing;
//! use relay_telemetry::TimingRecorder;
//!
//! let timing = Timing::builder()
//!     .on_timing_shared(TimingRecorder::new().into_callback())
//!     .build()
//!     .unwrap();
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use relay_core::RequestContext;
use relay_policies::{TimingCallback, TimingInfo};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Counter of completed requests.
pub const REQUESTS_TOTAL: &str = "relay_requests_total";
/// Histogram of total request time.
pub const REQUEST_DURATION: &str = "relay_request_duration_seconds";
/// Histogram of time to first byte.
pub const TTFB: &str = "relay_ttfb_seconds";
/// Histogram of body download time.
pub const DOWNLOAD: &str = "relay_download_seconds";
/// Histogram of connection phases.
pub const PHASE: &str = "relay_phase_seconds";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Histogram buckets, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Handle for rendering the installed Prometheus recorder.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Wraps a handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Builds a Prometheus exporter with Relay's histogram buckets.
///
/// # Errors
///
/// Returns [`TelemetryError::MetricsInit`] if the buckets are empty.
pub fn prometheus_builder(config: &MetricsConfig) -> TelemetryResult<PrometheusBuilder> {
    let mut builder = PrometheusBuilder::new();
    for name in [REQUEST_DURATION, TTFB, DOWNLOAD, PHASE] {
        builder = builder
            .set_buckets_for_metric(Matcher::Full(name.to_string()), &config.duration_buckets)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }
    Ok(builder)
}

/// Installs the global Prometheus recorder.
///
/// Returns `None` when metrics are disabled. Serving the rendered text is
/// left to the application, via [`MetricsRegistry::render`].
///
/// # Errors
///
/// Returns [`TelemetryError::MetricsInit`] if the buckets are empty or a
/// recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    if !config.enabled {
        return Ok(None);
    }

    let recorder = prometheus_builder(config)?.build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle.clone());

    register_metric_descriptions();
    tracing::debug!("metrics recorder installed");
    Ok(Some(MetricsRegistry::new(handle)))
}

/// Renders the global recorder, if installed.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers descriptions for the standard metrics.
pub fn register_metric_descriptions() {
    describe_counter!(REQUESTS_TOTAL, "Total number of requests completed by a pipeline");
    describe_histogram!(
        REQUEST_DURATION,
        metrics::Unit::Seconds,
        "Request duration from dispatch to completion"
    );
    describe_histogram!(TTFB, metrics::Unit::Seconds, "Time to first byte");
    describe_histogram!(
        DOWNLOAD,
        metrics::Unit::Seconds,
        "Time from response headers to completion"
    );
    describe_histogram!(
        PHASE,
        metrics::Unit::Seconds,
        "Connection phase durations reported by the transport"
    );
}

/// Records one request's timing.
pub fn record_timing(info: &TimingInfo, method: &str, host: &str) {
    let labels = [("method", method.to_string()), ("host", host.to_string())];

    counter!(REQUESTS_TOTAL, &labels).increment(1);
    histogram!(REQUEST_DURATION, &labels).record(info.total.as_secs_f64());
    histogram!(TTFB, &labels).record(info.ttfb.as_secs_f64());
    histogram!(DOWNLOAD, &labels).record(info.download.as_secs_f64());

    for (phase, duration) in [("dns", info.dns), ("tcp", info.tcp), ("tls", info.tls)] {
        if let Some(duration) = duration {
            record_phase(phase, duration);
        }
    }
}

fn record_phase(phase: &'static str, duration: Duration) {
    histogram!(PHASE, "phase" => phase).record(duration.as_secs_f64());
}

/// Extracts the host label from a request URL.
///
/// Relative URLs, which a transport resolves against its base, report
/// `"relative"`.
pub fn host_label(url: &str) -> String {
    url.parse::<http::Uri>()
        .ok()
        .and_then(|uri| uri.host().map(str::to_owned))
        .unwrap_or_else(|| "relative".to_string())
}

/// Records [`TimingInfo`] as metrics; usable as a timing callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingRecorder {
    _private: (),
}

impl TimingRecorder {
    /// Creates a recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one request.
    pub fn record(&self, info: &TimingInfo, ctx: &RequestContext) {
        record_timing(info, ctx.method().as_str(), &host_label(ctx.url()));
    }

    /// Converts the recorder into a timing callback.
    #[must_use]
    pub fn into_callback(self) -> TimingCallback {
        Arc::new(move |info: &TimingInfo, ctx: &RequestContext| self.record(info, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.duration_buckets.len(), 12);
    }

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).unwrap().is_none());
    }

    #[test]
    fn test_empty_buckets_rejected() {
        let config = MetricsConfig {
            duration_buckets: Vec::new(),
            ..MetricsConfig::default()
        };
        assert!(matches!(
            prometheus_builder(&config),
            Err(TelemetryError::MetricsInit(_))
        ));
    }

    #[test]
    fn test_host_label() {
        assert_eq!(host_label("https://api.test:8443/items?x=1"), "api.test");
        assert_eq!(host_label("/items"), "relative");
    }
}

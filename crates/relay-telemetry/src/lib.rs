//! Logging and metrics for Relay pipelines.
//!
//! Relay's crates emit `tracing` events and leave subscriber installation to
//! the application. This crate provides:
//!
//! - **Logging**: a `tracing-subscriber` registry with an `EnvFilter` and
//!   JSON, pretty or compact output
//! - **Metrics**: a Prometheus recorder and [`TimingRecorder`], which turns
//!   the timing policy's reports into histograms and counters
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_policies::Timing;
//! use relay_telemetry::{init_telemetry, TelemetryConfig, TimingRecorder};
//!
//! let telemetry = init_telemetry(&TelemetryConfig::default()).unwrap();
//!
//! let timing = Timing::builder()
//!     .on_timing_shared(TimingRecorder::new().into_callback())
//!     .build()
//!     .unwrap();
//!
//! // ... run requests ...
//!
//! if let Some(metrics) = telemetry.metrics() {
//!     println!("{}", metrics.render());
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/relay-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, record_timing, MetricsConfig, MetricsRegistry, TimingRecorder};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Handles to the installed telemetry subsystems.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    metrics: Option<MetricsRegistry>,
}

impl Telemetry {
    /// Returns the metrics registry, if metrics were enabled.
    #[must_use]
    pub fn metrics(&self) -> Option<&MetricsRegistry> {
        self.metrics.as_ref()
    }
}

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns [`TelemetryError`] if either subsystem fails to install.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<Telemetry> {
    init_logging(&config.logging)?;
    let metrics = init_metrics(&config.metrics)?;
    Ok(Telemetry { metrics })
}

//! Typed configuration for Relay pipelines.
//!
//! This crate loads a [`RelayConfig`] from layered sources and turns it into
//! policies, a transport and a log configuration:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict parsing (unknown fields are errors)
//! - Layered loading (defaults → file → env)
//!
//! # Sections
//!
//! | Section | Type | Builds |
//! |---------|------|--------|
//! | `timeouts` | [`TimeoutsConfig`] | [`relay_policies::TimeoutConfig`] |
//! | `retry` | [`RetryConfig`] | [`relay_http::HttpRetry`] |
//! | `cache` | [`CacheConfig`] | [`relay_http::ConditionalCache`] |
//! | `transport` | [`TransportConfig`] | [`relay_http::HttpTransport`] |
//! | `logging` | [`relay_telemetry::LogConfig`] | passed to `init_logging` |
//!
//! # Example
//!
//! ```no_run
//! use relay_config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("relay.toml")?
//!     .with_env_prefix("RELAY")
//!     .load()?;
//!
//! relay_telemetry::init_logging(&config.log_config())?;
//! let pipeline = config.build_pipeline()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [timeouts]
//! request_ms = 5000
//! body_ms = 30000
//!
//! [retry]
//! tries = 3
//! statuses = [429, 503]
//! idempotent_only = true
//!
//! [retry.backoff]
//! initial_ms = 200
//! jitter = true
//!
//! [cache]
//! enabled = true
//! validators = "conditional"
//! ttl_ms = 300000
//!
//! [transport]
//! base_url = "https://api.example.com"
//! connect_timeout_ms = 2000
//!
//! [logging]
//! level = "info,relay_http=debug"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `RELAY__RETRY__TRIES=5`
//! - `RELAY__RETRY__STATUSES=429,503`
//! - `RELAY__TIMEOUTS__BODY_MS=none`
//! - `RELAY__LOGGING__FORMAT=pretty`

#![doc(html_root_url = "https://docs.rs/relay-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{RelayConfig, RelayConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    BackoffConfig, CacheConfig, CacheValidators, RetryConfig, TimeoutsConfig, TransportConfig,
};

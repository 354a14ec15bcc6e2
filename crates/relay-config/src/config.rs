//! Top-level configuration.
//!
//! [`RelayConfig`] groups the sections and assembles them into a
//! [`PipelineBuilder`].

use std::sync::Arc;

use relay_core::{Pipeline, PipelineBuilder, SharedPolicy};
use relay_policies::{Timeout, TimeoutConfig};
use relay_telemetry::LogConfig;
use serde::{Deserialize, Serialize};

use crate::{CacheConfig, ConfigError, RetryConfig, TimeoutsConfig, TransportConfig};

/// Complete Relay configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use relay_config::RelayConfig;
///
/// let config = RelayConfig::default();
/// assert_eq!(config.retry.tries, 3);
/// assert!(!config.cache.enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Phase timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Conditional cache policy.
    #[serde(default)]
    pub cache: CacheConfig,

    /// HTTP transport.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Log subscriber.
    #[serde(default)]
    pub logging: LogConfig,
}

impl RelayConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeouts.validate()?;
        self.retry.validate()?;
        self.cache.validate()?;
        self.transport.validate()?;
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid_value("logging.level", "must not be empty"));
        }
        Ok(())
    }

    /// Creates a development preset: human-readable debug logs, short
    /// timeouts and a single retry.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging = LogConfig::development();
        config.retry.tries = 2;
        config.timeouts.request_ms = Some(10_000);
        config
    }

    /// Creates a production preset: JSON logs, bounded phases and caching.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging = LogConfig::production();
        config.timeouts = TimeoutsConfig {
            request_ms: Some(30_000),
            body_ms: Some(60_000),
            total_ms: Some(120_000),
        };
        config.retry.backoff.jitter = true;
        config.cache.enabled = true;
        config
    }

    /// Returns the phase timeouts.
    #[must_use]
    pub fn timeout_config(&self) -> TimeoutConfig {
        self.timeouts.to_timeout_config()
    }

    /// Returns the logging configuration.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        self.logging.clone()
    }

    /// Builds the configured policies, outermost first: cache, retry,
    /// timeout. Each retry attempt gets its own deadlines. Disabled or
    /// unbounded sections contribute nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Build`] if a policy rejects its settings.
    pub fn policies(&self) -> Result<Vec<SharedPolicy>, ConfigError> {
        let mut policies: Vec<SharedPolicy> = Vec::new();
        if let Some(cache) = self.cache.to_policy()? {
            policies.push(Arc::new(cache));
        }
        if let Some(retry) = self.retry.to_policy() {
            policies.push(Arc::new(retry));
        }
        let timeouts = self.timeout_config();
        if !timeouts.is_unbounded() {
            policies.push(Arc::new(Timeout::new(timeouts)));
        }
        Ok(policies)
    }

    /// Returns a pipeline builder holding the configured policies, without a
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Build`] if a policy rejects its settings.
    pub fn pipeline_builder(&self) -> Result<PipelineBuilder, ConfigError> {
        Ok(self
            .policies()?
            .into_iter()
            .fold(Pipeline::builder(), PipelineBuilder::shared))
    }

    /// Builds a pipeline with the configured policies and the HTTP
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Build`] if a policy or the transport cannot be
    /// built.
    pub fn build_pipeline(&self) -> Result<Pipeline, ConfigError> {
        let transport = self.transport.to_transport()?;
        Ok(self.pipeline_builder()?.transport(transport).build()?)
    }
}

/// Builder for [`RelayConfig`].
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    timeouts: Option<TimeoutsConfig>,
    retry: Option<RetryConfig>,
    cache: Option<CacheConfig>,
    transport: Option<TransportConfig>,
    logging: Option<LogConfig>,
}

impl RelayConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeouts section.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutsConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the retry section.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the cache section.
    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the transport section.
    #[must_use]
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the logging section.
    #[must_use]
    pub fn logging(mut self, logging: LogConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds the configuration. Unset sections use their defaults.
    #[must_use]
    pub fn build(self) -> RelayConfig {
        RelayConfig {
            timeouts: self.timeouts.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
            transport: self.transport.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
        }
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<RelayConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

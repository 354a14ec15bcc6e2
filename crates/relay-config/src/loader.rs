//! Layered configuration loading.
//!
//! [`ConfigLoader`] applies, in order: defaults (or a preset), one TOML or
//! JSON document, then `PREFIX__SECTION__KEY` environment overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use relay_telemetry::LogFormat;

use crate::{CacheValidators, ConfigError, RelayConfig};

/// Configuration loader with layered sources.
///
/// Later layers override earlier ones:
/// 1. Default values or a preset
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables
///
/// A file replaces the preset wholesale; sections and keys it leaves out take
/// their default values.
///
/// # Example
///
/// ```no_run
/// use relay_config::ConfigLoader;
///
/// # fn main() -> Result<(), relay_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("relay.toml")?
///     .with_env_prefix("RELAY")
///     .load()?;
/// let pipeline = config.build_pipeline()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: RelayConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Creates a loader starting from default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = RelayConfig::default();
        self
    }

    /// Starts from the development preset.
    ///
    /// ```
    /// use relay_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = RelayConfig::development();
        self
    }

    /// Starts from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = RelayConfig::production();
        self
    }

    /// Loads a configuration file. The format follows the extension
    /// (`.toml` or `.json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or unreadable, is not
    /// valid TOML/JSON, or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        self.config = Self::parse_file(&content, path)?;
        tracing::debug!(path = %path.display(), "loaded configuration file");

        Ok(self)
    }

    /// Loads a configuration file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration from a string in the given format (`"toml"` or
    /// `"json"`).
    ///
    /// ```
    /// use relay_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [retry]
    ///     tries = 5
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.retry.tries, 5);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unknown.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Sets the prefix for environment overrides.
    ///
    /// Variables use the form `PREFIX__SECTION__KEY`, e.g.
    /// `RELAY__RETRY__TRIES=5` or `RELAY__RETRY__BACKOFF__JITTER=true`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Loads a `.env` file into the process environment, if one exists.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        self
    }

    /// Applies environment overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or the final
    /// configuration is invalid.
    pub fn load(mut self) -> Result<RelayConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without applying environment overrides or
    /// validating.
    #[must_use]
    pub fn load_unvalidated(self) -> RelayConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<RelayConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(path) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = path.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["TIMEOUTS", "REQUEST_MS"] => config.timeouts.request_ms = parse_optional(key, value)?,
            ["TIMEOUTS", "BODY_MS"] => config.timeouts.body_ms = parse_optional(key, value)?,
            ["TIMEOUTS", "TOTAL_MS"] => config.timeouts.total_ms = parse_optional(key, value)?,

            ["RETRY", "ENABLED"] => config.retry.enabled = parse_flag(key, value)?,
            ["RETRY", "TRIES"] => config.retry.tries = parse_number(key, value)?,
            ["RETRY", "STATUSES"] => {
                config.retry.statuses = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| parse_number(key, s))
                    .collect::<Result<_, _>>()?;
            }
            ["RETRY", "IDEMPOTENT_ONLY"] => config.retry.idempotent_only = parse_flag(key, value)?,
            ["RETRY", "RESPECT_RETRY_AFTER"] => {
                config.retry.respect_retry_after = parse_flag(key, value)?;
            }
            ["RETRY", "MAX_WAIT_MS"] => config.retry.max_wait_ms = parse_number(key, value)?,
            ["RETRY", "BACKOFF", "INITIAL_MS"] => {
                config.retry.backoff.initial_ms = parse_number(key, value)?;
            }
            ["RETRY", "BACKOFF", "MULTIPLIER"] => {
                config.retry.backoff.multiplier = parse_number(key, value)?;
            }
            ["RETRY", "BACKOFF", "MAX_MS"] => config.retry.backoff.max_ms = parse_number(key, value)?,
            ["RETRY", "BACKOFF", "JITTER"] => config.retry.backoff.jitter = parse_flag(key, value)?,

            ["CACHE", "ENABLED"] => config.cache.enabled = parse_flag(key, value)?,
            ["CACHE", "VALIDATORS"] => {
                config.cache.validators = match value.to_lowercase().as_str() {
                    "etag" => CacheValidators::Etag,
                    "last_modified" => CacheValidators::LastModified,
                    "conditional" => CacheValidators::Conditional,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'etag', 'last_modified' or 'conditional'",
                        ))
                    }
                };
            }
            ["CACHE", "TTL_MS"] => config.cache.ttl_ms = parse_number(key, value)?,
            ["CACHE", "STATUS_HEADER"] => config.cache.status_header = value.to_string(),
            ["CACHE", "CAPACITY"] => config.cache.capacity = parse_optional(key, value)?,
            ["CACHE", "STALE_IF_ERROR"] => config.cache.stale_if_error = parse_flag(key, value)?,

            ["TRANSPORT", "BASE_URL"] => config.transport.base_url = optional_string(value),
            ["TRANSPORT", "USER_AGENT"] => config.transport.user_agent = optional_string(value),
            ["TRANSPORT", "CONNECT_TIMEOUT_MS"] => {
                config.transport.connect_timeout_ms = parse_optional(key, value)?;
            }
            ["TRANSPORT", "POOL_IDLE_TIMEOUT_MS"] => {
                config.transport.pool_idle_timeout_ms = parse_optional(key, value)?;
            }
            ["TRANSPORT", "POOL_MAX_IDLE_PER_HOST"] => {
                config.transport.pool_max_idle_per_host = parse_optional(key, value)?;
            }
            ["TRANSPORT", "STREAMING"] => config.transport.streaming = parse_flag(key, value)?,

            ["LOGGING", "ENABLED"] => config.logging.enabled = parse_flag(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    "compact" => LogFormat::Compact,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json', 'pretty' or 'compact'",
                        ))
                    }
                };
            }
            ["LOGGING", "SPAN_EVENTS"] => config.logging.span_events = parse_flag(key, value)?,
            ["LOGGING", "FILE_LINE_INFO"] => config.logging.file_line_info = parse_flag(key, value)?,
            ["LOGGING", "THREAD_IDS"] => config.logging.thread_ids = parse_flag(key, value)?,
            ["LOGGING", "INCLUDE_TARGET"] => config.logging.include_target = parse_flag(key, value)?,

            _ => tracing::debug!(var = key, "ignoring unrecognized configuration variable"),
        }

        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, format!("expected a number, got '{value}'")))
}

// Empty or "none" clears an optional setting.
fn parse_optional<T: FromStr>(key: &str, value: &str) -> Result<Option<T>, ConfigError> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        Ok(None)
    } else {
        parse_number(key, value).map(Some)
    }
}

fn optional_string(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_loader_with_development() {
        let config = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_loader_with_production() {
        let config = ConfigLoader::new().with_production().load().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_loader_with_string_toml() {
        let toml = r#"
            [timeouts]
            request_ms = 2500

            [cache]
            enabled = true
            validators = "etag"
        "#;

        let config = ConfigLoader::new()
            .with_string(toml, "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.timeouts.request_ms, Some(2500));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.validators, CacheValidators::Etag);
        assert_eq!(config.retry.tries, 3);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"retry": {"tries": 6, "statuses": [503]}}"#;

        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.retry.tries, 6);
        assert_eq!(config.retry.statuses, vec![503]);
    }

    #[test]
    fn test_loader_unknown_format() {
        let err = ConfigLoader::new().with_string("", "yaml").unwrap_err();
        assert!(err.to_string().contains("yaml"));
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/relay.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/relay.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_load_validates() {
        let result = ConfigLoader::new()
            .with_string("[retry]\ntries = 0\n", "toml")
            .unwrap()
            .load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_load_unvalidated() {
        let config = ConfigLoader::new()
            .with_string("[retry]\ntries = 0\n", "toml")
            .unwrap()
            .load_unvalidated();
        assert_eq!(config.retry.tries, 0);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_apply_env_var_timeouts() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__TIMEOUTS__BODY_MS", "50", "TEST").unwrap();
        assert_eq!(loader.config.timeouts.body_ms, Some(50));
        loader.apply_env_var("TEST__TIMEOUTS__BODY_MS", "none", "TEST").unwrap();
        assert_eq!(loader.config.timeouts.body_ms, None);
    }

    #[test]
    fn test_apply_env_var_retry() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__RETRY__TRIES", "4", "TEST").unwrap();
        loader.apply_env_var("TEST__RETRY__STATUSES", "429, 503", "TEST").unwrap();
        loader.apply_env_var("TEST__RETRY__BACKOFF__JITTER", "yes", "TEST").unwrap();
        loader.apply_env_var("TEST__RETRY__BACKOFF__MULTIPLIER", "1.5", "TEST").unwrap();
        assert_eq!(loader.config.retry.tries, 4);
        assert_eq!(loader.config.retry.statuses, vec![429, 503]);
        assert!(loader.config.retry.backoff.jitter);
        assert!((loader.config.retry.backoff.multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_apply_env_var_cache_and_transport() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__CACHE__ENABLED", "true", "TEST").unwrap();
        loader.apply_env_var("TEST__CACHE__VALIDATORS", "last_modified", "TEST").unwrap();
        loader.apply_env_var("TEST__CACHE__CAPACITY", "128", "TEST").unwrap();
        loader.apply_env_var("TEST__CACHE__STALE_IF_ERROR", "false", "TEST").unwrap();
        loader
            .apply_env_var("TEST__TRANSPORT__BASE_URL", "https://api.example.com", "TEST")
            .unwrap();
        loader.apply_env_var("TEST__TRANSPORT__STREAMING", "off", "TEST").unwrap();

        assert!(loader.config.cache.enabled);
        assert_eq!(loader.config.cache.validators, CacheValidators::LastModified);
        assert_eq!(loader.config.cache.capacity, Some(128));
        assert!(!loader.config.cache.stale_if_error);
        assert_eq!(
            loader.config.transport.base_url.as_deref(),
            Some("https://api.example.com")
        );
        assert!(!loader.config.transport.streaming);
    }

    #[test]
    fn test_apply_env_var_logging() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__LOGGING__LEVEL", "relay_http=debug", "TEST").unwrap();
        loader.apply_env_var("TEST__LOGGING__FORMAT", "compact", "TEST").unwrap();
        assert_eq!(loader.config.logging.level, "relay_http=debug");
        assert_eq!(loader.config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_apply_env_var_invalid_values() {
        let mut loader = ConfigLoader::new();
        assert!(loader.apply_env_var("TEST__RETRY__TRIES", "many", "TEST").is_err());
        assert!(loader.apply_env_var("TEST__CACHE__ENABLED", "maybe", "TEST").is_err());
        assert!(loader.apply_env_var("TEST__RETRY__STATUSES", "503,x", "TEST").is_err());
        assert!(loader.apply_env_var("TEST__LOGGING__FORMAT", "xml", "TEST").is_err());
    }

    #[test]
    fn test_apply_env_var_unknown_key_ignored() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__SERVER__PORT", "8080", "TEST").unwrap();
        assert_eq!(loader.config, RelayConfig::default());
    }
}

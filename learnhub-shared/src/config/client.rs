//! Client configuration model, file loading and environment overrides.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use url::Url;

/// Errors raised while loading or parsing the client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// File that failed to open.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file extension is not one of `yaml`, `yml`, `json` or `toml`.
    #[error("unsupported configuration format '{extension}'. Use 'yaml', 'json' or 'toml'.")]
    UnsupportedFormat {
        /// The offending file extension.
        extension: String,
    },

    /// The file content did not deserialize.
    #[error("failed to parse configuration: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },

    /// An environment override could not be parsed.
    #[error("invalid {name} value '{value}': {reason}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Raw value found in the environment.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Validation failed; one message per problem.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// REST and WebSocket endpoints of the LearnHub server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the JSON API; endpoint paths are joined onto it.
    pub api_base_url: Url,
    /// WebSocket endpoint speaking STOMP.
    pub websocket_url: Url,
    /// Prefix turning a topic into a STOMP destination.
    pub topic_prefix: String,
    /// Upper bound for the socket upgrade plus STOMP handshake.
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse("http://localhost:8080/api/").expect("static URL"),
            websocket_url: Url::parse("ws://localhost:8080/ws-chat").expect("static URL"),
            topic_prefix: "/topic/".to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

/// Exponential backoff policy applied after a transport drop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay_ms: u64,
    /// Ceiling for any single delay.
    pub max_delay_ms: u64,
    /// Growth factor applied per failed attempt.
    pub multiplier: f64,
    /// Fraction of the computed delay randomised in either direction.
    pub jitter: f64,
    /// `None` retries for as long as the credential stays valid.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// [`ReconnectConfig::initial_delay_ms`] as a [`Duration`].
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// [`ReconnectConfig::max_delay_ms`] as a [`Duration`].
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Optimistic mutation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// How long an optimistic mutation may wait for its server echo.
    pub timeout_ms: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl ReconciliationConfig {
    /// [`ReconciliationConfig::timeout_ms`] as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Event fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Capacity of each topic handler's update channel.
    pub handler_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_capacity: 256,
        }
    }
}

/// History paging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeedConfig {
    /// Items requested per older page.
    pub page_size: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { page_size: 20 }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// The main configuration structure for LearnHub realtime clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Endpoints.
    pub server: ServerConfig,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Optimistic mutation settings.
    pub reconciliation: ReconciliationConfig,
    /// Event fan-out.
    pub dispatch: DispatchConfig,
    /// History paging.
    pub feed: FeedConfig,
    /// Tracing output.
    pub logging: LoggingConfig,
}

impl Config {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Sections missing from the file keep their defaults. Environment
    /// variables are applied on top of the file, then the result is validated.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the file cannot be read or parsed, an
    /// environment override is malformed, or validation fails.
    pub fn load_config(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::with_defaults(),
        };

        config.apply_env_overrides()?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        let parse_error = |message: String| ConfigError::Parse { message };
        match extension.as_str() {
            "yaml" | "yml" => {
                serde_yml::from_str(&content).map_err(|err| parse_error(err.to_string()))
            }
            "json" => serde_json::from_str(&content).map_err(|err| parse_error(err.to_string())),
            "toml" => toml::from_str(&content).map_err(|err| parse_error(err.to_string())),
            _ => Err(ConfigError::UnsupportedFormat { extension }),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var("LEARNHUB_API_URL") {
            self.server.api_base_url = parse_env_url("LEARNHUB_API_URL", &value)?;
        }
        if let Ok(value) = env::var("LEARNHUB_WS_URL") {
            self.server.websocket_url = parse_env_url("LEARNHUB_WS_URL", &value)?;
        }
        if let Ok(value) = env::var("LEARNHUB_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Ok(value) = env::var("LEARNHUB_LOG_FORMAT") {
            self.logging.format = value.parse().map_err(|reason| ConfigError::InvalidEnv {
                name: "LEARNHUB_LOG_FORMAT",
                value: value.clone(),
                reason,
            })?;
        }
        if let Ok(value) = env::var("LEARNHUB_RECONCILE_TIMEOUT_MS") {
            self.reconciliation.timeout_ms =
                value.parse().map_err(|_| ConfigError::InvalidEnv {
                    name: "LEARNHUB_RECONCILE_TIMEOUT_MS",
                    value: value.clone(),
                    reason: "must be a whole number of milliseconds".to_string(),
                })?;
        }
        Ok(())
    }

    /// Validate the complete configuration.
    ///
    /// # Errors
    /// Returns every violated constraint as a human-readable message.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.server.websocket_url.scheme(), "ws" | "wss") {
            errors.push(format!(
                "websocket_url must use ws or wss, got '{}'",
                self.server.websocket_url.scheme()
            ));
        }
        if !matches!(self.server.api_base_url.scheme(), "http" | "https") {
            errors.push(format!(
                "api_base_url must use http or https, got '{}'",
                self.server.api_base_url.scheme()
            ));
        }
        if self.server.connect_timeout_ms == 0 {
            errors.push("connect_timeout_ms must be greater than 0".to_string());
        }
        if self.reconnect.initial_delay_ms == 0 {
            errors.push("reconnect.initial_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            errors.push("reconnect.max_delay_ms must not be below initial_delay_ms".to_string());
        }
        if self.reconnect.multiplier < 1.0 {
            errors.push("reconnect.multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            errors.push("reconnect.jitter must be between 0.0 and 1.0".to_string());
        }
        if self.reconciliation.timeout_ms == 0 {
            errors.push("reconciliation.timeout_ms must be greater than 0".to_string());
        }
        if self.dispatch.handler_capacity == 0 {
            errors.push("dispatch.handler_capacity must be greater than 0".to_string());
        }
        if self.feed.page_size == 0 {
            errors.push("feed.page_size must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn parse_env_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|err| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
        reason: err.to_string(),
    })
}

//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Highest shard id that fits the two-character shard field of a stream token.
pub const MAX_SHARD_ID: u32 = 64 * 64 - 1;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Shard identity.
    #[serde(default)]
    pub shard: ShardConfig,

    /// Long-poll and pagination limits.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity of the shard this server sequences.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardConfig {
    /// Shard id written into every stream token this server hands out.
    #[serde(default = "default_shard_id")]
    pub id: u32,
}

/// Limits applied to sync and pagination requests.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Long-poll timeout used when a request does not specify one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Upper bound for any requested long-poll timeout.
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Page size used when a request does not specify one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound for any requested page size.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "courier_events=trace,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_shard_id() -> u32 {
    1
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_timeout_ms() -> u64 {
    120_000
}

fn default_limit() -> usize {
    50
}

fn default_max_limit() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            id: default_shard_id(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl SyncConfig {
    /// The requested timeout, or the default, capped at the maximum.
    pub fn timeout(&self, requested: Option<Duration>) -> Duration {
        let max = Duration::from_millis(self.max_timeout_ms);
        requested
            .unwrap_or(Duration::from_millis(self.default_timeout_ms))
            .min(max)
    }

    /// The requested page size, or the default, capped at the maximum.
    pub fn limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `COURIER_SHARD_ID` overrides `shard.id`
/// - `COURIER_SYNC_DEFAULT_TIMEOUT_MS` overrides `sync.default_timeout_ms`
/// - `COURIER_SYNC_MAX_TIMEOUT_MS` overrides `sync.max_timeout_ms`
/// - `COURIER_SYNC_DEFAULT_LIMIT` overrides `sync.default_limit`
/// - `COURIER_SYNC_MAX_LIMIT` overrides `sync.max_limit`
/// - `COURIER_LOG_LEVEL` overrides `logging.level`
/// - `COURIER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting configuration is out of range.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`], reading overrides through `env` instead of the
/// process environment.
pub fn load_config_with<F>(path: Option<&str>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Some(id) = env("COURIER_SHARD_ID").and_then(|v| v.parse().ok()) {
        config.shard.id = id;
    }
    if let Some(ms) = env("COURIER_SYNC_DEFAULT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.sync.default_timeout_ms = ms;
    }
    if let Some(ms) = env("COURIER_SYNC_MAX_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.sync.max_timeout_ms = ms;
    }
    if let Some(limit) = env("COURIER_SYNC_DEFAULT_LIMIT").and_then(|v| v.parse().ok()) {
        config.sync.default_limit = limit;
    }
    if let Some(limit) = env("COURIER_SYNC_MAX_LIMIT").and_then(|v| v.parse().ok()) {
        config.sync.max_limit = limit;
    }
    if let Some(level) = env("COURIER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("COURIER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.shard.id == 0 || config.shard.id > MAX_SHARD_ID {
        return Err(ConfigError::Invalid(format!(
            "shard.id must be between 1 and {MAX_SHARD_ID}, got {}",
            config.shard.id
        )));
    }
    if config.sync.max_limit == 0 {
        return Err(ConfigError::Invalid("sync.max_limit must be positive".to_string()));
    }
    Ok(())
}

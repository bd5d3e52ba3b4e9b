//! Configuration parsing and validation for retrygate.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::retry::backoff::{DEFAULT_JITTER, DEFAULT_MAX_BACKOFF, DEFAULT_MIN_BACKOFF};
use crate::retry::{BackoffPolicy, RetryStrategy, CURRENT_STRATEGY};
use crate::upstream::{BalanceStrategy, Endpoint, DEFAULT_PROTOCOL};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub upstreams: Vec<UpstreamGroupConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:9195")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:9195".to_string()
}

/// Backoff bounds shared by every group using the "current" strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Jitter factor in [0, 1]
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_min_backoff_ms() -> u64 {
    DEFAULT_MIN_BACKOFF.as_millis() as u64
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF.as_millis() as u64
}

fn default_jitter() -> f64 {
    DEFAULT_JITTER
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            min_backoff: Duration::from_millis(self.min_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter: self.jitter,
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()`, so every use is grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a group's API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// A backend endpoint inside a routing group.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// "host:port" or "scheme://host:port"
    pub url: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Whether the endpoint is eligible for selection
    #[serde(default = "default_true")]
    pub status: bool,
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

fn default_weight() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

impl From<&EndpointConfig> for Endpoint {
    fn from(config: &EndpointConfig) -> Self {
        Endpoint {
            url: config.url.clone(),
            protocol: config.protocol.clone(),
            weight: config.weight,
            status: config.status,
        }
    }
}

/// A routing group: the pool of endpoints behind one route prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamGroupConfig {
    /// Unique routing group id
    pub id: String,
    /// Request path prefix routed to this group (e.g., "/orders")
    pub prefix: String,
    /// Load balance strategy: "random", "round_robin", "hash"
    #[serde(default = "default_load_balance")]
    pub load_balance: String,
    /// Retry strategy: "current" (backoff) or "failover"
    #[serde(default = "default_retry_strategy")]
    pub retry_strategy: String,
    /// Retry budget
    #[serde(default = "default_retry")]
    pub retry: u32,
    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Optional bearer token sent to every endpoint in the group
    pub api_key: Option<ApiKey>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

fn default_load_balance() -> String {
    BalanceStrategy::Random.as_str().to_string()
}

fn default_retry_strategy() -> String {
    CURRENT_STRATEGY.to_string()
}

fn default_retry() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    3000
}

impl UpstreamGroupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether `path` falls under this group's prefix on a segment boundary.
    pub fn matches(&self, path: &str) -> bool {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstreams.is_empty() {
            tracing::warn!("No upstream groups configured - gateway will reject all requests");
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Validation(format!(
                "Retry jitter must be within [0, 1], got {}",
                self.retry.jitter
            )));
        }
        if self.retry.min_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Validation(format!(
                "min_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.retry.min_backoff_ms, self.retry.max_backoff_ms
            )));
        }

        let mut seen = HashSet::new();
        for group in &self.upstreams {
            if group.id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Upstream group has empty id".to_string(),
                ));
            }
            if !seen.insert(group.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate upstream group id '{}'",
                    group.id
                )));
            }
            if !group.prefix.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "Upstream group '{}' prefix must start with '/'",
                    group.id
                )));
            }
            if RetryStrategy::parse(&group.retry_strategy).is_none() {
                return Err(ConfigError::Validation(format!(
                    "Upstream group '{}' has unknown retry strategy '{}'",
                    group.id, group.retry_strategy
                )));
            }
            if BalanceStrategy::parse(&group.load_balance).is_none() {
                return Err(ConfigError::Validation(format!(
                    "Upstream group '{}' has unknown load balance strategy '{}'",
                    group.id, group.load_balance
                )));
            }
            if group.timeout_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "Upstream group '{}' has zero timeout_ms",
                    group.id
                )));
            }
            if group.endpoints.is_empty() {
                tracing::warn!(group = %group.id, "Upstream group has no endpoints");
            }
            for endpoint in &group.endpoints {
                if endpoint.url.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "Upstream group '{}' has endpoint with empty URL",
                        group.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Group whose prefix is the longest match for `path`.
    pub fn find_group(&self, path: &str) -> Option<&UpstreamGroupConfig> {
        self.upstreams
            .iter()
            .filter(|group| group.matches(path))
            .max_by_key(|group| group.prefix.trim_end_matches('/').len())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for group '{group}': {message}")]
    EnvVar {
        var: String,
        group: String,
        message: String,
    },
}

/// Raw group config deserialized directly from TOML.
/// api_key and endpoint urls may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawUpstreamGroupConfig {
    id: String,
    prefix: String,
    #[serde(default = "default_load_balance")]
    load_balance: String,
    #[serde(default = "default_retry_strategy")]
    retry_strategy: String,
    #[serde(default = "default_retry")]
    retry: u32,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    api_key: Option<String>,
    #[serde(default)]
    endpoints: Vec<EndpointConfig>,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize)]
pub struct RawConfig {
    server: ServerConfig,
    #[serde(default)]
    retry: RetryConfig,
    #[serde(default)]
    upstreams: Vec<RawUpstreamGroupConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${HOST}:${PORT}`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, group: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            group: group.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                group: group.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            group: group.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in group '{}')",
                var_name, group
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

fn expand_env_vars(input: &str, group: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, group, |name| std::env::var(name).ok())
}

/// Derive the convention-based env var name for a group's API key.
///
/// - "orders" -> "RETRYGATE_ORDERS_API_KEY"
/// - "user-profile" -> "RETRYGATE_USER_PROFILE_API_KEY"
pub fn convention_env_var_name(group: &str) -> String {
    let upper_snake = group.to_uppercase().replace(['-', ' '], "_");
    format!("RETRYGATE_{}_API_KEY", upper_snake)
}

fn convention_key_lookup(group: &str) -> Option<(String, String)> {
    let var_name = convention_env_var_name(group);
    std::env::var(&var_name).ok().map(|value| (var_name, value))
}

impl Config {
    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// Endpoint urls have `${VAR}` references expanded. For each group's `api_key`:
    /// - contains `${VAR}`: expanded from environment, source = `EnvExpanded`
    /// - literal string: wrapped directly, source = `Literal`
    /// - absent: convention lookup (`RETRYGATE_<ID>_API_KEY`), else `KeySource::None`
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let mut upstreams = Vec::with_capacity(raw.upstreams.len());
        let mut key_sources = Vec::with_capacity(raw.upstreams.len());

        for rg in raw.upstreams {
            let (api_key, source) = match rg.api_key {
                Some(ref raw_key) if raw_key.contains("${") => {
                    let expanded = expand_env_vars(raw_key, &rg.id)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
                None => match convention_key_lookup(&rg.id) {
                    Some((var_name, value)) => {
                        (Some(ApiKey::from(value)), KeySource::Convention(var_name))
                    }
                    None => (None, KeySource::None),
                },
            };

            let mut endpoints = rg.endpoints;
            for endpoint in &mut endpoints {
                endpoint.url = expand_env_vars(&endpoint.url, &rg.id)?;
            }

            key_sources.push((rg.id.clone(), source));

            upstreams.push(UpstreamGroupConfig {
                id: rg.id,
                prefix: rg.prefix,
                load_balance: rg.load_balance,
                retry_strategy: rg.retry_strategy,
                retry: rg.retry,
                timeout_ms: rg.timeout_ms,
                api_key,
                endpoints,
            });
        }

        let config = Config {
            server: raw.server,
            retry: raw.retry,
            upstreams,
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and per-group key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, key_sources))
    }
}

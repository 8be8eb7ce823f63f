//! # Environment-Based Configuration
//!
//! Server settings are read from environment variables so deployments can
//! be tuned without rebuilding.
//!
//! ## Environment Variables
//!
//! ### Server
//! - `UNICHAT_BIND_ADDR` - Listen address (default: `0.0.0.0:8080`)
//! - `UNICHAT_ENABLE_CORS` - Allow any origin, method and header (default: true)
//! - `UNICHAT_CATEGORIES` - Comma-separated categories clients may subscribe to (default: `Conversation`)
//! - `UNICHAT_USER_HEADER` - Header carrying the authenticated user id (default: `x-user-id`)
//!
//! ### Realtime
//! - `UNICHAT_GREETING` - Text sent to each new connection (default: `hello there`)
//! - `UNICHAT_PROBE_TIMEOUT_MS` - Liveness probe step timeout in ms (default: 300)
//! - `UNICHAT_CLOSE_TIMEOUT_MS` - Disposal wait for a busy transport in ms (default: 2000)
//! - `UNICHAT_SWEEP_INTERVAL_SECS` - Seconds between liveness sweeps (default: 30)
//! - `UNICHAT_MAX_CONCURRENT_PROBES` - Probes running at once (default: 256)

use std::{env, net::SocketAddr, time::Duration};
use unichat_realtime::{Conversation, EventCategory, RealtimeConfig, RealtimeConfigBuilder};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub enable_cors: bool,
    /// Categories accepted on the subscribe route
    pub categories: Vec<String>,
    /// Header the default identity resolver reads
    pub user_header: String,
    pub realtime: RealtimeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            enable_cors: true,
            categories: vec![Conversation::NAME.to_string()],
            user_header: "x-user-id".to_string(),
            realtime: RealtimeConfig::default(),
        }
    }
}

/// Builder for `ServerConfig` with environment variable support
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    bind_addr: SocketAddr,
    enable_cors: bool,
    categories: Vec<String>,
    user_header: String,
    realtime: RealtimeConfigBuilder,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind_addr: defaults.bind_addr,
            enable_cors: defaults.enable_cors,
            categories: defaults.categories,
            user_header: defaults.user_header,
            realtime: RealtimeConfigBuilder::new(),
        }
    }
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from `UNICHAT_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::default();

        if let Some(addr) = get_env_string("UNICHAT_BIND_ADDR") {
            let addr = addr.parse().map_err(|e| ConfigError::InvalidEnvVar {
                key: "UNICHAT_BIND_ADDR".to_string(),
                message: format!("invalid socket address '{addr}': {e}"),
            })?;
            builder = builder.bind_addr(addr);
        }
        if let Some(cors) = get_env_bool("UNICHAT_ENABLE_CORS")? {
            builder = builder.enable_cors(cors);
        }
        if let Some(categories) = get_env_string("UNICHAT_CATEGORIES") {
            builder = builder.categories(
                categories
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Some(header) = get_env_string("UNICHAT_USER_HEADER") {
            builder = builder.user_header(header);
        }

        // Realtime
        if let Some(greeting) = get_env_string("UNICHAT_GREETING") {
            builder.realtime = builder
                .realtime
                .greeting(greeting)
                .map_err(|e| invalid("UNICHAT_GREETING", e))?;
        }
        if let Some(ms) = get_env_u64("UNICHAT_PROBE_TIMEOUT_MS")? {
            builder.realtime = builder
                .realtime
                .probe_timeout(Duration::from_millis(ms))
                .map_err(|e| invalid("UNICHAT_PROBE_TIMEOUT_MS", e))?;
        }
        if let Some(ms) = get_env_u64("UNICHAT_CLOSE_TIMEOUT_MS")? {
            builder.realtime = builder
                .realtime
                .close_timeout(Duration::from_millis(ms))
                .map_err(|e| invalid("UNICHAT_CLOSE_TIMEOUT_MS", e))?;
        }
        if let Some(secs) = get_env_u64("UNICHAT_SWEEP_INTERVAL_SECS")? {
            builder.realtime = builder
                .realtime
                .sweep_interval(Duration::from_secs(secs))
                .map_err(|e| invalid("UNICHAT_SWEEP_INTERVAL_SECS", e))?;
        }
        if let Some(max) = get_env_usize("UNICHAT_MAX_CONCURRENT_PROBES")? {
            builder.realtime = builder
                .realtime
                .max_concurrent_probes(max)
                .map_err(|e| invalid("UNICHAT_MAX_CONCURRENT_PROBES", e))?;
        }

        Ok(builder)
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn user_header(mut self, header: impl Into<String>) -> Self {
        self.user_header = header.into();
        self
    }

    pub fn realtime(mut self, realtime: RealtimeConfigBuilder) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        self.validate()?;

        Ok(ServerConfig {
            bind_addr: self.bind_addr,
            enable_cors: self.enable_cors,
            categories: self.categories,
            user_header: self.user_header.to_ascii_lowercase(),
            realtime: self.realtime.build(),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one category must be enabled".to_string(),
            ));
        }
        if let Some(bad) = self
            .categories
            .iter()
            .find(|name| !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(ConfigError::ValidationError(format!(
                "category '{bad}' may only contain ASCII letters, digits and '_'"
            )));
        }
        if self.user_header.is_empty()
            || axum::http::HeaderName::from_bytes(self.user_header.as_bytes()).is_err()
        {
            return Err(ConfigError::ValidationError(format!(
                "user_header '{}' is not a valid header name",
                self.user_header
            )));
        }
        Ok(())
    }
}

fn invalid(key: &str, error: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidEnvVar {
        key: key.to_string(),
        message: error.to_string(),
    }
}

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn get_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!(
                    "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                ),
            }),
        },
        Err(_) => Ok(None),
    }
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u64 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid usize value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builder() {
        let config = ServerConfigBuilder::new().build().unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert!(config.enable_cors);
        assert_eq!(config.categories, vec!["Conversation".to_string()]);
        assert_eq!(config.user_header, "x-user-id");
        assert_eq!(config.realtime, RealtimeConfig::default());
    }

    #[test]
    fn test_rejects_empty_categories() {
        let result = ServerConfigBuilder::new().categories(Vec::new()).build();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_rejects_category_with_path_separator() {
        let result = ServerConfigBuilder::new()
            .categories(vec!["Conversation/Admin".to_string()])
            .build();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_user_header_is_normalised() {
        let config = ServerConfigBuilder::new()
            .user_header("X-Account-Id")
            .build()
            .unwrap();
        assert_eq!(config.user_header, "x-account-id");
    }
}

//! Client configuration.
//!
//! All settings have defaults; a YAML file only needs the fields it changes.
//! Durations are stored in milliseconds and exposed through `Duration`
//! accessors.

use rasmux_protocol::{DEFAULT_PORT, DEFAULT_SERVICE_VERSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address (`host:port`).
    pub addr: String,
    /// Service version requested when opening endpoints.
    pub service_version: String,
    /// Value of the `connect.timeout` parameter sent in the connect message.
    pub connect_timeout_ms: u64,
    /// Connection pool settings.
    pub pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: format!("localhost:{}", DEFAULT_PORT),
            service_version: DEFAULT_SERVICE_VERSION.to_string(),
            connect_timeout_ms: 2000,
            pool: PoolConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the client unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.trim().is_empty() {
            return Err(ConfigError::ValidationError("addr must not be empty".into()));
        }
        rasmux_protocol::message::parse_major_version(&self.service_version)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if self.pool.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "pool.pool_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn with_service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Endpoint pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of pooled connections, also the admission bound.
    pub pool_size: usize,
    /// Idle connections kept open in the background.
    pub min_idle_conns: usize,
    /// Connections older than this are replaced (0 disables).
    pub max_conn_age_ms: u64,
    /// Connections unused for this long are closed (0 disables).
    pub idle_timeout_ms: u64,
    /// Reaper tick interval (0 disables the reaper).
    pub idle_check_frequency_ms: u64,
    /// How long a caller waits for a free connection.
    pub pool_timeout_ms: u64,
    /// Maximum endpoints opened on a single connection.
    pub max_open_endpoints: usize,
    /// Transport dial timeout.
    pub dial_timeout_ms: u64,
    /// How long to wait for a reply packet.
    pub response_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            min_idle_conns: 1,
            max_conn_age_ms: 30 * 60 * 1000,
            idle_timeout_ms: 10 * 60 * 1000,
            idle_check_frequency_ms: 60 * 1000,
            pool_timeout_ms: 10 * 60 * 1000,
            max_open_endpoints: 1,
            dial_timeout_ms: 10 * 1000,
            response_timeout_ms: 30 * 1000,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies lower bounds the pool relies on.
    pub fn normalized(mut self) -> Self {
        self.pool_size = self.pool_size.max(1);
        self.max_open_endpoints = self.max_open_endpoints.max(1);
        self.min_idle_conns = self.min_idle_conns.min(self.pool_size);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_min_idle_conns(mut self, n: usize) -> Self {
        self.min_idle_conns = n;
        self
    }

    pub fn with_max_conn_age(mut self, age: Duration) -> Self {
        self.max_conn_age_ms = age.as_millis() as u64;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_idle_check_frequency(mut self, frequency: Duration) -> Self {
        self.idle_check_frequency_ms = frequency.as_millis() as u64;
        self
    }

    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_open_endpoints(mut self, n: usize) -> Self {
        self.max_open_endpoints = n;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn max_conn_age(&self) -> Duration {
        Duration::from_millis(self.max_conn_age_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn idle_check_frequency(&self) -> Duration {
        Duration::from_millis(self.idle_check_frequency_ms)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(_, e) => Some(e),
            _ => None,
        }
    }
}

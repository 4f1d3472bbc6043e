//! Configuration management
//!
//! Loads configuration from config.toml at startup.
//! Components receive their section at construction and never read
//! configuration sources themselves.

use crate::core::pool::Capacity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Complete configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub resources: ResourceConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub async_server: AsyncServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    /// Status API settings
    #[serde(default)]
    pub api: ApiConfig,
}

/// Which transport pattern the process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Load-balancing broker with a worker pool
    Broker,
    /// Asynchronous server with heartbeat liveness and failover
    Async,
}

/// Listening endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_mode")]
    pub mode: ServerMode,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// 0 binds an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Initial pool capacities
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceConfig {
    #[serde(default = "default_classrooms")]
    pub classrooms: u32,

    #[serde(default = "default_labs")]
    pub labs: u32,
}

/// Load-balancing broker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Number of worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Client frames buffered while no worker is ready
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

/// Asynchronous server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AsyncServerConfig {
    /// Maximum messages handled concurrently
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Clients silent for longer than this are evicted
    #[serde(default = "default_timeout_ms")]
    pub client_timeout_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default)]
    pub replica_enabled: bool,

    /// Delay before a simulated failure promotes the replica
    #[serde(default = "default_failover_delay_ms")]
    pub failover_delay_ms: u64,

    /// JSON-lines allocation record; disabled when unset
    #[serde(default)]
    pub journal_path: Option<PathBuf>,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Asynchronous client settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_address")]
    pub server_address: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    /// Per-request reply timeout, also the heartbeat reply timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Connection attempts before giving up
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Attempt n waits n * backoff_ms before the next one
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Port for HTTP API server
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            classrooms: default_classrooms(),
            labs: default_labs(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

impl Default for AsyncServerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            client_timeout_ms: default_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            replica_enabled: false,
            failover_delay_ms: default_failover_delay_ms(),
            journal_path: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            server_port: default_port(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_api_port(),
        }
    }
}

fn default_mode() -> ServerMode {
    ServerMode::Async
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5556
}

fn default_classrooms() -> u32 {
    380
}

fn default_labs() -> u32 {
    60
}

fn default_workers() -> usize {
    10
}

fn default_inbound_capacity() -> usize {
    1024
}

fn default_worker_pool_size() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_failover_delay_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_server_address() -> String {
    "127.0.0.1".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1_000
}

fn default_handshake_timeout_ms() -> u64 {
    1_000
}

fn default_api_port() -> u16 {
    5000
}

impl ResourceConfig {
    #[inline]
    pub fn capacity(&self) -> Capacity {
        Capacity::new(self.classrooms, self.labs)
    }
}

impl ServerConfig {
    /// `address:port` string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl AsyncServerConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn failover_delay(&self) -> Duration {
        Duration::from_millis(self.failover_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl ClientConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Wait after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Config {
    /// Load configuration from config.toml file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values no component can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_port("server.port", self.server.port)?;
        validate_port("client.server_port", self.client.server_port)?;
        validate_port("api.port", self.api.port)?;

        if self.resources.classrooms == 0 {
            return Err(ConfigError::Invalid(
                "resources.classrooms must be greater than 0".to_string(),
            ));
        }
        if self.resources.labs == 0 {
            return Err(ConfigError::Invalid(
                "resources.labs must be greater than 0".to_string(),
            ));
        }
        if !(1..=100).contains(&self.async_server.worker_pool_size) {
            return Err(ConfigError::Invalid(format!(
                "async_server.worker_pool_size must be in 1..=100, got {}",
                self.async_server.worker_pool_size
            )));
        }
        if self.broker.workers == 0 {
            return Err(ConfigError::Invalid(
                "broker.workers must be at least 1".to_string(),
            ));
        }
        if self.broker.inbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broker.inbound_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_port(name: &str, port: u16) -> Result<(), ConfigError> {
    if port == 0 || port >= 1024 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be 0 or in 1024..=65535, got {}",
            name, port
        )))
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.mode, ServerMode::Async);
        assert_eq!(config.server.port, 5556);
        assert_eq!(config.resources.capacity(), Capacity::new(380, 60));
        assert_eq!(config.broker.workers, 10);
        assert_eq!(config.async_server.client_timeout_ms, 30_000);
        assert!(!config.async_server.replica_enabled);
        assert_eq!(config.client.retries, 3);
        assert_eq!(config.api.port, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            mode = "broker"
            port = 5555

            [resources]
            classrooms = 30
            labs = 10

            [async_server]
            replica_enabled = true
            journal_path = "logs/allocations.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.mode, ServerMode::Broker);
        assert_eq!(config.server.bind_addr(), "0.0.0.0:5555");
        assert_eq!(config.resources.capacity(), Capacity::new(30, 10));
        assert!(config.async_server.replica_enabled);
        assert_eq!(
            config.async_server.journal_path,
            Some(PathBuf::from("logs/allocations.jsonl"))
        );
        assert_eq!(config.async_server.failover_delay_ms, 5_000);
        assert_eq!(config.client.timeout_ms, 30_000);
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml("[server\nport = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_rules() {
        let mut config = Config::default();
        config.server.port = 80;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.resources.labs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.async_server.worker_pool_size = 101;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.broker.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_backoff_grows_linearly() {
        let config = ClientConfig {
            backoff_ms: 100,
            ..ClientConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(3), Duration::from_millis(300));
    }
}

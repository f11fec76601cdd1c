use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Wire and transport constants
pub mod protocol {
    /// Default SOCKS port of the local transport daemon
    pub const DEFAULT_SOCKS_PORT: u16 = 9050;

    /// Default port for the inbound packet listener
    pub const DEFAULT_LISTEN_PORT: u16 = 5012;

    /// Virtual port announced by the tunnel handshake and the hidden service
    pub const VIRTUAL_PORT: u16 = 80;

    /// Upper bound for a single length-prefixed string field (1 MB)
    pub const MAX_STRING_LEN: usize = 1024 * 1024;

    /// Upper bound for a message body (10 MB)
    pub const MAX_BODY_LEN: usize = 10 * 1024 * 1024;

    /// Proxy connect timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Read/write timeout while handshaking and writing packets
    pub const IO_TIMEOUT_MS: u64 = 3_000;
}

/// Link stack constants
pub mod links {
    /// Stubborn link retransmission period
    pub const STUBBORN_POLL_PERIOD_MS: u64 = 30_000;

    /// Delay before the first retransmission round
    pub const STUBBORN_INITIAL_DELAY_MS: u64 = 100;

    /// How long an unacknowledged packet keeps being retransmitted
    pub const STUBBORN_RETENTION_SECS: u64 = 600; // 10 minutes

    /// Number of delivered packets the perfect link remembers
    pub const PERFECT_HISTORY_CAPACITY: usize = 100_000;

    /// Message type of a ping request
    pub const PING: i32 = 303;

    /// Message type of a ping response
    pub const PONG: i32 = 304;

    /// Path the ping link listens on
    pub const PING_PATH: &str = "ping";
}

/// Control protocol constants
pub mod control {
    /// Asynchronous event status
    pub const STATUS_EVENT: u16 = 650;

    /// Topic for asynchronous daemon events
    pub const EVENT_TOPIC: &str = "control-event";

    /// Topic for completed request/response pairs
    pub const TRANSACTION_TOPIC: &str = "control-transaction";
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Host of the transport daemon's SOCKS proxy
    pub socks_host: String,

    /// Port of the transport daemon's SOCKS proxy
    pub socks_port: u16,

    /// Control endpoint of the transport daemon, if one should be driven
    pub control_addr: Option<String>,

    /// Control password (hashed with `PasswordDigest` before it reaches the daemon)
    pub control_password: Option<String>,

    /// Listen address for inbound packets
    pub listen_addr: String,

    /// Listen port for inbound packets (0 picks a free port)
    pub listen_port: u16,

    /// Virtual port the hidden service exposes
    pub hidden_service_port: u16,

    /// Stubborn link retransmission period
    pub stubborn_poll_period_ms: u64,

    /// Delay before the first retransmission round
    pub stubborn_initial_delay_ms: u64,

    /// Retention of unacknowledged packets
    pub stubborn_retention_secs: u64,

    /// Delivered-packet history size of the perfect link
    pub perfect_history_capacity: usize,

    /// Proxy connect timeout
    pub connect_timeout_ms: u64,

    /// Handshake/write timeout
    pub io_timeout_ms: u64,

    /// Local HTTP API address
    pub api_addr: String,

    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            socks_host: "127.0.0.1".to_string(),
            socks_port: protocol::DEFAULT_SOCKS_PORT,
            control_addr: None,
            control_password: None,
            listen_addr: "127.0.0.1".to_string(),
            listen_port: protocol::DEFAULT_LISTEN_PORT,
            hidden_service_port: protocol::VIRTUAL_PORT,
            stubborn_poll_period_ms: links::STUBBORN_POLL_PERIOD_MS,
            stubborn_initial_delay_ms: links::STUBBORN_INITIAL_DELAY_MS,
            stubborn_retention_secs: links::STUBBORN_RETENTION_SECS,
            perfect_history_capacity: links::PERFECT_HISTORY_CAPACITY,
            connect_timeout_ms: protocol::CONNECT_TIMEOUT_MS,
            io_timeout_ms: protocol::IO_TIMEOUT_MS,
            api_addr: "127.0.0.1:9150".to_string(),
            verbose: false,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_socks_port(mut self, port: u16) -> Self {
        self.socks_port = port;
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_control_addr(mut self, addr: impl Into<String>) -> Self {
        self.control_addr = Some(addr.into());
        self
    }

    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.stubborn_poll_period_ms = period.as_millis() as u64;
        self
    }

    pub fn socks_endpoint(&self) -> String {
        format!("{}:{}", self.socks_host, self.socks_port)
    }

    pub fn listen_endpoint(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    pub fn api_endpoint(&self) -> Result<SocketAddr, ConfigError> {
        self.api_addr
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("api_addr: {}", self.api_addr)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Retransmission period, never zero
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.stubborn_poll_period_ms.max(1))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.stubborn_initial_delay_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.stubborn_retention_secs)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.socks_port, protocol::DEFAULT_SOCKS_PORT);
        assert_eq!(config.hidden_service_port, 80);
        assert!(config.control_addr.is_none());
        assert_eq!(config.socks_endpoint(), "127.0.0.1:9050");
    }

    #[test]
    fn test_config_builder() {
        let config = NodeConfig::new()
            .with_socks_port(1000)
            .with_listen_port(0)
            .with_control_addr("127.0.0.1:9051")
            .with_poll_period(Duration::from_millis(100));

        assert_eq!(config.socks_port, 1000);
        assert_eq!(config.listen_port, 0);
        assert_eq!(config.control_addr.as_deref(), Some("127.0.0.1:9051"));
        assert_eq!(config.poll_period(), Duration::from_millis(100));
    }

    #[test]
    fn test_toml_roundtrip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hiddenlink.toml");

        let config = NodeConfig::new().with_socks_port(9150);
        config.to_file(&path).unwrap();
        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.socks_port, 9150);

        // Missing keys fall back to defaults
        std::fs::write(&path, "listen_port = 7000\n").unwrap();
        let partial = NodeConfig::from_file(&path).unwrap();
        assert_eq!(partial.listen_port, 7000);
        assert_eq!(partial.socks_port, protocol::DEFAULT_SOCKS_PORT);
    }

    #[test]
    fn test_zero_poll_period_is_clamped() {
        let config = NodeConfig::new().with_poll_period(Duration::ZERO);
        assert_eq!(config.poll_period(), Duration::from_millis(1));

        let parsed: NodeConfig = toml::from_str("stubborn_poll_period_ms = 0\n").unwrap();
        assert_eq!(parsed.poll_period(), Duration::from_millis(1));
    }

    #[test]
    fn test_invalid_api_addr() {
        let mut config = NodeConfig::default();
        config.api_addr = "not an address".to_string();
        assert!(matches!(config.api_endpoint(), Err(ConfigError::InvalidValue(_))));
    }
}

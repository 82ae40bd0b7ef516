//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via USSDGW_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use ussdgw_protocol::{DEFAULT_MAX_BUFFER, MAX_PDU_SIZE};

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Bind credential configuration.
    pub auth: AuthConfig,
    /// Application backend configuration.
    pub application: AppConfig,
    /// Protocol resource limits.
    pub limits: LimitsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("USSDGW_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.auth.apply_env_overrides();
        self.application.apply_env_overrides();
        self.limits.apply_env_overrides();
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], ussdgw_protocol::DEFAULT_PORT)),
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("USSDGW_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(max) = std::env::var("USSDGW_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }
}

/// Bind credential configuration.
///
/// A single accepted system_id/password pair plus the identifier the
/// gateway announces in bind responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted client system_id.
    pub system_id: String,
    /// Accepted client password.
    pub password: String,
    /// Server identifier returned in bind responses.
    pub server_system_id: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            system_id: "test".to_string(),
            password: "test123".to_string(),
            server_system_id: "server".to_string(),
        }
    }
}

impl AuthConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("USSDGW_SYSTEM_ID") {
            self.system_id = id;
        }
        if let Ok(password) = std::env::var("USSDGW_PASSWORD") {
            self.password = password;
        }
        if let Ok(id) = std::env::var("USSDGW_SERVER_SYSTEM_ID") {
            self.server_system_id = id;
        }
    }
}

/// Application backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL the routing key, input and session id are appended to.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/ussd/".to_string(),
            timeout_secs: 10,
        }
    }
}

impl AppConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("USSDGW_APP_URL") {
            self.base_url = url;
        }
        if let Ok(timeout) = std::env::var("USSDGW_APP_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.timeout_secs = secs;
            }
        }
    }

    /// Returns the request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Protocol resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum accepted PDU size in bytes.
    pub max_pdu_bytes: u32,
    /// Maximum per-connection receive buffer in bytes.
    pub max_buffer_bytes: usize,
    /// Depth of the per-connection frame queue.
    pub frame_queue_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_pdu_bytes: MAX_PDU_SIZE,
            max_buffer_bytes: DEFAULT_MAX_BUFFER,
            frame_queue_depth: 32,
        }
    }
}

impl LimitsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("USSDGW_MAX_PDU_BYTES") {
            if let Ok(n) = max.parse() {
                self.max_pdu_bytes = n;
            }
        }
        if let Ok(max) = std::env::var("USSDGW_MAX_BUFFER_BYTES") {
            if let Ok(n) = max.parse() {
                self.max_buffer_bytes = n;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
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
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

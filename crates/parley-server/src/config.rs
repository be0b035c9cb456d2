//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use parley_core::{EngineConfig, RetryPolicy, RouterConfig, User};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Typing-relay configuration.
    #[serde(default)]
    pub typing: TypingConfig,

    /// Storage call hardening.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrently connected users.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of live rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum room subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,

    /// Maximum message content length after trimming.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle timeout in milliseconds before a connection is dropped.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Typing-relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    /// Minimum interval between relays per (user, chat). Zero disables
    /// the gate.
    #[serde(default = "default_typing_interval")]
    pub min_interval_ms: u64,
}

/// Storage call hardening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_storage_timeout")]
    pub timeout_ms: u64,

    /// Total attempts per store call, including the first.
    #[serde(default = "default_storage_attempts")]
    pub retry_attempts: u32,

    /// Delay before the first retry; doubles per retry.
    #[serde(default = "default_storage_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Optional TOML fixture of users loaded into the in-memory store
    /// at startup.
    #[serde(default)]
    pub seed_path: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PARLEY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_max_content_length() -> usize {
    4_096
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_typing_interval() -> u64 {
    1_000
}

fn default_storage_timeout() -> u64 {
    5_000
}

fn default_storage_attempts() -> u32 {
    3
}

fn default_storage_base_delay() -> u64 {
    50
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            typing: TypingConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_rooms: default_max_rooms(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            max_content_length: default_max_content_length(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_typing_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_storage_timeout(),
            retry_attempts: default_storage_attempts(),
            retry_base_delay_ms: default_storage_base_delay(),
            seed_path: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid host:port")
    }

    /// Engine configuration derived from the server settings.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            router: RouterConfig {
                max_rooms: self.limits.max_rooms,
                max_subscriptions_per_connection: self.limits.max_subscriptions_per_connection,
                room_capacity: 1024,
                auto_delete_empty_rooms: true,
            },
            typing_min_interval_ms: self.typing.min_interval_ms,
            max_content_length: self.limits.max_content_length,
            retry: RetryPolicy {
                attempts: self.storage.retry_attempts,
                base_delay: Duration::from_millis(self.storage.retry_base_delay_ms),
                timeout: Duration::from_millis(self.storage.timeout_ms),
            },
        }
    }
}

/// User fixture file loaded into the in-memory store at startup.
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    /// Users to insert.
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

/// One user fixture.
#[derive(Debug, Deserialize)]
pub struct SeedUser {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Account email.
    pub email: String,
    /// Avatar reference.
    #[serde(default)]
    pub avatar: String,
}

impl SeedFile {
    /// Load a fixture file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;

        let seed: SeedFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse seed file: {}", path.display()))?;

        Ok(seed)
    }
}

impl From<SeedUser> for User {
    fn from(seed: SeedUser) -> Self {
        User {
            id: seed.id,
            name: seed.name,
            email: seed.email,
            avatar: seed.avatar,
            is_online: false,
            last_seen: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.typing.min_interval_ms, 1_000);
        assert_eq!(config.storage.retry_attempts, 3);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 50000

            [typing]
            min_interval_ms = 500
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.typing.min_interval_ms, 500);
    }

    #[test]
    fn test_engine_config_derivation() {
        let mut config = Config::default();
        config.limits.max_content_length = 128;
        config.storage.retry_attempts = 5;

        let engine = config.engine_config();
        assert_eq!(engine.max_content_length, 128);
        assert_eq!(engine.retry.attempts, 5);
    }

    #[test]
    fn test_seed_file_parse() {
        let toml_str = r#"
            [[users]]
            id = "u-alice"
            name = "Alice"
            email = "alice@example.com"
            avatar = "alice.png"

            [[users]]
            id = "u-bob"
            name = "Bob"
            email = "bob@example.com"
        "#;

        let seed: SeedFile = toml::from_str(toml_str).unwrap();
        assert_eq!(seed.users.len(), 2);

        let bob: User = seed.users.into_iter().nth(1).unwrap().into();
        assert_eq!(bob.name, "Bob");
        assert!(bob.avatar.is_empty());
        assert!(!bob.is_online);
    }
}

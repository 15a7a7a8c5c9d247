//! # Configuration Management
//!
//! Centralized configuration for endpoints.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Environment Variables
//! Properties are named with dots (`net.message_timeout`). The matching
//! environment variable is upper-cased, uses underscores, and carries the
//! `ENDPOINT_` prefix: `ENDPOINT_NET_MESSAGE_TIMEOUT`. Values that fail to
//! parse or validate are ignored and the default is kept.

use crate::core::serialization::SerializationFormat;
use crate::error::{ProtocolError, Result};
use crate::protocol::instance::{InstanceFlavor, InstanceIdentity, InstanceType};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{trace, warn, Level};

/// Current supported protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Max allowed frame body size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "ENDPOINT_";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Identity of the local instance
    #[serde(default)]
    pub instance: InstanceConfig,

    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration shared by both sides
    #[serde(default)]
    pub transport: TransportConfig,

    /// Peer name resolution
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load the defaults and apply environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Apply environment overrides on top of the current values
    pub fn apply_env(&mut self) {
        if let Some(addr) = env_property::<String>("server.address") {
            self.server.address = addr;
        }
        if let Some(val) = env_property_validated("server.max_connections", |v: &usize| *v > 0) {
            self.server.max_connections = val;
        }
        if let Some(ms) = env_property::<u64>("server.shutdown_timeout") {
            self.server.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_property::<u64>("server.handshake_timeout") {
            self.server.handshake_timeout = Duration::from_millis(ms);
        }

        if let Some(addr) = env_property::<String>("client.address") {
            self.client.address = addr;
        }
        if let Some(ms) = env_property::<u64>("client.connection_timeout") {
            self.client.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(val) = env_property_validated("client.outgoing_concurrency", |v: &usize| *v > 0)
        {
            self.client.outgoing_concurrency = val;
        }
        if let Some(val) = env_property::<bool>("client.auto_reconnect") {
            self.client.auto_reconnect = val;
        }

        if let Some(format) = env_property::<SerializationFormat>("net.format") {
            self.transport.format = format;
        }
        if let Some(ms) = env_property_validated("net.message_timeout", |v: &u64| *v > 0) {
            self.transport.message_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_property::<u64>("net.heartbeat_interval") {
            self.transport.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_property::<u64>("net.idle_timeout") {
            self.transport.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(val) = env_property_validated("net.backpressure_limit", |v: &usize| *v > 0) {
            self.transport.backpressure_limit = val;
        }
        if let Some(ms) = env_property::<u64>("net.traffic_interval") {
            self.transport.traffic_interval = Duration::from_millis(ms);
        }
        if let Some(val) = env_property::<bool>("net.logging.raw") {
            self.transport.log_traffic_raw = val;
        }
        if let Some(val) = env_property::<bool>("net.logging.decoded") {
            self.transport.log_traffic_decoded = val;
        }

        if let Some(level) = env_property::<Level>("log.level") {
            self.logging.log_level = level;
        }
        if let Some(levels) = env_property::<String>("log.levels") {
            self.logging.levels = levels
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(path) = env_property::<String>("log.file") {
            self.logging.log_to_file = true;
            self.logging.log_file_path = Some(path);
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.instance.validate());
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.resolver.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Environment variable name for a dotted property name
pub fn env_name(property: &str) -> String {
    format!(
        "{ENV_PREFIX}{}",
        property.to_ascii_uppercase().replace('.', "_")
    )
}

/// Read and parse a property from the environment
pub fn env_property<T: FromStr>(property: &str) -> Option<T> {
    env_property_validated(property, |_| true)
}

/// Read, parse and validate a property from the environment
pub fn env_property_validated<T, F>(property: &str, validator: F) -> Option<T>
where
    T: FromStr,
    F: Fn(&T) -> bool,
{
    let name = env_name(property);
    let raw = std::env::var(&name).ok()?;
    trace!(variable = %name, "Found environment variable");

    match raw.parse::<T>() {
        Ok(value) if validator(&value) => Some(value),
        Ok(_) => {
            warn!(variable = %name, value = %raw, "Rejected invalid property value");
            None
        }
        Err(_) => {
            warn!(variable = %name, value = %raw, "Failed to parse property");
            None
        }
    }
}

/// Identity of the local instance
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Instance type (server, agent or client)
    pub instance: InstanceType,

    /// Instance flavor, must be valid for the instance type
    pub flavor: InstanceFlavor,

    /// Fixed instance UUID; a random one is generated when absent
    #[serde(default)]
    pub uuid: Option<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance: InstanceType::Server,
            flavor: InstanceFlavor::Vanilla,
            uuid: None,
        }
    }
}

impl InstanceConfig {
    /// Build the identity described by this section
    pub fn identity(&self) -> InstanceIdentity {
        match &self.uuid {
            Some(uuid) => InstanceIdentity::new(self.instance, self.flavor, uuid.clone()),
            None => InstanceIdentity::generate(self.instance, self.flavor),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.instance.flavors().contains(&self.flavor) {
            errors.push(format!(
                "Flavor {:?} is not valid for instance type {:?}",
                self.flavor, self.instance
            ));
        }

        if let Some(uuid) = &self.uuid {
            if uuid.trim().is_empty() {
                errors.push("Instance UUID cannot be empty when specified".to_string());
            }
        }

        errors
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:8768")
    pub address: String,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Time an accepted socket has to complete the session handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Maximum number of concurrent connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8768"),
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            handshake_timeout: timeout::DEFAULT_TIMEOUT,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8768')",
                self.address
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target server, either `host:port` or a socket address
    pub address: String,

    /// Timeout for each connection attempt
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Timeout for the session handshake after connecting
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Whether to retry failed connection attempts
    pub auto_reconnect: bool,

    /// Maximum number of attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Delay between attempts
    #[serde(with = "duration_serde")]
    pub reconnect_delay: Duration,

    /// Maximum number of outgoing connection attempts in flight
    pub outgoing_concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8768"),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            handshake_timeout: timeout::DEFAULT_TIMEOUT,
            auto_reconnect: true,
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
            outgoing_concurrency: 4,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if !has_port(&self.address) {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: 'example.com:8768')",
                self.address
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        }

        if self.auto_reconnect && self.max_reconnect_attempts == 0 {
            errors.push(
                "Max reconnect attempts must be greater than 0 when auto_reconnect is enabled"
                    .to_string(),
            );
        }

        if self.reconnect_delay.as_millis() < 10 {
            errors.push("Reconnect delay too short (minimum: 10ms)".to_string());
        } else if self.reconnect_delay.as_secs() > 60 {
            errors.push("Reconnect delay too long (maximum: 60s)".to_string());
        }

        if self.outgoing_concurrency == 0 {
            errors.push("Outgoing concurrency must be greater than 0".to_string());
        }

        errors
    }
}

fn has_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Transport configuration shared by servers and clients
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Payload format for outbound messages
    pub format: SerializationFormat,

    /// Maximum allowed frame body size in bytes
    pub max_payload_size: usize,

    /// How long a request waits for its response
    #[serde(with = "duration_serde")]
    pub message_timeout: Duration,

    /// Interval between keepalive pings once a session is established
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// A connection with no inbound traffic for this long is closed
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Capacity of each connection's outbound queue
    pub backpressure_limit: usize,

    /// Interval of per-connection traffic summaries; zero disables them
    #[serde(with = "duration_serde")]
    pub traffic_interval: Duration,

    /// Log raw frames at trace level
    pub log_traffic_raw: bool,

    /// Log decoded envelopes at trace level
    pub log_traffic_decoded: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            format: SerializationFormat::default(),
            max_payload_size: MAX_PAYLOAD_SIZE,
            message_timeout: timeout::MESSAGE_TIMEOUT,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            idle_timeout: timeout::IDLE_TIMEOUT,
            backpressure_limit: 32,
            traffic_interval: Duration::ZERO,
            log_traffic_raw: false,
            log_traffic_decoded: false,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_payload_size == 0 {
            errors.push("Max payload size cannot be 0".to_string());
        } else if self.max_payload_size < 1024 {
            errors.push("Max payload size too small (minimum: 1 KB)".to_string());
        } else if self.max_payload_size > u32::MAX as usize {
            errors.push(format!(
                "Max payload size too large: {} bytes (frame lengths are 32-bit)",
                self.max_payload_size
            ));
        }

        if self.message_timeout.as_millis() < 10 {
            errors.push("Message timeout too short (minimum: 10ms)".to_string());
        }

        if self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.idle_timeout <= self.heartbeat_interval {
            errors.push("Idle timeout must be longer than the heartbeat interval".to_string());
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if !self.traffic_interval.is_zero() && self.traffic_interval.as_millis() < 100 {
            errors.push("Traffic interval too short (minimum: 100ms, or 0 to disable)".to_string());
        }

        errors
    }
}

/// Peer name resolution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Timeout of a single lookup
    #[serde(with = "duration_serde")]
    pub lookup_timeout: Duration,

    /// How long resolved addresses stay cached; zero disables caching
    #[serde(with = "duration_serde")]
    pub cache_ttl: Duration,

    /// Maximum number of cached names
    pub max_cache_entries: usize,

    /// Order IPv4 addresses before IPv6 ones
    pub prefer_ipv4: bool,

    /// Port used for targets without one
    pub default_port: u16,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: timeout::DEFAULT_TIMEOUT,
            cache_ttl: Duration::from_secs(60),
            max_cache_entries: 256,
            prefer_ipv4: true,
            default_port: 8768,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.lookup_timeout.as_millis() < 10 {
            errors.push("Lookup timeout too short (minimum: 10ms)".to_string());
        }

        if self.max_cache_entries == 0 && !self.cache_ttl.is_zero() {
            errors.push("Max cache entries must be greater than 0 when caching".to_string());
        }

        if self.default_port == 0 {
            errors.push("Default port cannot be 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Base log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Per-target level directives of the form `target=level`
    #[serde(default)]
    pub levels: Vec<String>,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("endpoint-protocol"),
            log_level: Level::INFO,
            levels: vec![
                "tokio=warn".to_string(),
                "mio=warn".to_string(),
                "endpoint_protocol=info".to_string(),
            ],
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        for directive in &self.levels {
            let valid = directive
                .split_once('=')
                .map(|(target, level)| !target.is_empty() && level.parse::<Level>().is_ok())
                .unwrap_or(false);
            if !valid {
                errors.push(format!(
                    "Invalid level directive: '{directive}' (expected 'target=level')"
                ));
            }
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

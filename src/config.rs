//! Bridge configuration
//!
//! Loaded once at startup from a TOML file; every field has a default so an
//! empty file (or no file at all) yields a runnable bridge.

use onechan_shared::{parse_mac, GatewayIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One backend collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTarget {
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where the gateway stands, reported in every status frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub altitude: i32,
}

/// Static strings describing the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_description")]
    pub description: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            email: String::new(),
            description: default_description(),
        }
    }
}

/// Simulated radio link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioConfig {
    #[serde(default = "default_radio_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            listen: default_radio_listen(),
            max_payload: default_max_payload(),
        }
    }
}

/// Connectivity recovery timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First delay between transport restore attempts
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u32,
    /// Backoff ceiling
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u32,
    /// How long the link may stay down before the fallback access point
    #[serde(default = "default_link_window_secs")]
    pub link_window_secs: u32,
    /// How often the link layer is probed while connected
    #[serde(default = "default_link_probe_interval_ms")]
    pub link_probe_interval_ms: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            link_window_secs: default_link_window_secs(),
            link_probe_interval_ms: default_link_probe_interval_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn link_window_ms(&self) -> u32 {
        self.link_window_secs.saturating_mul(1000)
    }
}

/// Longest interval in seconds that still fits the millisecond timers
pub const MAX_INTERVAL_SECS: u32 = u32::MAX / 1000;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// 6-byte hardware address the gateway identity is derived from
    #[serde(default = "default_hardware_address")]
    pub hardware_address: String,

    /// Local port of the datagram transport
    #[serde(default = "default_local_port")]
    pub local_port: u16,

    #[serde(default = "default_servers")]
    pub servers: Vec<ServerTarget>,

    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u32,

    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u32,

    #[serde(default)]
    pub location: Location,

    #[serde(default)]
    pub profile: Profile,

    #[serde(default)]
    pub radio: RadioConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Correlate acknowledgements with outbound tokens (diagnostics only)
    #[serde(default)]
    pub track_tokens: bool,

    /// How long the loop sleeps after an iteration with nothing to do
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
}

fn default_hardware_address() -> String {
    "02:00:00:00:00:01".to_string()
}

fn default_local_port() -> u16 {
    1700
}

fn default_server_port() -> u16 {
    1700
}

fn default_servers() -> Vec<ServerTarget> {
    vec![ServerTarget {
        host: "router.eu.thethings.network".to_string(),
        port: default_server_port(),
    }]
}

fn default_keepalive_interval() -> u32 {
    31
}

fn default_status_interval() -> u32 {
    61
}

fn default_platform() -> String {
    "rust".to_string()
}

fn default_description() -> String {
    "Single channel gateway".to_string()
}

fn default_radio_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 1780))
}

fn default_max_payload() -> usize {
    onechan_shared::sim::MAX_RADIO_PAYLOAD
}

fn default_retry_interval_ms() -> u32 {
    1000
}

fn default_max_retry_interval_ms() -> u32 {
    30_000
}

fn default_link_window_secs() -> u32 {
    20
}

fn default_link_probe_interval_ms() -> u32 {
    5_000
}

fn default_idle_sleep_ms() -> u64 {
    5
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hardware_address: default_hardware_address(),
            local_port: default_local_port(),
            servers: default_servers(),
            keepalive_interval_secs: default_keepalive_interval(),
            status_interval_secs: default_status_interval(),
            location: Location::default(),
            profile: Profile::default(),
            radio: RadioConfig::default(),
            reconnect: ReconnectConfig::default(),
            track_tokens: false,
            idle_sleep_ms: default_idle_sleep_ms(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// File configuration if a path is given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::Invalid("No servers configured".into()));
        }

        for (i, server) in self.servers.iter().enumerate() {
            if server.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("Server {} has an empty host", i)));
            }
            if server.port == 0 {
                return Err(ConfigError::Invalid(format!("Server {} ({}) has port 0", i, server.host)));
            }
        }

        for (name, secs) in [
            ("keepalive_interval_secs", self.keepalive_interval_secs),
            ("status_interval_secs", self.status_interval_secs),
            ("reconnect.link_window_secs", self.reconnect.link_window_secs),
        ] {
            if secs == 0 || secs > MAX_INTERVAL_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {}",
                    name, MAX_INTERVAL_SECS
                )));
            }
        }

        parse_mac(&self.hardware_address).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if !(-90.0..=90.0).contains(&self.location.latitude) {
            return Err(ConfigError::Invalid(format!(
                "Latitude {} out of range",
                self.location.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.location.longitude) {
            return Err(ConfigError::Invalid(format!(
                "Longitude {} out of range",
                self.location.longitude
            )));
        }

        if self.radio.max_payload == 0 {
            return Err(ConfigError::Invalid("radio.max_payload must be non-zero".into()));
        }
        if self.reconnect.retry_interval_ms == 0
            || self.reconnect.max_retry_interval_ms < self.reconnect.retry_interval_ms
        {
            return Err(ConfigError::Invalid(
                "reconnect intervals must be non-zero and max >= initial".into(),
            ));
        }
        if self.reconnect.link_probe_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.link_probe_interval_ms must be non-zero".into(),
            ));
        }

        Ok(())
    }

    pub fn identity(&self) -> Result<GatewayIdentity, ConfigError> {
        parse_mac(&self.hardware_address)
            .map(GatewayIdentity::from_mac)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn keepalive_interval_ms(&self) -> u32 {
        self.keepalive_interval_secs.saturating_mul(1000)
    }

    pub fn status_interval_ms(&self) -> u32 {
        self.status_interval_secs.saturating_mul(1000)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PUPPERLINK_CONFIG or --config)
//! 3. Environment variables

use crate::session::ConnectionConfig;
use pupperlink_protocol::Firmware;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default serial device.
pub const DEFAULT_DEVICE: &str = "/dev/ttyAMA1";

/// Default line rate of the serial link.
pub const DEFAULT_BAUD_RATE: u32 = 3_000_000;

/// Default socket the proxy daemon listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/9Lq7BNBnBycd6nxy.socket";

/// Default calibration record location.
pub const DEFAULT_CALIBRATION_PATH: &str = "/home/ubuntu/nvmem";

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub poller: PollerConfig,
    pub calibration: CalibrationConfig,
}

impl Config {
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

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides looked up by variable name. Unparsable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.transport.apply_overrides(&lookup);
        self.session.apply_overrides(&lookup);

        if let Some(path) = lookup("PUPPERLINK_CALIBRATION") {
            self.calibration.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.transport.kind {
            TransportKind::Serial if self.transport.device.as_os_str().is_empty() => {
                return Err(ConfigError::ValidationError(
                    "transport.device must not be empty".to_string(),
                ));
            }
            TransportKind::Unix if self.transport.socket_path.as_os_str().is_empty() => {
                return Err(ConfigError::ValidationError(
                    "transport.socket_path must not be empty".to_string(),
                ));
            }
            _ => {}
        }
        if self.session.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "session.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.poller.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poller.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.poller.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "poller.channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.calibration.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "calibration.path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the in-process session settings.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new()
            .with_request_timeout(self.session.request_timeout())
            .with_read_buffer_size(self.session.read_buffer_size)
            .with_firmware(self.session.firmware)
    }
}

/// Kind of link to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Serial,
    Unix,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(TransportKind::Serial),
            "unix" => Ok(TransportKind::Unix),
            other => Err(format!("unknown transport '{}' (expected serial or unix)", other)),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Serial device path.
    pub device: PathBuf,
    /// Line rate applied to the serial device when it is opened.
    pub baud_rate: u32,
    /// UNIX socket path, used by the unix transport and the proxy client.
    pub socket_path: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Serial,
            device: PathBuf::from(DEFAULT_DEVICE),
            baud_rate: DEFAULT_BAUD_RATE,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

impl TransportConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(kind) = lookup("PUPPERLINK_TRANSPORT") {
            if let Ok(parsed) = kind.parse() {
                self.kind = parsed;
            }
        }

        if let Some(device) = lookup("PUPPERLINK_DEVICE") {
            self.device = PathBuf::from(device);
        }

        if let Some(path) = lookup("PUPPERLINK_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }
    }
}

/// Request/response session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on waiting for a matching response, in milliseconds.
    pub request_timeout_ms: u64,
    /// Bytes read from the transport per call.
    pub read_buffer_size: usize,
    /// Code table of the attached controller.
    pub firmware: Firmware,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 500,
            read_buffer_size: 256,
            firmware: Firmware::Current,
        }
    }
}

impl SessionConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(timeout) = lookup("PUPPERLINK_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.request_timeout_ms = ms;
            }
        }

        if let Some(firmware) = lookup("PUPPERLINK_FIRMWARE") {
            if let Ok(parsed) = firmware.parse() {
                self.firmware = parsed;
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Periodic poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Tick period in milliseconds.
    pub interval_ms: u64,
    /// Samples buffered before new ones are dropped.
    pub channel_capacity: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10,
            channel_capacity: 64,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Calibration store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub path: PathBuf,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CALIBRATION_PATH),
        }
    }
}

/// Configuration errors.
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

impl std::error::Error for ConfigError {}

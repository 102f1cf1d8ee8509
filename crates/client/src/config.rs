//! Configuration management for the access point client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/apconnect/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::proto::Platform;
use protocol::{HandshakeConfig, ServerKey, TagPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoint::AccessPoint;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("access_points must contain at least one host:port entry")]
    NoAccessPoints,

    #[error("access point must be host:port, got {0}")]
    InvalidAccessPoint(String),

    #[error("connect_timeout_secs must be greater than 0")]
    InvalidConnectTimeout,

    #[error("handshake_check_window_ms must be at most 10000, got {0}")]
    InvalidCheckWindow(u64),

    #[error("audio_key_timeout_ms must be greater than 0")]
    InvalidAudioKeyTimeout,

    #[error("locale must be 2 to 5 ASCII letters, digits or '_' / '-', got {0}")]
    InvalidLocale(String),

    #[error("tag_policy must be one of: enforce, lenient; got {0}")]
    InvalidTagPolicy(String),

    #[error("platform must be a known build platform such as win32-x86 or linux-x86-64, got {0}")]
    InvalidPlatform(String),

    #[error("server_key_modulus is not a usable RSA modulus: {0}")]
    InvalidServerKey(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for the post-response check window.
const MAX_CHECK_WINDOW_MS: u64 = 10_000;

const PLATFORMS: &[(&str, Platform)] = &[
    ("win32-x86", Platform::Win32X86),
    ("win32-x86-64", Platform::Win32X8664),
    ("osx-x86", Platform::OsxX86),
    ("osx-x86-64", Platform::OsxX8664),
    ("linux-x86", Platform::LinuxX86),
    ("linux-x86-64", Platform::LinuxX8664),
    ("linux-arm", Platform::LinuxArm),
    ("iphone-arm", Platform::IphoneArm),
    ("android-arm", Platform::AndroidArm),
];

/// Main configuration structure for the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Identity and logging.
    pub client: ClientConfig,

    /// Access point selection and handshake timing.
    pub network: NetworkConfig,

    /// Runtime session behavior.
    pub session: SessionSettings,

    /// Build information announced in the client hello.
    pub build: BuildConfig,
}

/// Identity and logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Device identifier sent at login. Empty means a random id per session.
    pub device_id: String,

    /// Human readable device name, reported in the login system information.
    pub device_name: String,

    /// Locale announced after login.
    pub locale: String,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Candidate access points, tried in order.
    pub access_points: Vec<String>,

    /// TCP connect timeout per candidate, in seconds.
    pub connect_timeout_secs: u64,

    /// How long to wait for a rejection after the client response, in milliseconds.
    pub handshake_check_window_ms: u64,

    /// Hex-encoded modulus of the key that signs the server's DH value.
    /// Empty means the built-in production key.
    pub server_key_modulus: String,
}

/// Session runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    /// Receive tag handling (enforce, lenient).
    pub tag_policy: String,

    /// Audio key request timeout, in milliseconds.
    pub audio_key_timeout_ms: u64,
}

/// Build information configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Platform announced in the hello.
    pub platform: String,

    /// Build version announced in the hello.
    pub version: u64,

    /// Version string sent with the login.
    pub version_string: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            device_id: String::new(),
            device_name: "apconnect".to_string(),
            locale: "en".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            access_points: vec![
                "ap.spotify.com:443".to_string(),
                "ap.spotify.com:4070".to_string(),
                "ap.spotify.com:80".to_string(),
            ],
            connect_timeout_secs: 10,
            handshake_check_window_ms: 300,
            server_key_modulus: String::new(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tag_policy: TagPolicy::default().to_string(),
            audio_key_timeout_ms: 5000,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            platform: "win32-x86".to_string(),
            version: protocol::handshake::DEFAULT_BUILD_VERSION,
            version_string: "1.0".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("apconnect")
        .join("config.toml")
}

fn parse_platform(name: &str) -> Option<Platform> {
    let name = name.to_lowercase();
    PLATFORMS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, platform)| *platform)
}

fn valid_locale(locale: &str) -> bool {
    (2..=5).contains(&locale.len())
        && locale
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Runtime settings derived from a validated [`Config`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub access_points: Vec<AccessPoint>,
    /// Empty means generate one per session.
    pub device_id: String,
    pub device_name: String,
    pub locale: String,
    pub tag_policy: TagPolicy,
    pub connect_timeout: Duration,
    pub check_window: Duration,
    pub audio_key_timeout: Duration,
    pub platform: Platform,
    pub version: u64,
    pub version_string: String,
    /// `None` selects the production key.
    pub server_key: Option<ServerKey>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_points: Vec::new(),
            device_id: String::new(),
            device_name: "apconnect".to_string(),
            locale: "en".to_string(),
            tag_policy: TagPolicy::Enforce,
            connect_timeout: Duration::from_secs(10),
            check_window: Duration::from_millis(300),
            audio_key_timeout: Duration::from_millis(5000),
            platform: Platform::Win32X86,
            version: protocol::handshake::DEFAULT_BUILD_VERSION,
            version_string: "1.0".to_string(),
            server_key: None,
        }
    }
}

impl SessionConfig {
    /// Handshake parameters for one connection attempt.
    pub fn handshake_config(&self) -> protocol::Result<HandshakeConfig> {
        let server_key = match &self.server_key {
            Some(key) => key.clone(),
            None => ServerKey::production()?,
        };
        Ok(HandshakeConfig {
            platform: self.platform,
            version: self.version,
            server_key,
        })
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - APCONNECT_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - APCONNECT_ACCESS_POINT: Replace the access point list with a single host:port
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("APCONNECT_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.client.log_level = level;
            }
        }

        if let Ok(ap) = std::env::var("APCONNECT_ACCESS_POINT") {
            if !ap.is_empty() {
                tracing::info!("Overriding access_points from environment: {}", ap);
                self.network.access_points = vec![ap];
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.client.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.client.log_level.clone()));
        }

        if self.network.access_points.is_empty() {
            return Err(ConfigError::NoAccessPoints);
        }
        for entry in &self.network.access_points {
            if entry.parse::<AccessPoint>().is_err() {
                return Err(ConfigError::InvalidAccessPoint(entry.clone()));
            }
        }

        if self.network.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConnectTimeout);
        }

        if self.network.handshake_check_window_ms > MAX_CHECK_WINDOW_MS {
            return Err(ConfigError::InvalidCheckWindow(
                self.network.handshake_check_window_ms,
            ));
        }

        if self.session.audio_key_timeout_ms == 0 {
            return Err(ConfigError::InvalidAudioKeyTimeout);
        }

        if !valid_locale(&self.client.locale) {
            return Err(ConfigError::InvalidLocale(self.client.locale.clone()));
        }

        if self.session.tag_policy.parse::<TagPolicy>().is_err() {
            return Err(ConfigError::InvalidTagPolicy(
                self.session.tag_policy.clone(),
            ));
        }

        if parse_platform(&self.build.platform).is_none() {
            return Err(ConfigError::InvalidPlatform(self.build.platform.clone()));
        }

        self.server_key()?;

        Ok(())
    }

    fn server_key(&self) -> Result<Option<ServerKey>, ConfigError> {
        let modulus = self.network.server_key_modulus.trim();
        if modulus.is_empty() {
            return Ok(None);
        }
        let bytes =
            hex::decode(modulus).map_err(|e| ConfigError::InvalidServerKey(e.to_string()))?;
        ServerKey::from_modulus(&bytes, protocol::handshake::SERVER_KEY_EXPONENT)
            .map(Some)
            .map_err(|e| ConfigError::InvalidServerKey(e.to_string()))
    }

    /// Validate and derive the runtime session settings.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        self.validate()?;

        let access_points = self
            .network
            .access_points
            .iter()
            .map(|entry| {
                entry
                    .parse::<AccessPoint>()
                    .map_err(|_| ConfigError::InvalidAccessPoint(entry.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tag_policy = self
            .session
            .tag_policy
            .parse::<TagPolicy>()
            .map_err(|_| ConfigError::InvalidTagPolicy(self.session.tag_policy.clone()))?;

        let platform = parse_platform(&self.build.platform)
            .ok_or_else(|| ConfigError::InvalidPlatform(self.build.platform.clone()))?;

        Ok(SessionConfig {
            access_points,
            device_id: self.client.device_id.clone(),
            device_name: self.client.device_name.clone(),
            locale: self.client.locale.clone(),
            tag_policy,
            connect_timeout: Duration::from_secs(self.network.connect_timeout_secs),
            check_window: Duration::from_millis(self.network.handshake_check_window_ms),
            audio_key_timeout: Duration::from_millis(self.session.audio_key_timeout_ms),
            platform,
            version: self.build.version,
            version_string: self.build.version_string.clone(),
            server_key: self.server_key()?,
        })
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/apconnect/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

//! Configuration management for LocalShare.
//!
//! This module handles loading, saving, and managing LocalShare configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/localshare/config.toml` |
//! | macOS | `~/Library/Application Support/LocalShare/config.toml` |
//! | Windows | `%APPDATA%\LocalShare\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use localshare_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Relay: {}", config.client.relay_url);
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for LocalShare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay server settings
    pub relay: RelayConfig,
    /// Client settings
    pub client: ClientConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind
    pub bind: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Websocket endpoint path
    pub ws_path: String,
    /// Per-client outbound message queue; a client that lets it fill up is evicted
    pub outbound_capacity: usize,
    /// Honour the first `X-Forwarded-For` address when grouping
    pub trust_forwarded_for: bool,
    /// Directory served as fallback for the browser UI bundle
    pub static_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: crate::DEFAULT_RELAY_PORT,
            ws_path: "/ws".to_string(),
            outbound_capacity: 256,
            trust_forwarded_for: true,
            static_dir: None,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Websocket URL of the relay
    pub relay_url: String,
    /// Fixed delay between reconnect attempts
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
    /// Sessions that do not connect within this window are closed
    #[serde(with = "humantime_serde")]
    pub session_setup_timeout: Duration,
    /// Connected sessions without transfers are closed after this long
    #[serde(with = "humantime_serde")]
    pub session_idle_timeout: Duration,
    /// Active download without progress for this long is aborted
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,
    /// Address advertised in transport candidates (auto-detected if unset)
    pub advertise_addr: Option<IpAddr>,
    /// Default output directory for downloads
    pub output_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: format!("ws://127.0.0.1:{}/ws", crate::DEFAULT_RELAY_PORT),
            reconnect_backoff: Duration::from_secs(3),
            session_setup_timeout: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(120),
            download_timeout: Duration::from_secs(60),
            advertise_addr: None,
            output_dir: None,
        }
    }
}

/// Transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum bytes per chunk frame
    pub chunk_size: usize,
    /// Extra pause between chunks on top of the cooperative yield
    #[serde(with = "humantime_serde")]
    pub chunk_pause: Duration,
    /// Outgoing frame queue per peer channel
    pub channel_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            chunk_pause: Duration::ZERO,
            channel_capacity: 64,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would break the protocol at runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > crate::MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig {
                key: "transfer.chunk_size".to_string(),
                reason: format!("must be between 1 and {} bytes", crate::MAX_CHUNK_SIZE),
            });
        }
        if self.transfer.channel_capacity == 0 {
            return Err(Error::InvalidConfig {
                key: "transfer.channel_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.relay.outbound_capacity == 0 {
            return Err(Error::InvalidConfig {
                key: "relay.outbound_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.relay.ws_path.starts_with('/') {
            return Err(Error::InvalidConfig {
                key: "relay.ws_path".to_string(),
                reason: "must start with '/'".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "localshare", "LocalShare")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        if millis % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{millis}ms"))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration format: {s}")))
    }
}

/// Parse a duration string like "250ms", "30s", "5m" or "2h".
#[must_use]
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    if let Some(hours) = s.strip_suffix('h') {
        return hours
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.relay.port, crate::DEFAULT_RELAY_PORT);
        assert_eq!(config.relay.ws_path, "/ws");
        assert_eq!(config.transfer.chunk_size, crate::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.client.reconnect_backoff, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = Config::default();
        original.relay.port = 4040;
        original.client.relay_url = "ws://10.0.0.2:4040/ws".to_string();
        original.transfer.chunk_size = 16 * 1024;
        original.transfer.chunk_pause = Duration::from_millis(5);

        let content = toml::to_string_pretty(&original).expect("serialize");
        std::fs::write(&config_path, &content).expect("write");

        let loaded_content = std::fs::read_to_string(&config_path).expect("read");
        let loaded: Config = toml::from_str(&loaded_content).expect("parse");

        assert_eq!(loaded.relay.port, 4040);
        assert_eq!(loaded.client.relay_url, "ws://10.0.0.2:4040/ws");
        assert_eq!(loaded.transfer.chunk_size, 16 * 1024);
        assert_eq!(loaded.transfer.chunk_pause, Duration::from_millis(5));
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[relay]
port = 9999

[client]
download_timeout = "2m"
"#;

        let config: Config = toml::from_str(partial_toml).expect("parse partial config");

        assert_eq!(config.relay.port, 9999);
        assert_eq!(config.client.download_timeout, Duration::from_secs(120));
        assert_eq!(config.relay.outbound_capacity, 256);
        assert_eq!(config.transfer.chunk_size, crate::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_config_serialization_sections() {
        let toml_str = toml::to_string_pretty(&Config::default()).expect("serialize");

        assert!(toml_str.contains("[relay]"));
        assert!(toml_str.contains("[client]"));
        assert!(toml_str.contains("[transfer]"));
        assert!(toml_str.contains("reconnect_backoff = \"3s\""));
    }

    #[test]
    fn test_config_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { ref key, .. }) if key == "transfer.chunk_size"
        ));

        let mut config = Config::default();
        config.relay.ws_path = "ws".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().ends_with("config.toml"));
    }
}

//! Configuration management for nvrlink.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/nvrlink/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("port must be greater than 0")]
    InvalidPort,

    #[error("scheme must be http or https, got {0}")]
    InvalidScheme(String),

    #[error("timeout_secs must be between 1 and 300 seconds, got {0}")]
    InvalidTimeout(u64),

    #[error("{field} must start with '/', got {value}")]
    InvalidPath { field: &'static str, value: String },

    #[error("device address does not form a valid URL: {0}")]
    InvalidAddress(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Recorder address and account.
    pub device: DeviceConfig,

    /// HTTP transport settings.
    pub transport: TransportConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Recorder address and account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hostname or IP address of the recorder.
    pub host: String,

    /// HTTP port.
    pub port: u16,

    /// `http` or `https`.
    pub scheme: String,

    /// Account name used to log in.
    pub username: String,
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Login endpoint.
    pub login_path: String,

    /// Regular RPC endpoint.
    pub rpc_path: String,

    /// Endpoint serving pre-authentication commands.
    pub outside_cmd_path: String,

    /// Digest-protected CGI resource used for capability discovery.
    pub probe_path: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.108".to_string(),
            port: 80,
            scheme: "http".to_string(),
            username: "admin".to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            login_path: "/RPC2_Login".to_string(),
            rpc_path: "/RPC2".to_string(),
            outside_cmd_path: "/OutsideCmd".to_string(),
            probe_path: "/cgi-bin/magicBox.cgi?action=getSystemInfo".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl TransportConfig {
    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nvrlink")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - NVRLINK_HOST: Override recorder host
    /// - NVRLINK_PORT: Override recorder port
    /// - NVRLINK_USERNAME: Override account name
    /// - NVRLINK_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("NVRLINK_HOST") {
            if !host.is_empty() {
                tracing::info!("Overriding host from environment: {}", host);
                self.device.host = host;
            }
        }

        if let Ok(port) = std::env::var("NVRLINK_PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.device.port = port;
                    }
                    Err(_) => {
                        tracing::warn!("Ignoring non-numeric NVRLINK_PORT: {}", port);
                    }
                }
            }
        }

        if let Ok(username) = std::env::var("NVRLINK_USERNAME") {
            if !username.is_empty() {
                tracing::info!("Overriding username from environment: {}", username);
                self.device.username = username;
            }
        }

        if let Ok(level) = std::env::var("NVRLINK_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if self.device.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let scheme = self.device.scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ConfigError::InvalidScheme(self.device.scheme.clone()));
        }

        if !(1..=300).contains(&self.transport.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.transport.timeout_secs));
        }

        let paths = [
            ("login_path", &self.transport.login_path),
            ("rpc_path", &self.transport.rpc_path),
            ("outside_cmd_path", &self.transport.outside_cmd_path),
            ("probe_path", &self.transport.probe_path),
        ];
        for (field, value) in paths {
            if !value.starts_with('/') {
                return Err(ConfigError::InvalidPath {
                    field,
                    value: value.clone(),
                });
            }
        }

        Url::parse(&self.base_url()).map_err(|e| ConfigError::InvalidAddress(e.to_string()))?;

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        Ok(())
    }

    /// `scheme://host:port` of the recorder.
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.device.scheme.to_lowercase(),
            self.device.host.trim(),
            self.device.port
        )
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
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

fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for var in [
            "NVRLINK_HOST",
            "NVRLINK_PORT",
            "NVRLINK_USERNAME",
            "NVRLINK_LOG_LEVEL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.device.port, 80);
        assert_eq!(config.device.scheme, "http");
        assert_eq!(config.device.username, "admin");
        assert_eq!(config.transport.timeout_secs, 10);
        assert_eq!(config.transport.login_path, "/RPC2_Login");
        assert_eq!(config.transport.rpc_path, "/RPC2");
        assert_eq!(config.transport.outside_cmd_path, "/OutsideCmd");
        assert_eq!(config.logging.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("nvrlink/config.toml"));
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[device]
host = "10.0.0.5"
port = 8080

[transport]
timeout_secs = 30
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.device.host, "10.0.0.5");
        assert_eq!(config.device.port, 8080);
        assert_eq!(config.device.username, "admin");
        assert_eq!(config.transport.timeout_secs, 30);
        assert_eq!(config.transport.rpc_path, "/RPC2");
        assert_eq!(config.base_url(), "http://10.0.0.5:8080");
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = Config::from_toml("[device\nhost = 1").unwrap_err();
        assert!(err.to_string().contains("Invalid TOML configuration"));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = Config::default();
        original.device.host = "nvr.local".to_string();
        original.logging.log_level = "debug".to_string();

        original.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_save_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        Config::default().save(&config_path).unwrap();
        assert!(config_path.exists());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.device.host = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyHost));

        let mut config = Config::default();
        config.device.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));

        let mut config = Config::default();
        config.device.scheme = "ftp".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidScheme("ftp".to_string()))
        );

        let mut config = Config::default();
        config.transport.timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout(0)));
        config.transport.timeout_secs = 301;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout(301)));

        let mut config = Config::default();
        config.transport.rpc_path = "RPC2".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPath {
                field: "rpc_path",
                value: "RPC2".to_string()
            })
        );

        let mut config = Config::default();
        config.device.host = "bad host".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress(_))
        ));

        let mut config = Config::default();
        config.logging.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_accepts_uppercase_values() {
        let mut config = Config::default();
        config.device.scheme = "HTTPS".to_string();
        config.logging.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
        assert!(config.base_url().starts_with("https://"));
    }

    #[test]
    #[serial]
    fn test_env_override_host_and_port() {
        clear_env();
        std::env::set_var("NVRLINK_HOST", "10.1.2.3");
        std::env::set_var("NVRLINK_PORT", "8443");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.device.host, "10.1.2.3");
        assert_eq!(config.device.port, 8443);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_is_ignored() {
        clear_env();
        std::env::set_var("NVRLINK_PORT", "eighty");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.device.port, 80);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("NVRLINK_USERNAME", "");
        std::env::set_var("NVRLINK_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.device.username, "admin");
        assert_eq!(config.logging.log_level, "info");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_username_and_log_level() {
        clear_env();
        std::env::set_var("NVRLINK_USERNAME", "operator");
        std::env::set_var("NVRLINK_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.device.username, "operator");
        assert_eq!(config.logging.log_level, "trace");

        clear_env();
    }
}

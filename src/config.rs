//! Configuration
//!
//! Configuration structures for the coordinator server and the interactive client.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Outbound events buffered per connection before new ones are dropped
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Plain TCP when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub signaling: SignalingConfig,
}

/// PEM certificate and key used to terminate TLS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub certfile: PathBuf,
    pub keyfile: PathBuf,
}

/// Call-tracking switches. Both off reproduces plain id-addressed forwarding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Send `callEnded` to the partner of a user whose last connection closes mid-call
    #[serde(default)]
    pub end_calls_on_disconnect: bool,
    /// Drop answers, candidates and hang-ups that don't match a tracked call
    #[serde(default)]
    pub enforce_call_state: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            outbox_capacity: default_outbox_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            log_level: default_log_level(),
            tls: None,
            signaling: SignalingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbox_capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    /// Identity announced with `addUser` right after connecting
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            port: default_port(),
            tls: false,
            user_id: None,
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.outbox_capacity, 256);
        assert_eq!(config.max_frame_bytes, 64 * 1024);
        assert!(config.tls.is_none());
        assert!(!config.signaling.end_calls_on_disconnect);
        assert!(!config.signaling.enforce_call_state);
    }

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_host, "127.0.0.1");
        assert_eq!(config.port, 5000);
        assert!(!config.tls);
    }

    #[test]
    fn test_partial_server_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port = 7000\n\n[signaling]\nend_calls_on_disconnect = true\n\n[tls]\ncertfile = \"a.crt\"\nkeyfile = \"a.key\""
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.signaling.end_calls_on_disconnect);
        assert!(!config.signaling.enforce_call_state);
        let tls = config.tls.unwrap();
        assert_eq!(tls.certfile, PathBuf::from("a.crt"));
    }

    #[test]
    fn test_zero_outbox_capacity_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "outbox_capacity = 0").unwrap();

        let result = ServerConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ServerConfig::from_file("/nonexistent/duo-chat/server.toml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_garbage_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        let result = ClientConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}

//! Configuration settings for graphcall.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RpcError;

/// Main configuration structure.
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind (e.g., "0.0.0.0").
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Accept backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

/// Connection handshake configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeConfig {
    /// Fixed value the dialing side must send.
    pub secret: Option<String>,
    /// Path to an HMAC key for challenge-response authentication.
    pub hmac_secret_path: Option<PathBuf>,
    /// How long to wait for a new connection's credential, in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
    /// Total wall-clock budget of one accept call, in seconds.
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_seconds: u64,
}

/// Client-role configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Connect and handshake timeout in seconds.
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_seconds: u64,
    /// Reply timeout per call in seconds (0 waits indefinitely).
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
}

/// Wire protocol configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Maximum payload bytes per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Maximum reassembled message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Bounded receive wait of the dispatch loop, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_backlog() -> u32 {
    5
}

fn default_socket_timeout() -> u64 {
    10
}

fn default_accept_timeout() -> u64 {
    60
}

fn default_dial_timeout() -> u64 {
    10
}

fn default_call_timeout() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024
}

fn default_poll_interval() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            secret: None,
            hmac_secret_path: None,
            socket_timeout_seconds: default_socket_timeout(),
            accept_timeout_seconds: default_accept_timeout(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dial_timeout_seconds: default_dial_timeout(),
            call_timeout_seconds: default_call_timeout(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_message_size: default_max_message_size(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ProtocolConfig {
    /// Dispatch loop receive bound.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ClientConfig {
    /// Per-call reply timeout, `None` when unbounded.
    pub fn call_timeout(&self) -> Option<Duration> {
        match self.call_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RpcError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RpcError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::parse(&content).map_err(|e| match e {
            RpcError::Config { message } => RpcError::Config {
                message: format!("{} ({})", message, path.display()),
            },
            other => other,
        })
    }

    /// Parse and validate settings from TOML text.
    pub fn parse(content: &str) -> Result<Self, RpcError> {
        let settings: Settings = toml::from_str(content).map_err(|e| RpcError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), RpcError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(RpcError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(RpcError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if self.protocol.chunk_size == 0 {
            return Err(RpcError::Config {
                message: "protocol.chunk_size must be at least 1".to_string(),
            });
        }

        if self.protocol.poll_interval_ms == 0 {
            return Err(RpcError::Config {
                message: "protocol.poll_interval_ms must be at least 1".to_string(),
            });
        }

        if self.handshake.secret.is_some() && self.handshake.hmac_secret_path.is_some() {
            return Err(RpcError::Config {
                message: "handshake.secret and handshake.hmac_secret_path are mutually exclusive"
                    .to_string(),
            });
        }

        Ok(())
    }
}

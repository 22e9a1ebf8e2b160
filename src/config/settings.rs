//! Hub settings
//!
//! Loads server, hub and auth settings from a TOML file. Every field has a
//! default, so a missing file or a partial file is fine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::hub::DEFAULT_OUTBOX_CAPACITY;

/// Default configuration file name
pub const CONFIG_FILE: &str = "poll-hub.toml";

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Request path accepted for the WebSocket upgrade
    pub path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            path: "/api/ws".to_string(),
        }
    }
}

impl ServerSettings {
    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Per-connection limits and keepalive timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubSettings {
    /// Payloads a connection may have queued before it is dropped
    pub outbox_capacity: usize,
    /// Seconds between keepalive pings
    pub ping_interval_secs: u64,
    /// Seconds without any inbound frame before a connection is closed
    pub idle_timeout_secs: u64,
    /// Seconds allowed for a single frame write
    pub write_timeout_secs: u64,
    /// Seconds a new socket has to complete the upgrade request
    pub handshake_timeout_secs: u64,
    /// Largest inbound message accepted, in bytes
    pub max_message_size: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            ping_interval_secs: 54,
            idle_timeout_secs: 60,
            write_timeout_secs: 10,
            handshake_timeout_secs: 10,
            max_message_size: 512,
        }
    }
}

impl HubSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Token verification settings
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    /// HMAC secret shared with the service issuing tokens
    pub jwt_secret: Option<String>,
    /// Lifetime of tokens minted by the `token` command
    pub token_ttl_hours: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: 24,
        }
    }
}

impl AuthSettings {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_hours * 60 * 60)
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("token_ttl_hours", &self.token_ttl_hours)
            .finish()
    }
}

/// Complete hub configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub auth: AuthSettings,
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults if it does
    /// not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check limits and timings for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.path must start with '/', got {:?}",
                self.server.path
            )));
        }

        let hub = &self.hub;
        if hub.outbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.outbox_capacity must be at least 1".to_string(),
            ));
        }
        if hub.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "hub.max_message_size must be at least 1".to_string(),
            ));
        }
        if hub.ping_interval_secs == 0
            || hub.write_timeout_secs == 0
            || hub.handshake_timeout_secs == 0
        {
            return Err(ConfigError::Invalid(
                "hub timeouts must be non-zero".to_string(),
            ));
        }
        if hub.ping_interval_secs >= hub.idle_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "hub.ping_interval_secs ({}) must be shorter than hub.idle_timeout_secs ({})",
                hub.ping_interval_secs, hub.idle_timeout_secs
            )));
        }

        Ok(())
    }
}

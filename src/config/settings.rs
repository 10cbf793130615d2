use serde::Deserialize;

use crate::utils::error::{InfocenterError, Result};

/// Top-level configuration settings for the application.
///
/// Includes settings for the HTTP server, the event stream and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub stream: StreamSettings,
    pub log: LogSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration settings for subscriber streams.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StreamSettings {
    /// Path prefix every topic lives under: `/<service_name>/<topic>`.
    pub service_name: String,
    /// Seconds a subscriber may stay connected before it receives the
    /// timeout event and is disconnected.
    pub max_connection_secs: u64,
    /// Frames a session may queue ahead of a slow HTTP writer.
    pub frame_buffer: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub stream: Option<PartialStreamSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialStreamSettings {
    pub service_name: Option<String>,
    pub max_connection_secs: Option<u64>,
    pub frame_buffer: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let stream = self.stream.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            stream: StreamSettings {
                service_name: stream.service_name.unwrap_or(default.stream.service_name),
                max_connection_secs: stream
                    .max_connection_secs
                    .unwrap_or(default.stream.max_connection_secs),
                frame_buffer: stream.frame_buffer.unwrap_or(default.stream.frame_buffer),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

impl Settings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Rejects values the stream layer cannot work with.
    pub fn validate(&self) -> Result<()> {
        let name = &self.stream.service_name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(InfocenterError::InvalidConfig(format!(
                "service_name must be non-empty and use [a-z0-9_-], got {name:?}"
            )));
        }
        if self.stream.max_connection_secs == 0 {
            return Err(InfocenterError::InvalidConfig(
                "max_connection_secs must be greater than zero".to_string(),
            ));
        }
        if self.stream.frame_buffer == 0 {
            return Err(InfocenterError::InvalidConfig(
                "frame_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            stream: StreamSettings {
                service_name: "infocenter".to_string(),
                max_connection_secs: 30,
                frame_buffer: 16,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

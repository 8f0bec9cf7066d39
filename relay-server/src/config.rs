use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{RelayError, Result};

/// Main configuration for the relay server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub relay: RelayConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Session limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Sessions that may be assembling or running at once
    pub max_sessions: usize,
    /// Largest group a session may declare
    pub max_group_size: usize,
    /// Time a new connection has to send its hello
    pub handshake_timeout_secs: u64,
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    pub log_file_path: String,
    pub log_format: String,
}

impl RelayConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            relay: RelayConfig {
                max_sessions: 64,
                max_group_size: 256,
                handshake_timeout_secs: 10,
            },
            network: NetworkConfig {
                listen_addr: "0.0.0.0:7400".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_to_file: false,
                log_file_path: "~/.rowcast/logs/relay.log".to_string(),
                log_format: "pretty".to_string(),
            },
        }
    }
}

impl Config {
    /// Get default configuration file path: `~/.rowcast/relay.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| RelayError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(".rowcast").join("relay.toml"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.network
            .listen_addr
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid listen address: {}", e)))
    }

    /// Set the listen port, keeping the configured host
    pub fn override_port(&mut self, port: u16) -> Result<()> {
        let mut addr = self.listen_addr()?;
        addr.set_port(port);
        self.network.listen_addr = addr.to_string();
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.relay.max_sessions == 0 || self.relay.max_sessions > 10000 {
            return Err(RelayError::Config(
                "max_sessions must be between 1 and 10000".into(),
            ));
        }

        if self.relay.max_group_size == 0 {
            return Err(RelayError::Config(
                "max_group_size must be at least 1".into(),
            ));
        }

        if self.relay.handshake_timeout_secs == 0 {
            return Err(RelayError::Config(
                "handshake_timeout_secs must be at least 1".into(),
            ));
        }

        self.listen_addr()?;

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(RelayError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        match self.logging.log_format.as_str() {
            "pretty" | "json" => {}
            _ => {
                return Err(RelayError::Config(
                    "log_format must be 'pretty' or 'json'".into(),
                ))
            }
        }

        Ok(())
    }

    /// Save configuration to file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!(
                    path = %parent.display(),
                    error = %e,
                    "Failed to create config directory"
                );
                e
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string)?;
        std::fs::rename(&temp_path, path).map_err(|e| {
            tracing::error!(
                from = %temp_path.display(),
                to = %path.display(),
                error = %e,
                "Failed to rename temp config file"
            );
            e
        })?;

        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AgentError, Result};

/// Agent configuration, stored as TOML at `~/.rowcast/agent.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub group: GroupConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// How worker ranks find each other
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// `host:port` of the relay used by `rowcast worker`
    pub relay_addr: String,
    /// How long a worker waits for the rest of its group to join
    pub rendezvous_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Gather and print the result matrix on rank 0
    pub print_matrix: bool,
    /// Also print the matrix as loaded, before relaxation
    pub print_initial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
    pub log_to_file: bool,
    pub log_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            group: GroupConfig {
                relay_addr: "127.0.0.1:7400".to_string(),
                rendezvous_timeout_secs: 30,
            },
            output: OutputConfig {
                print_matrix: true,
                print_initial: true,
            },
            logging: LoggingConfig {
                level: "warn".to_string(),
                format: "pretty".to_string(),
                log_to_file: false,
                log_dir: "~/.rowcast/logs".to_string(),
            },
        }
    }
}

impl Config {
    /// Default configuration file path: `~/.rowcast/agent.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| AgentError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(".rowcast").join("agent.toml"))
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Load `path` if given, else the default path if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Ok(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.group.relay_addr.trim().is_empty() {
            return Err(AgentError::Config("relay_addr must not be empty".into()));
        }
        if !self.group.relay_addr.contains(':') {
            return Err(AgentError::Config(format!(
                "relay_addr '{}' must be host:port",
                self.group.relay_addr
            )));
        }

        if self.group.rendezvous_timeout_secs == 0 || self.group.rendezvous_timeout_secs > 3600 {
            return Err(AgentError::Config(
                "rendezvous_timeout_secs must be between 1 and 3600".into(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(AgentError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => {
                return Err(AgentError::Config(
                    "log format must be 'pretty' or 'json'".into(),
                ))
            }
        }

        Ok(())
    }

    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_secs(self.group.rendezvous_timeout_secs)
    }

    /// Log directory with `~` expanded
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.logging.log_dir).into_owned())
    }

    /// Save configuration to file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;

        // Write to a sibling temp file, then rename over the target
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string).map_err(|e| {
            tracing::error!(path = %temp_path.display(), error = %e, "Failed to write temp config file");
            e
        })?;
        std::fs::rename(&temp_path, path)?;

        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}

use thiserror::Error;

/// Errors that can occur on a rank.
#[derive(Error, Debug)]
pub enum AgentError {
    /// IO error occurred (file operations, sockets, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, bad group parameters, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (relay unreachable, peer lost, channel closed, etc.)
    #[error("Network error: {0}")]
    Network(String),

    /// Matrix file is malformed or truncated
    #[error("Matrix format error: {0}")]
    Matrix(String),

    /// Matrix shape cannot be processed by this group
    #[error("Shape error: {0}")]
    Shape(String),

    /// Local storage or pivot buffer could not be allocated
    #[error("Resource error: {0}")]
    Resource(String),

    /// A peer sent a frame that does not fit the collective being run
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The group agreed that it cannot proceed; identical on every rank
    #[error("Rank {rank} failed: {reason}")]
    GroupFailure { rank: usize, reason: String },

    /// Another rank aborted the group
    #[error("Group aborted by rank {rank}: {reason}")]
    Aborted { rank: usize, reason: String },
}

impl AgentError {
    /// True when every rank of the group already observes this error, so no
    /// abort needs to be sent.
    pub fn is_group_wide(&self) -> bool {
        matches!(
            self,
            AgentError::GroupFailure { .. } | AgentError::Aborted { .. }
        )
    }
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<toml::ser::Error> for AgentError {
    fn from(e: toml::ser::Error) -> Self {
        AgentError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(e: toml::de::Error) -> Self {
        AgentError::Serialization(e.to_string())
    }
}

impl From<std::collections::TryReserveError> for AgentError {
    fn from(e: std::collections::TryReserveError) -> Self {
        AgentError::Resource(e.to_string())
    }
}

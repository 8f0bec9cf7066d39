use thiserror::Error;

/// Errors that can occur in the relay server
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration error occurred
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error occurred
    #[error("Network error: {0}")]
    Network(String),

    /// IO error occurred (file operations, sockets, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// A connection did not complete the hello exchange
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Tracing/logging error
    #[error("Tracing error: {0}")]
    Tracing(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<tracing_subscriber::util::TryInitError> for RelayError {
    fn from(e: tracing_subscriber::util::TryInitError) -> Self {
        RelayError::Tracing(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::Config("Invalid port".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid port");

        let err = RelayError::Handshake("no hello".to_string());
        assert_eq!(err.to_string(), "Handshake error: no hello");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let relay_err: RelayError = io_err.into();
        assert!(relay_err.to_string().contains("IO error"));
    }
}

use thiserror::Error;

/// Failures of the outbound reconnecting connection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("No open connection")]
    NotConnected,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid connection request: {0}")]
    InvalidRequest(String),
}

impl ConnectionError {
    /// Refused connections are the only error class that drives a reconnect.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::ConnectionRefused(_))
    }
}

/// Subscriber authentication failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,

    #[error("Invalid authentication token: {0}")]
    InvalidToken(String),

    #[error("Token carries no tenant claim")]
    MissingTenant,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

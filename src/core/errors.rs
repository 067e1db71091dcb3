use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    /// The venue answered but rejected the request (envelope `code != "0"`).
    #[error("API error: {code} - {message}")]
    ApiError { code: String, message: String },

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Local clock is {skew_ms}ms away from server time (local={local_ms}, server={server_ms})")]
    ClockSkew {
        local_ms: u64,
        server_ms: u64,
        skew_ms: u64,
    },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),
}

impl ExchangeError {
    /// Network or timeout failure; the request may not have reached the venue.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::ConnectionTimeout(_) | Self::NotConnected(_)
        )
    }

    /// Venue error code, when the venue rejected the request.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::ApiError { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::DeserializationError(_) | Self::ParseError(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::ConnectionTimeout(err.to_string())
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}

//! Error types for the TripAdvisor client.

use std::time::Duration;

use thiserror::Error;

/// Result type for TripAdvisor client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// TripAdvisor client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error (invalid base URL, header, client settings)
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection failed before a response was received
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded the client timeout
    #[error("request timed out")]
    Timeout,

    /// HTTP 429 from the upstream
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-2xx response
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// A 2xx response whose body did not have the expected shape
    #[error("unreadable response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether a later attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::Timeout | ClientError::RateLimited { .. } => {
                true
            }
            ClientError::Api { status, .. } => *status >= 500 || *status == 408,
            ClientError::Config(_) | ClientError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

//! Drive API Error Types
//!
//! Structured error handling for remote store operations.
//! Maps HTTP status codes to specific error variants for retry decisions.

/// Remote store error types
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Authentication expired or rejected")]
    AuthExpired,

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request error: {0}")]
    Request(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl DriveError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriveError::RateLimited
                | DriveError::Timeout
                | DriveError::Network(_)
                | DriveError::Server(_, _)
        )
    }

    /// Create a DriveError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => DriveError::AuthExpired,
            // Drive reports quota exhaustion as 403 with a rate-limit reason
            403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
                DriveError::RateLimited
            }
            403 => DriveError::Forbidden(body.to_string()),
            404 => DriveError::NotFound(body.to_string()),
            408 => DriveError::Timeout,
            429 => DriveError::RateLimited,
            500..=599 => DriveError::Server(status, body.to_string()),
            _ => DriveError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DriveError::Timeout
        } else if e.is_decode() {
            DriveError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            DriveError::from_status(status.as_u16(), &e.to_string())
        } else {
            DriveError::Network(e.to_string())
        }
    }
}

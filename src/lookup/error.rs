//! Error types for Steam lookups

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while resolving a Steam identity
#[derive(Debug, Error)]
pub enum LookupError {
    /// No Steam account matches the identifier
    #[error("Steam user not found: {0}")]
    NotFound(String),

    /// The lookup did not finish in time
    #[error("Steam lookup timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP transport failure
    #[error("Steam API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Steam answered with an unexpected status
    #[error("Steam API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Steam is throttling us
    #[error("Steam API rate limit reached")]
    RateLimited,

    /// The API key was refused
    #[error("Steam API key rejected")]
    InvalidCredential,

    /// Response body did not have the expected shape
    #[error("Failed to parse Steam API response: {0}")]
    Parse(String),

    /// The lookup worker died before answering
    #[error("Lookup worker failed: {0}")]
    Worker(String),
}

impl LookupError {
    /// Whether retrying on the next cycle could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Http(_) | Self::RateLimited | Self::Worker(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::NotFound(_) | Self::InvalidCredential | Self::Parse(_) => false,
        }
    }
}

/// Result type for lookup operations
pub type LookupResult<T> = Result<T, LookupError>;

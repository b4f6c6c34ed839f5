//! Error types for the Sheets client.

use thiserror::Error;

/// Errors that can occur when talking to the Sheets API.
#[derive(Debug, Error)]
pub enum SheetsError {
    /// Service account key could not be loaded or used.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Reading the credentials file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Token exchange or bearer token rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad base URL or range.
    #[error("invalid URL: {0}")]
    Url(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Error status from the API.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SheetsError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SheetsError::RateLimited { .. } => true,
            SheetsError::Api { status, .. } => *status >= 500,
            SheetsError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

//! Error types for the Discord presence source.

use thiserror::Error;

/// Errors that can occur when talking to Discord.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The configured guild has not been loaded from the gateway yet.
    #[error("guild state not loaded yet")]
    NotReady,

    /// No member with this id in the guild.
    #[error("unknown member: {0}")]
    UnknownMember(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Gateway protocol violation or session loss.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// The gateway refused the session in a way reconnecting will not fix.
    #[error("gateway rejected session: {0}")]
    Rejected(String),

    /// Error status from the REST API.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            PresenceError::UnknownMember("42".into()).to_string(),
            "unknown member: 42"
        );
        assert_eq!(
            PresenceError::Api {
                status: 403,
                message: "Missing Access".into()
            }
            .to_string(),
            "API error (403): Missing Access"
        );
    }
}

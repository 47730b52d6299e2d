//! Error types for calls against the hosted backend.

/// Result type for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Failure of a single remote operation. Nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success status; `message` is the server's own error text when present.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not signed in")]
    Unauthenticated,
}

impl BackendError {
    /// Message suitable for an inline error line in the UI
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Status { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

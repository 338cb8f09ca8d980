use thiserror::Error;

/// Error taxonomy shared by the adapters, the aggregator, the renderer and the job manager.
#[derive(Error, Debug)]
pub enum HistoryError {
    // Request shape
    #[error("Invalid request: {0}")]
    Validation(String),

    // Platform errors
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    // Pipeline errors
    #[error("No seasons to aggregate")]
    EmptyHistory,

    #[error("Render error: {0}")]
    Render(String),

    #[error("Invalid job transition: from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for HistoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HistoryError::Upstream(format!("request timed out: {}", err))
        } else if err.is_decode() {
            HistoryError::Upstream(format!("unexpected response body: {}", err))
        } else {
            HistoryError::Upstream(err.to_string())
        }
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(err: serde_json::Error) -> Self {
        HistoryError::Upstream(format!("malformed JSON: {}", err))
    }
}

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_readable() {
        let err = HistoryError::InvalidTransition { from: "completed".into(), to: "running".into() };
        assert_eq!(err.to_string(), "Invalid job transition: from completed to running");
        assert_eq!(HistoryError::EmptyHistory.to_string(), "No seasons to aggregate");
    }
}

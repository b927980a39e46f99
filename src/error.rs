use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid time or macro expression {input:?}: {reason}")]
    Parse { input: String, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("buffering request body for fallback: {0}")]
    BodyRead(String),

    #[error("query error (refId={ref_id}): {message}")]
    BackendQuery { ref_id: String, message: String },

    #[error("proxy returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("response body exceeds {0} bytes")]
    ResponseTooLarge(usize),

    #[error("decoding response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl QueryError {
    pub(crate) fn parse(input: &str, reason: impl Into<String>) -> Self {
        QueryError::Parse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the backend rejected the query text itself rather than the
    /// request failing in transit. Prometheus reports these as `bad_data`,
    /// Loki and most SQL backends as a 400.
    pub fn is_validation_error(&self) -> bool {
        match self {
            QueryError::BackendQuery { message, .. } => {
                let message = message.to_lowercase();
                message.contains("bad_data")
                    || message.contains("parse error")
                    || message.contains("syntax error")
            }
            QueryError::HttpStatus { status, .. } => *status == 400,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

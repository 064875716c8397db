use ragline_core::RaglineError;
use thiserror::Error;

/// Errors raised by model clients.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model server unavailable: {0}")]
    Unavailable(String),

    #[error("model server returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("model request timed out")]
    Timeout,

    #[error("model configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else {
            LlmError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::InvalidResponse(err.to_string())
    }
}

impl From<LlmError> for RaglineError {
    fn from(err: LlmError) -> Self {
        RaglineError::Generation(err.to_string())
    }
}

//! Error types for the chat pipeline.

use ragline_core::RaglineError;
use ragline_llm::LlmError;
use ragline_speech::SpeechError;

use crate::state::ChatState;

/// Errors from the chat pipeline.
///
/// Only validation errors and a fatal generation failure ever reach the
/// caller. Classifier, synthesis, and log sink failures are absorbed by the
/// pipeline and only logged.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("safety classifier timed out")]
    ClassifierTimeout,
    #[error("speech synthesis failed: {0}")]
    SynthesisFailure(String),
    #[error("session log sink failed: {0}")]
    LogSinkFailure(String),
    #[error("client disconnected")]
    ClientDisconnected,
    #[error("invalid state transition: {0} -> {1}")]
    InvalidTransition(ChatState, ChatState),
}

impl ChatError {
    /// Whether the request was rejected before entering the pipeline.
    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::EmptyMessage | ChatError::MessageTooLong(_))
    }
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout => ChatError::UpstreamUnavailable("model request timed out".into()),
            other => ChatError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<SpeechError> for ChatError {
    fn from(err: SpeechError) -> Self {
        ChatError::SynthesisFailure(err.to_string())
    }
}

impl From<RaglineError> for ChatError {
    fn from(err: RaglineError) -> Self {
        ChatError::LogSinkFailure(err.to_string())
    }
}

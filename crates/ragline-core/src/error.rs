use thiserror::Error;

/// Top-level error type for the Ragline gateway.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for RaglineError` where they need to surface
/// failures through the binary's startup path.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RaglineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for RaglineError {
    fn from(err: toml::de::Error) -> Self {
        RaglineError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RaglineError {
    fn from(err: serde_json::Error) -> Self {
        RaglineError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Ragline operations.
pub type Result<T> = std::result::Result<T, RaglineError>;

use ragline_core::RaglineError;
use thiserror::Error;

/// Errors raised by embedding services and vector stores.
///
/// None of these reach the caller of `/chat`: the retriever degrades to an
/// empty context and only the health check reports them.
#[derive(Debug, Error)]
pub enum VectorError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("invalid store response: {0}")]
    InvalidResponse(String),

    #[error("index lock poisoned")]
    LockPoisoned,
}

impl From<reqwest::Error> for VectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            VectorError::InvalidResponse(err.to_string())
        } else {
            VectorError::Unavailable(err.to_string())
        }
    }
}

impl From<VectorError> for RaglineError {
    fn from(err: VectorError) -> Self {
        RaglineError::Retrieval(err.to_string())
    }
}

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use ragline_core::SamplingParameters;

use crate::error::LlmError;
use crate::prompt::Prompt;

/// Ordered text fragments from a streaming completion.
///
/// The stream ends after the model reports completion; an `Err` item means
/// the stream broke and nothing further will be produced.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// A model server that can answer a prompt in one piece.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Model label recorded in logs and the session log.
    fn name(&self) -> &str;

    /// Cheap liveness probe. Reported, never retried.
    async fn connect(&self) -> Result<(), LlmError>;

    async fn complete(
        &self,
        prompt: &Prompt,
        sampling: &SamplingParameters,
    ) -> Result<String, LlmError>;
}

/// A model server that can also stream its answer incrementally.
#[async_trait]
pub trait StreamingModel: CompletionModel {
    async fn complete_stream(
        &self,
        prompt: &Prompt,
        sampling: &SamplingParameters,
    ) -> Result<FragmentStream, LlmError>;
}

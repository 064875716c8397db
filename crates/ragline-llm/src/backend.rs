//! The generation backend: one chunk-stream interface over streaming and
//! batch model servers.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use ragline_core::{GenerationChunk, SamplingParameters};

use crate::error::LlmError;
use crate::model::{CompletionModel, StreamingModel};
use crate::prompt::Prompt;

/// Chunks produced for one generation: zero or more `Text`, then exactly one
/// `Done` or `Error`, then nothing.
pub type ChunkStream = Pin<Box<dyn Stream<Item = GenerationChunk> + Send>>;

/// A generation backend, selected once at startup.
#[derive(Clone)]
pub enum GenerationBackend {
    /// Forwards fragments as the model produces them.
    Streaming(Arc<dyn StreamingModel>),
    /// Awaits the whole answer and emits it as a single chunk.
    Batch(Arc<dyn CompletionModel>),
}

impl std::fmt::Debug for GenerationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationBackend::Streaming(m) => {
                f.debug_tuple("Streaming").field(&m.name()).finish()
            }
            GenerationBackend::Batch(m) => f.debug_tuple("Batch").field(&m.name()).finish(),
        }
    }
}

impl GenerationBackend {
    pub fn model_name(&self) -> &str {
        match self {
            GenerationBackend::Streaming(m) => m.name(),
            GenerationBackend::Batch(m) => m.name(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, GenerationBackend::Streaming(_))
    }

    /// Liveness probe of the underlying model server.
    pub async fn connect(&self) -> Result<(), LlmError> {
        match self {
            GenerationBackend::Streaming(m) => m.connect().await,
            GenerationBackend::Batch(m) => m.connect().await,
        }
    }

    /// Generate an answer as a chunk stream.
    ///
    /// Failures are never returned as `Err`: a failed request yields a single
    /// `Error` chunk and a broken stream ends with one.
    pub fn generate(&self, prompt: Prompt, sampling: SamplingParameters) -> ChunkStream {
        match self {
            GenerationBackend::Streaming(model) => {
                let model = Arc::clone(model);
                Box::pin(async_stream::stream! {
                    match model.complete_stream(&prompt, &sampling).await {
                        Err(e) => {
                            warn!(model = model.name(), error = %e, "Streaming generation failed to start");
                            yield GenerationChunk::Error(e.to_string());
                        }
                        Ok(mut fragments) => {
                            let mut count = 0usize;
                            loop {
                                match fragments.next().await {
                                    Some(Ok(text)) => {
                                        if !text.is_empty() {
                                            count += 1;
                                            yield GenerationChunk::Text(text);
                                        }
                                    }
                                    Some(Err(e)) => {
                                        warn!(model = model.name(), chunks = count, error = %e, "Generation stream broke");
                                        yield GenerationChunk::Error(e.to_string());
                                        break;
                                    }
                                    None => {
                                        debug!(model = model.name(), chunks = count, "Generation stream complete");
                                        yield GenerationChunk::Done;
                                        break;
                                    }
                                }
                            }
                        }
                    }
                })
            }
            GenerationBackend::Batch(model) => {
                let model = Arc::clone(model);
                Box::pin(async_stream::stream! {
                    match model.complete(&prompt, &sampling).await {
                        Ok(text) => {
                            if !text.is_empty() {
                                yield GenerationChunk::Text(text);
                            }
                            yield GenerationChunk::Done;
                        }
                        Err(e) => {
                            warn!(model = model.name(), error = %e, "Batch generation failed");
                            yield GenerationChunk::Error(e.to_string());
                        }
                    }
                })
            }
        }
    }
}

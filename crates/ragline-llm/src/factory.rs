//! Builds the configured models from settings.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use ragline_core::config::GenerationProvider;
use ragline_core::{SamplingParameters, Settings};

use crate::backend::GenerationBackend;
use crate::error::LlmError;
use crate::mock::ScriptedModel;
use crate::model::CompletionModel;
use crate::ollama::{self, OllamaModel};
use crate::openai::{self, OpenAiModel};

/// The models the chat pipeline needs.
pub struct BuiltModels {
    pub backend: GenerationBackend,
    /// Model used by the safety evaluator.
    pub classifier: Arc<dyn CompletionModel>,
    /// Sampling parameters for answer generation.
    pub sampling: SamplingParameters,
}

pub fn build_models(settings: &Settings) -> Result<BuiltModels, LlmError> {
    let timeout = Duration::from_secs(settings.generation.request_timeout_secs);
    let stream = settings.generation.stream;

    let built = match settings.generation.provider {
        GenerationProvider::Ollama => {
            let model = Arc::new(OllamaModel::new(&settings.ollama, timeout)?);
            let backend = if stream {
                GenerationBackend::Streaming(model.clone())
            } else {
                GenerationBackend::Batch(model.clone())
            };
            BuiltModels {
                backend,
                classifier: model,
                sampling: ollama::sampling(&settings.ollama, stream),
            }
        }
        GenerationProvider::Openai => {
            if stream {
                warn!("The openai provider answers in batch mode; generation.stream is ignored");
            }
            if settings.openai.api_key.is_empty() {
                warn!("No OpenAI API key configured; requests are sent unauthenticated");
            }
            let model = Arc::new(OpenAiModel::new(&settings.openai, timeout)?);
            BuiltModels {
                backend: GenerationBackend::Batch(model.clone()),
                classifier: model,
                sampling: openai::sampling(&settings.openai),
            }
        }
        GenerationProvider::Mock => {
            let model = Arc::new(
                ScriptedModel::new(["This is a canned answer ", "from the offline backend."])
                    .named("mock"),
            );
            let backend = if stream {
                GenerationBackend::Streaming(model)
            } else {
                GenerationBackend::Batch(model)
            };
            BuiltModels {
                backend,
                classifier: Arc::new(
                    ScriptedModel::replying(r#"{"safe": true}"#).named("mock-classifier"),
                ),
                sampling: SamplingParameters {
                    stream,
                    ..SamplingParameters::default()
                },
            }
        }
    };

    info!(
        model = built.backend.model_name(),
        streaming = built.backend.is_streaming(),
        "Generation backend ready"
    );
    Ok(built)
}

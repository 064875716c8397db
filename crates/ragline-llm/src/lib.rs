//! Ragline LLM crate - language-model clients and the generation backend.
//!
//! `CompletionModel` and `StreamingModel` are the collaborator interfaces a
//! model server must satisfy. `GenerationBackend` is the tagged union the
//! chat pipeline talks to: every variant yields the same chunk stream.

pub mod backend;
pub mod error;
pub mod factory;
pub mod mock;
pub mod model;
pub mod ollama;
pub mod openai;
pub mod prompt;

pub use backend::{ChunkStream, GenerationBackend};
pub use error::LlmError;
pub use factory::{build_models, BuiltModels};
pub use mock::{ScriptStep, ScriptedModel};
pub use model::{CompletionModel, FragmentStream, StreamingModel};
pub use ollama::OllamaModel;
pub use openai::OpenAiModel;
pub use prompt::{Prompt, PromptBuilder};

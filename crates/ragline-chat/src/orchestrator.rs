//! Chat orchestrator: drives one request through the pipeline.
//!
//! Safety runs first and an unsafe verdict short-circuits to the refusal
//! text. Otherwise retrieval always proceeds to generation. Streamed chunks
//! are forwarded as they arrive and accumulated for the final response.
//! Audio is only synthesized from the finished text, and every outcome is
//! queued for the session log without waiting on it.

use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ragline_core::{
    ChatRequest, ChatResponse, GenerationChunk, GenerationRequest, RequestId, SafetyVerdict,
    SamplingParameters, SessionLogEntry, Settings,
};
use ragline_llm::{GenerationBackend, PromptBuilder};
use ragline_speech::SpeechSynthesizer;
use ragline_vector::Retriever;

use crate::error::ChatError;
use crate::safety::SafetyEvaluator;
use crate::session_log::SessionLogger;
use crate::state::{validate_transition, ChatState};

/// Buffered events between the pipeline task and a streaming consumer.
const EVENT_BUFFER: usize = 64;

/// One event on a streaming response.
///
/// Zero or more `Delta`s are followed by exactly one `Complete` or `Failed`.
#[derive(Debug)]
pub enum ChatEvent {
    Delta(String),
    Complete(ChatResponse),
    Failed(ChatError),
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChatEvent::Delta(_))
    }
}

pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// A streaming request whose receiver has been dropped.
fn consumer_gone(events: Option<&mpsc::Sender<ChatEvent>>) -> bool {
    events.is_some_and(|tx| tx.is_closed())
}

/// Tracks the state of one request and validates every transition.
struct Tracker {
    request_id: RequestId,
    state: ChatState,
    started: Instant,
}

impl Tracker {
    fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            state: ChatState::Received,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, to: ChatState) -> Result<(), ChatError> {
        validate_transition(self.state, to)?;
        debug!(request_id = %self.request_id, from = %self.state, to = %to, "Request state");
        self.state = to;
        Ok(())
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Central coordinator for chat requests.
pub struct ChatOrchestrator {
    safety: SafetyEvaluator,
    retriever: Arc<Retriever>,
    backend: GenerationBackend,
    prompts: PromptBuilder,
    sampling: SamplingParameters,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    logger: SessionLogger,
    system_prompt: String,
    refusal_message: String,
    max_message_length: usize,
}

impl ChatOrchestrator {
    pub fn new(
        settings: &Settings,
        safety: SafetyEvaluator,
        retriever: Arc<Retriever>,
        backend: GenerationBackend,
        sampling: SamplingParameters,
    ) -> Self {
        Self {
            safety,
            retriever,
            backend,
            prompts: PromptBuilder::new(settings.general.no_results_message.as_str()),
            sampling,
            speech: None,
            logger: SessionLogger::disabled(),
            system_prompt: settings.general.system_prompt.clone(),
            refusal_message: settings.general.refusal_message.clone(),
            max_message_length: settings.general.max_message_length,
        }
    }

    /// Synthesizer used for requests that ask for audio.
    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_logger(mut self, logger: SessionLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn backend(&self) -> &GenerationBackend {
        &self.backend
    }

    pub fn logger(&self) -> &SessionLogger {
        &self.logger
    }

    /// Reject requests that must not enter the pipeline.
    pub fn validate(&self, request: &ChatRequest) -> Result<(), ChatError> {
        if request.user_message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if request.user_message.chars().count() > self.max_message_length {
            return Err(ChatError::MessageTooLong(self.max_message_length));
        }
        Ok(())
    }

    /// Start tracking a request. An invalid one moves straight from
    /// `Received` to `Failed` and never enters the pipeline.
    fn admit(&self, request: &ChatRequest) -> Result<Tracker, ChatError> {
        let mut tracker = Tracker::new(request.request_id);
        if let Err(e) = self.validate(request) {
            tracker.advance(ChatState::Failed)?;
            debug!(request_id = %request.request_id, error = %e, "Request rejected");
            return Err(e);
        }
        Ok(tracker)
    }

    /// Answer a request with the full text.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let tracker = self.admit(&request)?;
        self.run(tracker, &request, None).await
    }

    /// Answer a request as a stream of events.
    ///
    /// Validation happens before anything is spawned, so an invalid request
    /// fails here instead of producing a stream.
    pub fn handle_stream(
        self: Arc<Self>,
        request: ChatRequest,
    ) -> Result<ChatEventStream, ChatError> {
        let tracker = self.admit(&request)?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let terminal = match self.run(tracker, &request, Some(&tx)).await {
                Ok(response) => ChatEvent::Complete(response),
                Err(e) => ChatEvent::Failed(e),
            };
            if tx.send(terminal).await.is_err() {
                debug!(request_id = %request.request_id, "Stream consumer went away");
            }
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }

    async fn run(
        &self,
        mut tracker: Tracker,
        request: &ChatRequest,
        events: Option<&mpsc::Sender<ChatEvent>>,
    ) -> Result<ChatResponse, ChatError> {
        tracker.advance(ChatState::SafetyCheck)?;
        let verdict = self.safety.evaluate(&request.user_message).await;
        if !verdict.is_safe {
            tracker.advance(ChatState::Refused)?;
            info!(
                request_id = %request.request_id,
                client = %request.client_identity,
                fallback_used = verdict.fallback_used,
                "Request refused by safety evaluator"
            );
            if let Some(tx) = events {
                let _ = tx.send(ChatEvent::Delta(self.refusal_message.clone())).await;
            }
            let response = ChatResponse {
                request_id: request.request_id,
                text: self.refusal_message.clone(),
                audio: None,
                safety_verdict: verdict,
                refused: true,
                latency_ms: tracker.elapsed_ms(),
            };
            self.record(request, &response, None);
            return Ok(response);
        }

        tracker.advance(ChatState::Retrieving)?;
        let context = self
            .retriever
            .retrieve(&request.user_message, request.collection.as_deref())
            .await;

        tracker.advance(ChatState::Generating)?;
        let generation = GenerationRequest {
            system_prompt: self.system_prompt.clone(),
            context,
            user_message: request.user_message.clone(),
            sampling: SamplingParameters {
                stream: request.wants_stream,
                ..self.sampling.clone()
            },
        };
        let generated = if consumer_gone(events) {
            Err(ChatError::ClientDisconnected)
        } else {
            self.generate(&generation, events).await
        };
        let text = match generated {
            Ok(text) => text,
            Err(e) => return self.fail(tracker, request, &verdict, e),
        };
        if consumer_gone(events) {
            return self.fail(tracker, request, &verdict, ChatError::ClientDisconnected);
        }

        let mut audio = None;
        if request.wants_audio {
            if let Some(speech) = &self.speech {
                tracker.advance(ChatState::AudioPending)?;
                audio = self.synthesize(speech.as_ref(), &text, request.request_id).await;
            }
        }

        tracker.advance(ChatState::Complete)?;
        let response = ChatResponse {
            request_id: request.request_id,
            text,
            audio,
            safety_verdict: verdict,
            refused: false,
            latency_ms: tracker.elapsed_ms(),
        };
        info!(
            request_id = %request.request_id,
            latency_ms = response.latency_ms,
            chars = response.text.len(),
            audio = response.audio.is_some(),
            "Request complete"
        );
        self.record(request, &response, None);
        Ok(response)
    }

    /// Drive the backend stream to its terminal chunk, forwarding text.
    async fn generate(
        &self,
        request: &GenerationRequest,
        events: Option<&mpsc::Sender<ChatEvent>>,
    ) -> Result<String, ChatError> {
        let prompt = self.prompts.build(request);
        let mut chunks = self.backend.generate(prompt, request.sampling.clone());
        let mut text = String::new();

        while let Some(chunk) = chunks.next().await {
            match chunk {
                GenerationChunk::Text(fragment) => {
                    text.push_str(&fragment);
                    if let Some(tx) = events {
                        if tx.send(ChatEvent::Delta(fragment)).await.is_err() {
                            return Err(ChatError::ClientDisconnected);
                        }
                    }
                }
                GenerationChunk::Done => return Ok(text),
                GenerationChunk::Error(message) => {
                    return Err(ChatError::UpstreamUnavailable(message));
                }
            }
        }
        Ok(text)
    }

    /// Move a generating request to `Failed` and record why.
    fn fail(
        &self,
        mut tracker: Tracker,
        request: &ChatRequest,
        verdict: &SafetyVerdict,
        error: ChatError,
    ) -> Result<ChatResponse, ChatError> {
        tracker.advance(ChatState::Failed)?;
        if matches!(error, ChatError::ClientDisconnected) {
            info!(request_id = %request.request_id, "Client disconnected, generation stopped");
        } else {
            warn!(request_id = %request.request_id, error = %error, "Generation failed");
        }
        self.record_failure(request, verdict, tracker.elapsed_ms(), &error);
        Err(error)
    }

    async fn synthesize(
        &self,
        speech: &dyn SpeechSynthesizer,
        text: &str,
        request_id: RequestId,
    ) -> Option<Vec<u8>> {
        match speech.speak(text).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                let err = ChatError::from(e);
                warn!(request_id = %request_id, error = %err, "Continuing without audio");
                None
            }
        }
    }

    fn record(&self, request: &ChatRequest, response: &ChatResponse, error: Option<String>) {
        let entry = self.entry(
            request,
            &response.safety_verdict,
            &response.text,
            response.audio.as_ref().map_or(0, Vec::len),
            response.latency_ms,
            error,
        );
        self.logger.enqueue(entry);
    }

    fn record_failure(
        &self,
        request: &ChatRequest,
        verdict: &SafetyVerdict,
        latency_ms: u64,
        error: &ChatError,
    ) {
        let entry = self.entry(request, verdict, "", 0, latency_ms, Some(error.to_string()));
        self.logger.enqueue(entry);
    }

    fn entry(
        &self,
        request: &ChatRequest,
        verdict: &SafetyVerdict,
        response: &str,
        audio_bytes: usize,
        latency_ms: u64,
        error: Option<String>,
    ) -> SessionLogEntry {
        SessionLogEntry {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            request_id: request.request_id,
            client_identity: request.client_identity.clone(),
            collection: request
                .collection
                .clone()
                .unwrap_or_else(|| self.retriever.default_collection().to_string()),
            query: request.user_message.clone(),
            response: response.to_string(),
            blocked: !verdict.is_safe,
            safe: verdict.is_safe,
            fallback_used: verdict.fallback_used,
            backend: self.backend.model_name().to_string(),
            latency_ms,
            safety_latency_ms: verdict.evaluation_latency_ms,
            streamed: request.wants_stream,
            audio_bytes,
            error,
        }
    }
}

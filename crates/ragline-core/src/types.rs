use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Correlation id assigned to each chat request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Request / safety
// =============================================================================

/// One inbound chat request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub request_id: RequestId,
    pub user_message: String,
    pub wants_audio: bool,
    pub wants_stream: bool,
    /// Caller address or API client name.
    pub client_identity: String,
    /// Collection resolved from the caller's API key; the default when `None`.
    pub collection: Option<String>,
}

impl ChatRequest {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            user_message: user_message.into(),
            wants_audio: false,
            wants_stream: false,
            client_identity: "unknown".to_string(),
            collection: None,
        }
    }

    pub fn with_audio(mut self, wants_audio: bool) -> Self {
        self.wants_audio = wants_audio;
        self
    }

    pub fn with_stream(mut self, wants_stream: bool) -> Self {
        self.wants_stream = wants_stream;
        self
    }

    pub fn with_client(mut self, client_identity: impl Into<String>) -> Self {
        self.client_identity = client_identity.into();
        self
    }

    pub fn with_collection(mut self, collection: Option<String>) -> Self {
        self.collection = collection;
        self
    }
}

/// Outcome of the safety evaluator for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub evaluated_at: DateTime<Utc>,
    pub evaluation_latency_ms: u64,
    /// True when no attempt produced a usable answer and the fallback policy decided.
    pub fallback_used: bool,
}

impl SafetyVerdict {
    pub fn new(is_safe: bool, evaluation_latency_ms: u64, fallback_used: bool) -> Self {
        Self {
            is_safe,
            evaluated_at: Utc::now(),
            evaluation_latency_ms,
            fallback_used,
        }
    }

    /// Verdict used when evaluation is switched off.
    pub fn unchecked() -> Self {
        Self::new(true, 0, false)
    }
}

// =============================================================================
// Retrieval
// =============================================================================

/// A retrieved text passage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_id: String,
    /// Relevance in 0..=1, higher is better.
    pub relevance_score: f32,
}

/// Passages for one request, highest relevance first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetrievedContext(Vec<Passage>);

impl RetrievedContext {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Keep passages at or above `threshold`, sort descending, keep `top_k`.
    pub fn from_candidates(mut passages: Vec<Passage>, threshold: f32, top_k: usize) -> Self {
        passages.retain(|p| p.relevance_score >= threshold);
        passages.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        passages.truncate(top_k);
        Self(passages)
    }

    pub fn passages(&self) -> &[Passage] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Generation
// =============================================================================

/// Backend-neutral sampling knobs; provider-specific ones are optional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingParameters {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: u32,
    pub stream: bool,
    pub repeat_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop: Vec<String>,
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: None,
            top_k: None,
            max_tokens: 1024,
            stream: true,
            repeat_penalty: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: Vec::new(),
        }
    }
}

/// Everything a backend needs to answer one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub context: RetrievedContext,
    pub user_message: String,
    pub sampling: SamplingParameters,
}

/// One element of a generation stream.
///
/// A well-formed stream is zero or more `Text` chunks followed by exactly one
/// `Done` or `Error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GenerationChunk {
    Text(String),
    Done,
    Error(String),
}

impl GenerationChunk {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GenerationChunk::Text(_))
    }
}

// =============================================================================
// Response
// =============================================================================

/// The single response produced for every request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub request_id: RequestId,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<u8>>,
    pub safety_verdict: SafetyVerdict,
    /// True when the text is the canned refusal.
    pub refused: bool,
    pub latency_ms: u64,
}

// =============================================================================
// Health
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Degraded,
    Down,
}

/// Probe result for one component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn up() -> Self {
        Self {
            status: HealthStatus::Up,
            detail: None,
        }
    }

    pub fn up_with(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Up,
            detail: Some(detail.into()),
        }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Down,
            detail: Some(detail.into()),
        }
    }
}

/// Aggregate health, recomputed on every call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthReport {
    /// Healthy for the transport: up or degraded.
    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Down
    }
}

// =============================================================================
// Session log
// =============================================================================

/// One recorded exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub request_id: RequestId,
    pub client_identity: String,
    pub collection: String,
    pub query: String,
    pub response: String,
    /// True when the safety evaluator refused the query.
    pub blocked: bool,
    pub safe: bool,
    pub fallback_used: bool,
    /// Model that produced the answer.
    pub backend: String,
    pub latency_ms: u64,
    pub safety_latency_ms: u64,
    pub streamed: bool,
    pub audio_bytes: usize,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: &str, score: f32) -> Passage {
        Passage {
            text: format!("text of {id}"),
            source_id: id.to_string(),
            relevance_score: score,
        }
    }

    #[test]
    fn test_context_drops_below_threshold_keeps_equal() {
        let ctx = RetrievedContext::from_candidates(
            vec![passage("a", 0.49), passage("b", 0.5), passage("c", 0.9)],
            0.5,
            10,
        );
        let ids: Vec<_> = ctx.passages().iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_context_sorted_descending_and_truncated() {
        let ctx = RetrievedContext::from_candidates(
            vec![
                passage("a", 0.6),
                passage("b", 0.95),
                passage("c", 0.7),
                passage("d", 0.8),
            ],
            0.0,
            2,
        );
        let ids: Vec<_> = ctx.passages().iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn test_empty_context_is_valid() {
        let ctx = RetrievedContext::from_candidates(vec![passage("a", 0.1)], 0.5, 3);
        assert!(ctx.is_empty());
        assert_eq!(ctx, RetrievedContext::empty());
    }

    #[test]
    fn test_chunk_terminality() {
        assert!(!GenerationChunk::Text("hi".into()).is_terminal());
        assert!(GenerationChunk::Done.is_terminal());
        assert!(GenerationChunk::Error("boom".into()).is_terminal());
    }

    #[test]
    fn test_chat_request_builder() {
        let req = ChatRequest::new("hello")
            .with_audio(true)
            .with_stream(true)
            .with_client("10.0.0.1")
            .with_collection(Some("hr".into()));
        assert_eq!(req.user_message, "hello");
        assert!(req.wants_audio);
        assert!(req.wants_stream);
        assert_eq!(req.client_identity, "10.0.0.1");
        assert_eq!(req.collection.as_deref(), Some("hr"));
    }

    #[test]
    fn test_health_status_serializes_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }

    #[test]
    fn test_report_serving_when_degraded() {
        let report = HealthReport {
            status: HealthStatus::Degraded,
            components: BTreeMap::new(),
        };
        assert!(report.is_serving());
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }
}

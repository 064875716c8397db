//! Route handlers for `/chat` and `/health`.

use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ragline_chat::{ChatError, ChatEvent};
use ragline_core::{ChatRequest, HealthStatus};

use crate::error::{ApiError, UPSTREAM_FAILURE_MESSAGE};
use crate::scope::ClientScope;
use crate::shutdown::SharedGuard;
use crate::state::AppState;

// =============================================================================
// Chat
// =============================================================================

/// Request body for POST /chat.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default, rename = "voiceEnabled", alias = "voice_enabled")]
    pub voice_enabled: bool,
    #[serde(default)]
    pub stream: bool,
}

/// Non-streaming reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    /// Base64-encoded audio, or null.
    pub audio: Option<String>,
}

/// One SSE `data:` frame.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamFrame {
    pub text: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamFrame {
    fn delta(text: String) -> Self {
        Self {
            text,
            done: false,
            audio: None,
            error: None,
        }
    }

    fn done(audio: Option<String>) -> Self {
        Self {
            text: String::new(),
            done: true,
            audio,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            text: String::new(),
            done: true,
            audio: None,
            error: Some(message),
        }
    }
}

fn encode_audio(audio: Option<Vec<u8>>) -> Option<String> {
    audio.map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

fn failure_message(err: ChatError) -> String {
    match ApiError::from(err) {
        ApiError::BadGateway(msg) => msg,
        other => other.message().to_string(),
    }
}

/// POST /chat - answer a message, as JSON or as server-sent events.
pub async fn chat(
    State(state): State<AppState>,
    Extension(scope): Extension<ClientScope>,
    admission: Option<Extension<SharedGuard>>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let stream = body.stream || wants_event_stream(&headers);

    let request = ChatRequest::new(body.message)
        .with_audio(body.voice_enabled)
        .with_stream(stream)
        .with_client(scope.client_identity)
        .with_collection(scope.collection);
    debug!(request_id = %request.request_id, stream, audio = request.wants_audio, "Chat request");

    if !stream {
        let response = state.orchestrator.handle(request).await?;
        return Ok(Json(ChatReply {
            response: response.text,
            audio: encode_audio(response.audio),
        })
        .into_response());
    }

    let mut events = state.orchestrator.clone().handle_stream(request)?;
    let guard = admission.map(|Extension(guard)| guard);

    let frames = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = events.next().await {
            let terminal = event.is_terminal();
            let frame = match event {
                ChatEvent::Delta(text) => StreamFrame::delta(text),
                ChatEvent::Complete(response) => StreamFrame::done(encode_audio(response.audio)),
                ChatEvent::Failed(err) => StreamFrame::failed(failure_message(err)),
            };
            let payload = serde_json::to_string(&frame).unwrap_or_default();
            yield Ok::<_, Infallible>(Event::default().data(payload));
            if terminal {
                break;
            }
        }
    };

    Ok(Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response())
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentBody {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Response for GET /health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthBody {
    /// "healthy" (up or degraded) or "unhealthy".
    pub status: String,
    pub components: BTreeMap<String, ComponentBody>,
    pub uptime_secs: u64,
}

/// GET /health - probe every collaborator; 503 when a required one is down.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthBody>) {
    let report = state.health.check().await;
    let serving = report.is_serving();

    let components = report
        .components
        .into_iter()
        .map(|(name, component)| {
            let body = if component.status == HealthStatus::Down {
                ComponentBody {
                    status: component.status,
                    error: component.detail,
                    detail: None,
                }
            } else {
                ComponentBody {
                    status: component.status,
                    error: None,
                    detail: component.detail,
                }
            };
            (name, body)
        })
        .collect();

    let status = if serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthBody {
            status: if serving { "healthy" } else { "unhealthy" }.to_string(),
            components,
            uptime_secs: state.start_time.elapsed().as_secs(),
        }),
    )
}

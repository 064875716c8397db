//! API error types and JSON error response formatting.
//!
//! ApiError gives every endpoint the same `{ error, message }` body. Upstream
//! details are logged here and replaced by a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, error, warn};

use ragline_chat::ChatError;

/// Message shown to callers when the model backend fails.
pub const UPSTREAM_FAILURE_MESSAGE: &str =
    "The assistant is temporarily unavailable. Please try again later.";

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "unauthorized").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - invalid body or message.
    BadRequest(String),
    /// 401 Unauthorized - missing or unknown API key.
    Unauthorized(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 502 Bad Gateway - the generation backend failed.
    BadGateway(String),
    /// 503 Service Unavailable - shutting down.
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Internal(_) => "internal_error",
            ApiError::BadGateway(_) => "upstream_unavailable",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Internal(msg)
            | ApiError::BadGateway(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.message().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyMessage | ChatError::MessageTooLong(_) => {
                ApiError::BadRequest(err.to_string())
            }
            ChatError::UpstreamUnavailable(detail) => {
                warn!(detail = %detail, "Upstream failure returned to caller");
                ApiError::BadGateway(UPSTREAM_FAILURE_MESSAGE.to_string())
            }
            ChatError::ClientDisconnected => {
                debug!("Chat pipeline stopped after the client went away");
                ApiError::ServiceUnavailable(err.to_string())
            }
            other => {
                error!(error = %other, "Unexpected chat pipeline error");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

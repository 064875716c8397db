//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, the
//! shutdown gate, and caller scoping.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ragline_core::RaglineError;

use crate::handlers;
use crate::scope;
use crate::shutdown;
use crate::state::AppState;

/// Request bodies are a single chat message.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let mut allowed_headers = vec![header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION];
    if let Ok(name) = HeaderName::try_from(state.api_keys.header_name.as_str()) {
        allowed_headers.push(name);
    }
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(allowed_headers);

    Router::new()
        .route("/chat", post(handlers::chat))
        .route("/health", get(handlers::health))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            scope::resolve_scope,
        ))
        .layer(axum::middleware::from_fn(shutdown::shutdown_guard))
        .layer(Extension(state.gate.clone()))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves, then stop accepting
/// connections and wait for open ones to finish.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), RaglineError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| RaglineError::Api(format!("Failed to read local address: {}", e)))?;
    let router = create_router(state);

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| RaglineError::Api(format!("Server error: {}", e)))
}

//! Ragline API crate - axum HTTP server for the chat gateway.
//!
//! Serves `POST /chat` (JSON or server-sent events) and `GET /health`,
//! resolves the caller's scope from API keys, and rejects new work once
//! shutdown has begun.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod scope;
pub mod shutdown;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, serve};
pub use scope::ClientScope;
pub use shutdown::ShutdownGate;
pub use state::AppState;

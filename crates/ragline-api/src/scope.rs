//! Caller scope: who is asking and which collection they may search.
//!
//! With API keys enabled, `/chat` requires a known key in the configured
//! header and the key decides the collection. `/health` only requires one
//! when `require_for_health` is set.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use ragline_core::config::ApiKeysConfig;

use crate::error::ApiError;
use crate::state::AppState;

/// Resolved caller, attached to the request as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientScope {
    pub client_identity: String,
    /// `None` means the configured default collection.
    pub collection: Option<String>,
}

/// First address of `X-Forwarded-For`, then the socket peer, then "unknown".
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Resolve the scope for a request path.
pub fn resolve(
    config: &ApiKeysConfig,
    headers: &HeaderMap,
    path: &str,
    address: String,
) -> Result<ClientScope, ApiError> {
    let anonymous = ClientScope {
        client_identity: address.clone(),
        collection: None,
    };
    if !config.enabled || (path == "/health" && !config.require_for_health) {
        return Ok(anonymous);
    }

    let key = headers
        .get(config.header_name.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::Unauthorized(format!("Missing {} header", config.header_name))
        })?;

    let entry = config
        .find(key)
        .ok_or_else(|| ApiError::Unauthorized("Invalid API key".to_string()))?;

    let client_identity = if entry.client_name.is_empty() {
        address
    } else {
        format!("{}@{}", entry.client_name, address)
    };
    Ok(ClientScope {
        client_identity,
        collection: entry.collection.clone(),
    })
}

/// Middleware that attaches a [`ClientScope`] or rejects with 401.
pub async fn resolve_scope(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let address = client_address(req.headers(), peer);

    match resolve(&state.api_keys, req.headers(), req.uri().path(), address) {
        Ok(scope) => {
            debug!(client = %scope.client_identity, collection = ?scope.collection, "Caller scope");
            req.extensions_mut().insert(scope);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

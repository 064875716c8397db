//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use ragline_chat::{ChatOrchestrator, HealthAggregator};
use ragline_core::config::ApiKeysConfig;

use crate::shutdown::ShutdownGate;

/// Shared application state.
///
/// All fields use `Arc` (or are cheap handles) for cloning across handler
/// tasks. Nothing here is mutated per request.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub health: Arc<HealthAggregator>,
    pub api_keys: Arc<ApiKeysConfig>,
    pub gate: ShutdownGate,
    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<ChatOrchestrator>,
        health: Arc<HealthAggregator>,
        api_keys: ApiKeysConfig,
    ) -> Self {
        Self {
            orchestrator,
            health,
            api_keys: Arc::new(api_keys),
            gate: ShutdownGate::new(),
            start_time: Instant::now(),
        }
    }
}

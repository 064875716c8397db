//! Health aggregation over the pipeline's collaborators.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use ragline_core::config::HealthConfig;
use ragline_core::{ComponentHealth, HealthReport, HealthStatus};
use ragline_llm::GenerationBackend;
use ragline_speech::SpeechSynthesizer;
use ragline_vector::Retriever;

use crate::session_log::SessionLogger;

pub const VECTOR_STORE: &str = "vector_store";
pub const GENERATION: &str = "generation";
pub const AUDIO: &str = "audio";
pub const SESSION_LOG: &str = "session_log";

/// Probes the vector store, the generation backend, and (when enabled) the
/// speech server. Nothing is cached: every call probes again.
pub struct HealthAggregator {
    retriever: Arc<Retriever>,
    backend: GenerationBackend,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    logger: SessionLogger,
    probe_timeout: Duration,
}

impl HealthAggregator {
    /// `speech` is only probed when present; pass `None` when audio is off.
    pub fn new(
        retriever: Arc<Retriever>,
        backend: GenerationBackend,
        speech: Option<Arc<dyn SpeechSynthesizer>>,
        logger: SessionLogger,
        config: &HealthConfig,
    ) -> Self {
        Self {
            retriever,
            backend,
            speech,
            logger,
            probe_timeout: config.probe_timeout(),
        }
    }

    pub async fn check(&self) -> HealthReport {
        let timeout = self.probe_timeout;
        let (store, generation, audio) = tokio::join!(
            probe(timeout, self.retriever.probe()),
            probe(timeout, self.backend.connect()),
            async {
                match &self.speech {
                    Some(speech) => Some(probe(timeout, speech.probe()).await),
                    None => None,
                }
            }
        );

        let status = aggregate(&store, &generation, audio.as_ref());

        let mut components = BTreeMap::new();
        components.insert(VECTOR_STORE.to_string(), labeled(store, self.retriever.store_name()));
        components.insert(GENERATION.to_string(), labeled(generation, self.backend.model_name()));
        if let Some(audio) = audio {
            components.insert(AUDIO.to_string(), audio);
        }
        if self.logger.is_enabled() {
            let stats = self.logger.stats();
            components.insert(
                SESSION_LOG.to_string(),
                ComponentHealth::up_with(format!(
                    "depth={} dropped={} failed={}",
                    stats.depth, stats.dropped, stats.failed
                )),
            );
        }

        debug!(status = ?status, "Health checked");
        HealthReport { status, components }
    }
}

/// Down if a required component is down, degraded if only audio is.
fn aggregate(
    store: &ComponentHealth,
    generation: &ComponentHealth,
    audio: Option<&ComponentHealth>,
) -> HealthStatus {
    if store.status == HealthStatus::Down || generation.status == HealthStatus::Down {
        HealthStatus::Down
    } else if audio.is_some_and(|a| a.status == HealthStatus::Down) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Up
    }
}

fn labeled(health: ComponentHealth, label: &str) -> ComponentHealth {
    if health.status == HealthStatus::Up {
        ComponentHealth::up_with(label)
    } else {
        health
    }
}

async fn probe<F, E>(timeout: Duration, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(())) => ComponentHealth::up(),
        Ok(Err(e)) => ComponentHealth::down(e.to_string()),
        Err(_) => ComponentHealth::down(format!(
            "probe timed out after {}ms",
            timeout.as_millis()
        )),
    }
}

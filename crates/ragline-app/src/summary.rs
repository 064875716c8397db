//! Startup configuration summary.

use ragline_core::config::{GenerationProvider, StoreKind};
use ragline_core::Settings;

/// Key settings plus warnings for risky combinations.
#[derive(Debug)]
pub struct ConfigSummary {
    pub entries: Vec<(&'static str, String)>,
    pub warnings: Vec<&'static str>,
}

pub fn summarize(settings: &Settings) -> ConfigSummary {
    let safety = &settings.safety;
    let provider = match settings.generation.provider {
        GenerationProvider::Ollama => "ollama",
        GenerationProvider::Openai => "openai",
        GenerationProvider::Mock => "mock",
    };
    let store = match settings.retrieval.store {
        StoreKind::Memory => format!("memory ({} seed documents)", settings.retrieval.seed.len()),
        StoreKind::Chroma => format!("chroma at {}", settings.retrieval.chroma.url),
    };
    let safety_line = if safety.is_active() {
        format!(
            "{:?}, {} attempts, {}ms timeout, {}ms retry delay, worst case {}ms",
            safety.mode,
            safety.max_retries,
            safety.request_timeout_ms,
            safety.retry_delay_ms,
            safety.worst_case().as_millis()
        )
        .to_lowercase()
    } else {
        "disabled".to_string()
    };
    let session_log = if settings.session_log.enabled {
        settings.session_log.path.clone()
    } else {
        "disabled".to_string()
    };

    let entries = vec![
        (
            "listen",
            format!("{}:{}", settings.general.host, settings.general.port),
        ),
        (
            "model",
            format!(
                "{} ({provider}, streaming={})",
                settings.backend_label(),
                settings.generation.stream
            ),
        ),
        ("store", store),
        ("collection", settings.retrieval.collection.clone()),
        (
            "retrieval",
            format!(
                "top_k={} relevance_threshold={}",
                settings.retrieval.top_k, settings.retrieval.relevance_threshold
            ),
        ),
        ("safety", safety_line),
        (
            "audio",
            if settings.audio.enabled {
                format!("{} ({})", settings.audio.model, settings.audio.voice)
            } else {
                "disabled".to_string()
            },
        ),
        ("session_log", session_log),
        (
            "api_keys",
            if settings.api_keys.enabled {
                format!("{} keys", settings.api_keys.keys.len())
            } else {
                "disabled".to_string()
            },
        ),
    ];

    let mut warnings = Vec::new();
    if !safety.is_active() {
        warnings.push("Safety evaluation is disabled; every query is treated as safe");
    } else if safety.allow_on_timeout {
        warnings.push("safety.allow_on_timeout = true; queries are allowed when the classifier fails");
    }
    if settings.api_keys.enabled && settings.api_keys.keys.is_empty() {
        warnings.push("API keys are enabled but none are configured; every chat request is rejected");
    }

    ConfigSummary { entries, warnings }
}

impl ConfigSummary {
    pub fn log(&self) {
        for (key, value) in &self.entries {
            tracing::info!("{key}: {value}");
        }
        for warning in &self.warnings {
            tracing::warn!("{warning}");
        }
    }

    pub fn print(&self) {
        for (key, value) in &self.entries {
            println!("{key:<12} {value}");
        }
        for warning in &self.warnings {
            println!("warning: {warning}");
        }
    }
}

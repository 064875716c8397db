//! Ragline application binary - composition root.
//!
//! Ties together all Ragline crates into a single executable:
//! 1. Load configuration from TOML and apply CLI overrides
//! 2. Initialize logging
//! 3. Build the retriever, generation backend, safety evaluator and synthesizer
//! 4. Start the session log drain
//! 5. Serve the axum API until Ctrl-C or SIGTERM, then drain within the grace period

mod cli;
mod sessions;
mod summary;
mod telemetry;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use ragline_api::{AppState, ShutdownGate};
use ragline_chat::{
    ChatOrchestrator, HealthAggregator, SafetyEvaluator, SessionLogger, SqliteLogSink,
    TracingLogSink,
};
use ragline_core::config::{EmbeddingProvider, StoreKind};
use ragline_core::Settings;
use ragline_llm::build_models;
use ragline_speech::{HttpSpeechClient, SpeechSynthesizer};
use ragline_vector::{
    ChromaStore, DynEmbeddingService, MemoryStore, MockEmbedding, OllamaEmbedding, Retriever,
    VectorStore,
};

use crate::cli::CliArgs;

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Build the embedder and vector store, seeding the in-memory store.
async fn build_retriever(settings: &Settings) -> AppResult<Arc<Retriever>> {
    let embedder: Arc<dyn DynEmbeddingService> = match settings.embedding.provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedding::new(&settings.embedding)?),
        EmbeddingProvider::Mock => Arc::new(MockEmbedding::new()),
    };

    let store: Arc<dyn VectorStore> = match settings.retrieval.store {
        StoreKind::Memory => {
            let store = MemoryStore::new();
            if let Err(e) = store
                .seed(
                    embedder.as_ref(),
                    &settings.retrieval.seed,
                    &settings.retrieval.collection,
                )
                .await
            {
                warn!(error = %e, "Seeding the memory store failed, starting with an empty corpus");
            }
            Arc::new(store)
        }
        StoreKind::Chroma => Arc::new(ChromaStore::new(&settings.retrieval.chroma)?),
    };

    Ok(Arc::new(Retriever::new(embedder, store, &settings.retrieval)))
}

/// SQLite-backed session logger, or a tracing-only one when the database
/// cannot be opened.
fn build_logger(settings: &Settings) -> SessionLogger {
    let config = &settings.session_log;
    if !config.enabled {
        info!("Session log disabled");
        return SessionLogger::disabled();
    }

    let path = Path::new(&config.path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %e, "Failed to create session log directory");
        }
    }

    match SqliteLogSink::open(path) {
        Ok(sink) => {
            match sink.repository().stats() {
                Ok(stats) => info!(
                    path = %path.display(),
                    total = stats.total,
                    blocked = stats.blocked,
                    failed = stats.failed,
                    "Session log opened"
                ),
                Err(e) => warn!(path = %path.display(), error = %e, "Session log opened, totals unavailable"),
            }
            SessionLogger::new(Arc::new(sink), config.queue_capacity)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Session log database unavailable, logging exchanges to tracing");
            SessionLogger::new(Arc::new(TracingLogSink), config.queue_capacity)
        }
    }
}

/// Resolve when Ctrl-C or SIGTERM arrives.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();
    let env = |key: &str| std::env::var(key).ok();

    // Config.
    let config_path = args.resolve_config_path(env);
    let (mut settings, load_error) = match Settings::load(&config_path) {
        Ok(settings) => (settings, None),
        Err(e) if args.check_config => return Err(e.into()),
        Err(e) => {
            let mut settings = Settings::default();
            settings.apply_env_overrides(env);
            (settings, Some(e))
        }
    };
    args.apply(&mut settings, env);
    settings.validate()?;

    if let Some(limit) = args.recent {
        let repo = sessions::open(Path::new(&settings.session_log.path))?;
        for line in sessions::report(&repo, limit)? {
            println!("{line}");
        }
        return Ok(());
    }

    if args.check_config {
        println!("Configuration OK: {}", config_path.display());
        summary::summarize(&settings).print();
        return Ok(());
    }

    // Tracing.
    let _telemetry = telemetry::init(&settings)?;
    info!("Starting Ragline v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!(path = %config_path.display(), "Configuration loaded"),
        Some(e) => warn!(path = %config_path.display(), error = %e, "Failed to load config, using defaults"),
    }
    summary::summarize(&settings).log();

    // Components.
    let retriever = build_retriever(&settings).await?;
    let models = build_models(&settings)?;

    match models.backend.connect().await {
        Ok(()) => info!(model = models.backend.model_name(), "Generation backend reachable"),
        Err(e) if settings.generation.require_backend_on_start => {
            error!(model = models.backend.model_name(), error = %e, "Generation backend unreachable");
            return Err(e.into());
        }
        Err(e) => warn!(
            model = models.backend.model_name(),
            error = %e,
            "Generation backend unreachable, continuing; requests fail until it recovers"
        ),
    }

    let speech: Option<Arc<dyn SpeechSynthesizer>> = if settings.audio.enabled {
        Some(Arc::new(HttpSpeechClient::new(&settings.audio)?))
    } else {
        None
    };

    let logger = build_logger(&settings);
    let _drain = logger.spawn_drain();

    let mut orchestrator = ChatOrchestrator::new(
        &settings,
        SafetyEvaluator::new(models.classifier, &settings.safety),
        retriever.clone(),
        models.backend.clone(),
        models.sampling,
    )
    .with_logger(logger.clone());
    if let Some(speech) = &speech {
        orchestrator = orchestrator.with_speech(speech.clone());
    }
    let health = HealthAggregator::new(
        retriever,
        models.backend,
        speech,
        logger.clone(),
        &settings.health,
    );
    let state = AppState::new(
        Arc::new(orchestrator),
        Arc::new(health),
        settings.api_keys.clone(),
    );

    // API server.
    let addr = format!("{}:{}", settings.general.host, settings.general.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind, is another instance running?");
            return Err(e.into());
        }
    };

    let gate: ShutdownGate = state.gate.clone();
    let signalled = Arc::new(Notify::new());
    let shutdown = {
        let gate = gate.clone();
        let signalled = Arc::clone(&signalled);
        async move {
            wait_for_signal().await;
            gate.begin_shutdown();
            signalled.notify_one();
        }
    };
    let mut server = tokio::spawn(ragline_api::serve(listener, state, shutdown));

    tokio::select! {
        result = &mut server => {
            logger.shutdown(settings.general.shutdown_grace()).await;
            return match result {
                Ok(served) => served.map_err(Into::into),
                Err(e) => Err(e.into()),
            };
        }
        _ = signalled.notified() => {}
    }

    // Graceful shutdown.
    let grace = settings.general.shutdown_grace();
    let deadline = tokio::time::Instant::now() + grace;
    gate.drain(grace).await;
    match tokio::time::timeout_at(deadline, &mut server).await {
        Ok(Ok(Ok(()))) => info!("API server stopped"),
        Ok(Ok(Err(e))) => warn!(error = %e, "API server stopped with an error"),
        Ok(Err(e)) => warn!(error = %e, "API server task failed"),
        Err(_) => {
            warn!(grace_secs = grace.as_secs(), "Grace period elapsed, closing open connections");
            server.abort();
        }
    }

    if !logger.shutdown(grace).await {
        warn!(stats = ?logger.stats(), "Session log not fully flushed");
    }
    info!("Ragline stopped");
    Ok(())
}

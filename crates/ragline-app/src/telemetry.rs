//! Tracing subscriber setup: env filter, console layer, rolling file layer.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use ragline_core::config::{GeneralConfig, LogFileConfig, LogFormat, LogRotation};
use ragline_core::{RaglineError, Settings};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the non-blocking file writer flushing until dropped.
pub struct TelemetryGuard {
    _file: Option<WorkerGuard>,
}

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(general: &GeneralConfig) -> String {
    if general.verbose {
        "debug".to_string()
    } else {
        general.log_level.clone()
    }
}

fn build_filter(general: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(general)))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    }
}

fn file_layer(
    config: &LogFileConfig,
    format: LogFormat,
) -> Result<(BoxedLayer, WorkerGuard), RaglineError> {
    let directory = Path::new(&config.directory);
    std::fs::create_dir_all(directory)?;
    let appender = match config.rotation {
        LogRotation::Daily => rolling::daily(directory, &config.filename),
        LogRotation::Hourly => rolling::hourly(directory, &config.filename),
        LogRotation::Never => rolling::never(directory, &config.filename),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = match format {
        LogFormat::Text => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    };
    Ok((layer, guard))
}

/// Install the global subscriber. Hold the returned guard for the life of
/// the process.
pub fn init(settings: &Settings) -> Result<TelemetryGuard, RaglineError> {
    let logging = &settings.logging;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if logging.console {
        layers.push(console_layer(logging.format));
    }

    let mut file_guard = None;
    if logging.file.enabled {
        let (layer, guard) = file_layer(&logging.file, logging.format)?;
        layers.push(layer);
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(&settings.general))
        .try_init()
        .map_err(|e| RaglineError::Config(format!("cannot install tracing subscriber: {e}")))?;

    Ok(TelemetryGuard { _file: file_guard })
}

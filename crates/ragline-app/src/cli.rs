//! CLI argument definitions for the Ragline gateway.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::Parser;

use ragline_core::Settings;

pub const CONFIG_ENV: &str = "RAGLINE_CONFIG";
pub const PORT_ENV: &str = "RAGLINE_PORT";

/// Ragline - a retrieval-augmented chat gateway.
#[derive(Parser, Debug)]
#[command(name = "ragline", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Address to bind the API server to.
    #[arg(long = "host")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Load and validate the configuration, print a summary, and exit.
    #[arg(long = "check-config")]
    pub check_config: bool,

    /// Print session log totals and the latest N exchanges, and exit.
    #[arg(long = "recent", value_name = "N")]
    pub recent: Option<u64>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > RAGLINE_CONFIG > ./config.toml.
    pub fn resolve_config_path<F>(&self, lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = lookup(CONFIG_ENV).filter(|p| !p.trim().is_empty()) {
            return PathBuf::from(p);
        }
        PathBuf::from("config.toml")
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > RAGLINE_PORT > config file value.
    pub fn resolve_port<F>(&self, config_port: u16, lookup: F) -> u16
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = self.port {
            return p;
        }
        lookup(PORT_ENV)
            .and_then(|val| val.trim().parse::<u16>().ok())
            .unwrap_or(config_port)
    }

    /// Write command-line overrides into the loaded settings.
    pub fn apply<F>(&self, settings: &mut Settings, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        settings.general.port = self.resolve_port(settings.general.port, lookup);
        if let Some(ref host) = self.host {
            settings.general.host = host.clone();
        }
        if let Some(ref level) = self.log_level {
            settings.general.log_level = level.clone();
        }
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RaglineError, Result};

/// Default system policy placed at the top of every generation prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for this organization. \
Answer the user's question using only the provided context. \
If the context does not contain the answer, say that you do not know.";

/// Default canned reply for requests the safety evaluator rejects.
pub const DEFAULT_REFUSAL_MESSAGE: &str =
    "I'm sorry, but I can't help with that request. Please ask a different question.";

/// Default note rendered in place of the context section when retrieval is empty.
pub const DEFAULT_NO_CONTEXT_NOTE: &str =
    "No relevant information was found in the knowledge base for this question.";

/// Environment variable consulted for the OpenAI-compatible API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Immutable settings snapshot for the gateway.
///
/// Loaded once at startup and shared as `Arc<Settings>`; every component
/// receives the sections it needs through its constructor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub session_log: SessionLogConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub api_keys: ApiKeysConfig,
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// Prompt files referenced by the configuration are read relative to the
    /// file's directory, and environment overrides are applied.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings: Settings = toml::from_str(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        settings.resolve_files(base)?;
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        info!("Configuration loaded from {}", path.display());
        Ok(settings)
    }

    /// Read `*_file` prompt overrides into their inline counterparts.
    pub fn resolve_files(&mut self, base: &Path) -> Result<()> {
        if let Some(file) = &self.general.system_prompt_file {
            self.general.system_prompt = read_text_file(base, file)?;
        }
        if let Some(file) = &self.general.no_results_message_file {
            self.general.no_results_message = read_text_file(base, file)?;
        }
        if let Some(file) = &self.safety.prompt_file {
            self.safety.prompt = Some(read_text_file(base, file)?);
        }
        Ok(())
    }

    /// Fill secrets left empty in the file from the environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.openai.api_key.is_empty() {
            if let Some(key) = lookup(OPENAI_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
                self.openai.api_key = key;
            }
        }
    }

    /// Reject combinations that would make the gateway misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.retrieval.relevance_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RaglineError::Config(format!(
                "retrieval.relevance_threshold must be within 0..=1, got {threshold}"
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(RaglineError::Config(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if self.safety.is_active() && self.safety.max_retries == 0 {
            return Err(RaglineError::Config(
                "safety.max_retries must be at least 1 when safety is enabled".to_string(),
            ));
        }
        if self.safety.request_timeout_ms == 0 {
            return Err(RaglineError::Config(
                "safety.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.general.max_message_length == 0 {
            return Err(RaglineError::Config(
                "general.max_message_length must be greater than zero".to_string(),
            ));
        }
        if self.generation.provider == GenerationProvider::Openai
            && self.openai.model.trim().is_empty()
        {
            return Err(RaglineError::Config(
                "openai.model is required when generation.provider = \"openai\"".to_string(),
            ));
        }
        if self.session_log.queue_capacity == 0 {
            return Err(RaglineError::Config(
                "session_log.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Label of the model answering chat requests, as recorded in the session log.
    pub fn backend_label(&self) -> String {
        match self.generation.provider {
            GenerationProvider::Ollama => self.ollama.model.clone(),
            GenerationProvider::Openai => self.openai.model.clone(),
            GenerationProvider::Mock => "mock".to_string(),
        }
    }
}

fn read_text_file(base: &Path, file: &str) -> Result<String> {
    let path = PathBuf::from(file);
    let path = if path.is_absolute() {
        path
    } else {
        base.join(path)
    };
    let text = std::fs::read_to_string(&path).map_err(|e| {
        RaglineError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(text.trim().to_string())
}

// =============================================================================
// General / logging
// =============================================================================

/// Server and prompt settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub host: String,
    pub port: u16,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Raises the default log level to debug.
    pub verbose: bool,
    /// Maximum user message length in characters.
    pub max_message_length: usize,
    /// How long in-flight requests may drain after shutdown begins.
    pub shutdown_grace_secs: u64,
    pub system_prompt: String,
    pub system_prompt_file: Option<String>,
    pub no_results_message: String,
    pub no_results_message_file: Option<String>,
    pub refusal_message: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            verbose: false,
            max_message_length: 4_000,
            shutdown_grace_secs: 10,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            system_prompt_file: None,
            no_results_message: DEFAULT_NO_CONTEXT_NOTE.to_string(),
            no_results_message_file: None,
            refusal_message: DEFAULT_REFUSAL_MESSAGE.to_string(),
        }
    }
}

impl GeneralConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write logs to stdout.
    pub console: bool,
    pub format: LogFormat,
    #[serde(default)]
    pub file: LogFileConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console: true,
            format: LogFormat::Text,
            file: LogFileConfig::default(),
        }
    }
}

/// Rolling log file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFileConfig {
    pub enabled: bool,
    pub directory: String,
    pub filename: String,
    pub rotation: LogRotation,
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: "logs".to_string(),
            filename: "ragline.log".to_string(),
            rotation: LogRotation::Daily,
        }
    }
}

// =============================================================================
// Safety
// =============================================================================

/// How classifier output is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    /// Every query is safe; the classifier is never called.
    Disabled,
    /// Only an explicit `{"safe": <bool>}` object is accepted; anything else is unsafe.
    #[default]
    Strict,
    /// Looser marker parsing; unparsable output is ambiguous.
    Fuzzy,
}

/// What fuzzy mode does with ambiguous classifier output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguousPolicy {
    #[default]
    Retry,
    Refuse,
    Allow,
}

/// Safety evaluator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub enabled: bool,
    pub mode: SafetyMode,
    /// Total classifier attempts per request.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Upper bound of the uniform jitter added to each retry delay.
    pub retry_jitter_ms: u64,
    /// Bound on a single classifier attempt.
    pub request_timeout_ms: u64,
    /// Verdict used when every attempt failed.
    pub allow_on_timeout: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub ambiguous_policy: AmbiguousPolicy,
    /// Classifier instructions; the built-in prompt is used when unset.
    pub prompt: Option<String>,
    pub prompt_file: Option<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SafetyMode::Strict,
            max_retries: 3,
            retry_delay_ms: 1_000,
            retry_jitter_ms: 250,
            request_timeout_ms: 15_000,
            allow_on_timeout: false,
            temperature: 0.0,
            max_tokens: 20,
            ambiguous_policy: AmbiguousPolicy::Retry,
            prompt: None,
            prompt_file: None,
        }
    }
}

impl SafetyConfig {
    /// Whether the classifier is consulted at all.
    pub fn is_active(&self) -> bool {
        self.enabled && self.mode != SafetyMode::Disabled
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Worst-case wall time of one evaluation, jitter included.
    pub fn worst_case(&self) -> Duration {
        let attempts = u64::from(self.max_retries.max(1));
        let waits = attempts.saturating_sub(1);
        Duration::from_millis(
            attempts * self.request_timeout_ms
                + waits * (self.retry_delay_ms + self.retry_jitter_ms),
        )
    }
}

// =============================================================================
// Retrieval / embedding
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process cosine index seeded from `[[retrieval.seed]]`.
    #[default]
    Memory,
    /// Chroma REST API.
    Chroma,
}

/// Vector store and relevance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub store: StoreKind,
    /// Collection used when the caller's API key does not name one.
    pub collection: String,
    pub top_k: usize,
    /// Passages scoring strictly below this are discarded.
    pub relevance_threshold: f32,
    #[serde(default)]
    pub chroma: ChromaConfig,
    /// Documents indexed into the memory store at startup.
    pub seed: Vec<SeedDocument>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            collection: "default".to_string(),
            top_k: 3,
            relevance_threshold: 0.5,
            chroma: ChromaConfig::default(),
            seed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromaConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            timeout_secs: 10,
        }
    }
}

/// A document to index into the memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedDocument {
    pub id: String,
    pub text: String,
    /// Target collection; the default collection when unset.
    #[serde(default)]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            timeout_secs: 30,
        }
    }
}

// =============================================================================
// Generation
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    #[default]
    Ollama,
    Openai,
    /// Scripted local model for offline runs.
    Mock,
}

/// Backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: GenerationProvider,
    /// Use the streaming variant when the provider supports it.
    pub stream: bool,
    pub request_timeout_secs: u64,
    /// Exit at startup when the backend connectivity check fails.
    pub require_backend_on_start: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::Ollama,
            stream: true,
            request_timeout_secs: 120,
            require_backend_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub num_predict: u32,
    pub num_ctx: u32,
    pub stop: Vec<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "gemma3:1b".to_string(),
            temperature: 0.1,
            top_p: 0.8,
            top_k: 20,
            repeat_penalty: 1.1,
            num_predict: 1024,
            num_ctx: 8192,
            stop: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    /// Falls back to the `OPENAI_API_KEY` environment variable when empty.
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            top_p: 0.8,
            max_tokens: 1024,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

// =============================================================================
// Audio / session log / health / api keys
// =============================================================================

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    /// Base URL of an OpenAI-compatible `/v1/audio/speech` endpoint.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    /// Response format: mp3, wav, opus, ...
    pub format: String,
    pub timeout_secs: u64,
    /// Text longer than this is cut on a word boundary before synthesis.
    pub max_chars: usize,
    /// Path probed by the health check.
    pub health_path: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:8880".to_string(),
            api_key: String::new(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            format: "mp3".to_string(),
            timeout_secs: 30,
            max_chars: 4_000,
            health_path: "/health".to_string(),
        }
    }
}

/// Session log sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLogConfig {
    pub enabled: bool,
    /// SQLite database path.
    pub path: String,
    /// Entries held in memory before the oldest is dropped.
    pub queue_capacity: usize,
}

impl Default for SessionLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "data/sessions.db".to_string(),
            queue_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Bound on each component probe.
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 3_000,
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// API key scoping for `/chat` (and optionally `/health`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeysConfig {
    pub enabled: bool,
    pub header_name: String,
    pub require_for_health: bool,
    pub keys: Vec<ApiKeyEntry>,
}

impl Default for ApiKeysConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: "X-API-Key".to_string(),
            require_for_health: false,
            keys: Vec::new(),
        }
    }
}

impl ApiKeysConfig {
    pub fn find(&self, key: &str) -> Option<&ApiKeyEntry> {
        self.keys.iter().find(|entry| entry.key == key)
    }
}

/// One accepted key and the collection its callers are scoped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub client_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.general.port, 3000);
        assert_eq!(settings.general.log_level, "info");
        assert_eq!(settings.safety.mode, SafetyMode::Strict);
        assert_eq!(settings.safety.max_retries, 3);
        assert!(!settings.safety.allow_on_timeout);
        assert_eq!(settings.retrieval.top_k, 3);
        assert_eq!(settings.generation.provider, GenerationProvider::Ollama);
        assert!(settings.generation.stream);
        assert!(!settings.audio.enabled);
        assert_eq!(settings.api_keys.header_name, "X-API-Key");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
port = 8080
verbose = true
refusal_message = "Nope."

[safety]
mode = "fuzzy"
max_retries = 2
ambiguous_policy = "refuse"

[retrieval]
store = "chroma"
collection = "handbook"
top_k = 5
relevance_threshold = 0.35

[retrieval.chroma]
url = "http://chroma:8000"

[generation]
provider = "openai"
stream = false

[openai]
model = "gpt-4o"
api_key = "sk-test"

[[api_keys.keys]]
key = "abc"
collection = "hr"
client_name = "intranet"
"#;
        let file = create_temp_config(content);
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.general.port, 8080);
        assert!(settings.general.verbose);
        assert_eq!(settings.general.refusal_message, "Nope.");
        assert_eq!(settings.safety.mode, SafetyMode::Fuzzy);
        assert_eq!(settings.safety.ambiguous_policy, AmbiguousPolicy::Refuse);
        assert_eq!(settings.retrieval.store, StoreKind::Chroma);
        assert_eq!(settings.retrieval.chroma.url, "http://chroma:8000");
        assert_eq!(settings.retrieval.relevance_threshold, 0.35);
        assert_eq!(settings.generation.provider, GenerationProvider::Openai);
        assert_eq!(settings.openai.api_key, "sk-test");
        assert_eq!(settings.backend_label(), "gpt-4o");
        let entry = settings.api_keys.find("abc").unwrap();
        assert_eq!(entry.collection.as_deref(), Some("hr"));
        assert_eq!(entry.client_name, "intranet");
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let file = create_temp_config("[general]\nlog_level = \"warn\"\n");
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.general.log_level, "warn");
        assert_eq!(settings.general.port, 3000);
        assert_eq!(settings.safety.request_timeout_ms, 15_000);
    }

    #[test]
    fn test_load_invalid_mode_is_rejected() {
        let file = create_temp_config("[safety]\nmode = \"lenient\"\n");
        assert!(matches!(
            Settings::load(file.path()),
            Err(RaglineError::Config(_))
        ));
    }

    #[test]
    fn test_prompt_files_resolve_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("system.txt"), "Be brief.\n").unwrap();
        std::fs::write(dir.path().join("empty.txt"), "Nothing found.").unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[general]\nsystem_prompt_file = \"system.txt\"\nno_results_message_file = \"empty.txt\"\n",
        )
        .unwrap();

        let settings = Settings::load(&config_path).unwrap();
        assert_eq!(settings.general.system_prompt, "Be brief.");
        assert_eq!(settings.general.no_results_message, "Nothing found.");
    }

    #[test]
    fn test_missing_prompt_file_is_config_error() {
        let file = create_temp_config("[safety]\nprompt_file = \"/nonexistent/prompt.txt\"\n");
        assert!(matches!(
            Settings::load(file.path()),
            Err(RaglineError::Config(_))
        ));
    }

    #[test]
    fn test_env_override_fills_empty_api_key() {
        let mut settings = Settings::default();
        settings.apply_env_overrides(|key| {
            (key == OPENAI_API_KEY_ENV).then(|| "sk-env".to_string())
        });
        assert_eq!(settings.openai.api_key, "sk-env");
    }

    #[test]
    fn test_env_override_keeps_explicit_api_key() {
        let mut settings = Settings::default();
        settings.openai.api_key = "sk-file".into();
        settings.apply_env_overrides(|_| Some("sk-env".to_string()));
        assert_eq!(settings.openai.api_key, "sk-file");
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let mut settings = Settings::default();
        settings.retrieval.relevance_threshold = 1.5;
        assert!(settings.validate().is_err());
        settings.retrieval.relevance_threshold = -0.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut settings = Settings::default();
        settings.retrieval.top_k = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_zero_retries_only_matters_when_active() {
        let mut settings = Settings::default();
        settings.safety.max_retries = 0;
        assert!(settings.validate().is_err());
        settings.safety.mode = SafetyMode::Disabled;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_openai_requires_model() {
        let mut settings = Settings::default();
        settings.generation.provider = GenerationProvider::Openai;
        settings.openai.model = " ".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_safety_is_active() {
        let mut safety = SafetyConfig::default();
        assert!(safety.is_active());
        safety.enabled = false;
        assert!(!safety.is_active());
        safety.enabled = true;
        safety.mode = SafetyMode::Disabled;
        assert!(!safety.is_active());
    }

    #[test]
    fn test_safety_worst_case_bound() {
        let safety = SafetyConfig {
            max_retries: 3,
            request_timeout_ms: 100,
            retry_delay_ms: 10,
            retry_jitter_ms: 5,
            ..SafetyConfig::default()
        };
        assert_eq!(safety.worst_case(), Duration::from_millis(330));
    }

    #[test]
    fn test_example_config_parses() {
        let content = include_str!("../../../config.example.toml");
        let settings: Settings = toml::from_str(content).unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.retrieval.seed.len(), 1);
        assert_eq!(settings.safety.ambiguous_policy, AmbiguousPolicy::Retry);
    }
}

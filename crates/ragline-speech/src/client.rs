//! HTTP client for OpenAI-compatible `/v1/audio/speech` servers.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use ragline_core::config::AudioConfig;

use crate::text::prepare_for_speech;
use crate::{SpeechError, SpeechSynthesizer};

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: String,
    voice: &'a str,
    response_format: &'a str,
}

/// Speech synthesizer backed by a remote TTS server.
pub struct HttpSpeechClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    format: String,
    max_chars: usize,
    health_path: String,
}

impl std::fmt::Debug for HttpSpeechClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSpeechClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("format", &self.format)
            .finish()
    }
}

impl HttpSpeechClient {
    pub fn new(config: &AudioConfig) -> Result<Self, SpeechError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SpeechError::Config(format!("cannot build HTTP client: {e}")))?;
        let base = config.base_url.trim_end_matches('/');
        let health_path = if config.health_path.starts_with('/') {
            config.health_path.clone()
        } else {
            format!("/{}", config.health_path)
        };
        Ok(Self {
            http,
            base_url: base.strip_suffix("/v1").unwrap_or(base).to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            format: config.format.clone(),
            max_chars: config.max_chars,
            health_path,
        })
    }

    fn request_body(&self, text: &str) -> Result<SpeechRequest<'_>, SpeechError> {
        let input = prepare_for_speech(text, self.max_chars);
        if input.is_empty() {
            return Err(SpeechError::EmptyInput);
        }
        Ok(SpeechRequest {
            model: &self.model,
            input,
            voice: &self.voice,
            response_format: &self.format,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechClient {
    #[instrument(skip(self, text), fields(voice = %self.voice, chars = text.len()))]
    async fn speak(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        let body = self.request_body(text)?;
        let url = format!("{}/v1/audio/speech", self.base_url);
        let mut request = self.http.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<no body>".into());
            return Err(SpeechError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(SpeechError::EmptyAudio);
        }
        debug!(bytes = audio.len(), "Speech synthesized");
        Ok(audio.to_vec())
    }

    async fn probe(&self) -> Result<(), SpeechError> {
        let url = format!("{}{}", self.base_url, self.health_path);
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SpeechError::Http {
                status: response.status().as_u16(),
                body: "health check failed".into(),
            })
        }
    }
}

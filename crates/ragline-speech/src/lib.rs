//! Ragline Speech crate - text-to-speech for finalized answers.
//!
//! Provides the `SpeechSynthesizer` abstraction, an HTTP client for
//! OpenAI-compatible speech servers, text preparation for speech, and a
//! mock synthesizer for testing without a TTS server.

pub mod client;
pub mod text;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use ragline_core::RaglineError;

pub use client::HttpSpeechClient;
pub use text::prepare_for_speech;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while synthesizing speech. The caller degrades to text-only.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech server unavailable: {0}")]
    Unavailable(String),

    #[error("speech server returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("nothing to synthesize")]
    EmptyInput,

    #[error("speech server returned no audio")]
    EmptyAudio,

    #[error("speech configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SpeechError {
    fn from(err: reqwest::Error) -> Self {
        SpeechError::Unavailable(err.to_string())
    }
}

impl From<SpeechError> for RaglineError {
    fn from(err: SpeechError) -> Self {
        RaglineError::Speech(err.to_string())
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Converts finalized answer text into encoded audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`; the returned bytes are in the configured format.
    async fn speak(&self, text: &str) -> Result<Vec<u8>, SpeechError>;

    /// Cheap liveness probe.
    async fn probe(&self) -> Result<(), SpeechError>;
}

// =============================================================================
// Mock implementation
// =============================================================================

/// Mock synthesizer that returns the UTF-8 bytes of the input.
#[derive(Debug, Default)]
pub struct MockSpeech {
    failing: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeech {
    async fn speak(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(SpeechError::Unavailable("mock speech is down".into()));
        }
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyInput);
        }
        Ok(text.as_bytes().to_vec())
    }

    async fn probe(&self) -> Result<(), SpeechError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            Err(SpeechError::Unavailable("mock speech is down".into()))
        } else {
            Ok(())
        }
    }
}

//! Embedding service trait and implementations.
//!
//! - `OllamaEmbedding` calls a running Ollama server's `/api/embeddings`
//!   endpoint. This is the production embedding backend.
//! - `MockEmbedding` provides deterministic token-hashed vectors for tests
//!   and offline runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ragline_core::config::EmbeddingConfig;

use crate::error::VectorError;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. The same
/// service must be used for indexing and querying a collection.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, VectorError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future`, which is not object-safe.
/// This trait boxes the future so the retriever can hold an
/// `Arc<dyn DynEmbeddingService>` chosen at startup.
pub trait DynEmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, VectorError>> + Send + 'a>>;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, VectorError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// OllamaEmbedding - HTTP client for a local Ollama server
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedding service backed by Ollama's `/api/embeddings` endpoint.
///
/// The vector size depends on the model, so `dimensions()` reports the size
/// of the last vector returned (0 before the first call).
#[derive(Debug)]
pub struct OllamaEmbedding {
    http: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: AtomicUsize,
}

impl OllamaEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, VectorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VectorError::Embedding(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: normalize_base_url(&config.base_url),
            model: config.model.clone(),
            dimensions: AtomicUsize::new(0),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl EmbeddingService for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| VectorError::Embedding(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorError::Embedding(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Embedding(format!("malformed embedding response: {e}")))?;
        if parsed.embedding.is_empty() {
            return Err(VectorError::Embedding(format!(
                "model {} returned an empty embedding",
                self.model
            )));
        }

        self.dimensions
            .store(parsed.embedding.len(), Ordering::Relaxed);
        debug!(model = %self.model, dims = parsed.embedding.len(), "query embedded");
        Ok(parsed.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions.load(Ordering::Relaxed)
    }
}

/// Strip trailing slashes and an OpenAI-compatible `/v1` suffix.
pub(crate) fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string()
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic token-hashed vectors
// ---------------------------------------------------------------------------

/// Dimensionality of [`MockEmbedding`] vectors.
pub const MOCK_DIMENSIONS: usize = 384;

/// Mock embedding service that hashes lowercase word tokens into buckets.
///
/// Identical inputs produce identical vectors and texts sharing words have
/// positive cosine similarity, which is enough to exercise retrieval and
/// relevance thresholds without a model.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub fn new() -> Self {
        Self
    }

    /// Compute the vector synchronously.
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut result = vec![0.0f32; MOCK_DIMENSIONS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % MOCK_DIMENSIONS as u64) as usize;
            result[bucket] += 1.0;
        }

        let norm: f32 = result.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut result {
                *v /= norm;
            }
        }
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        Ok(Self::vector_for(text))
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }
}

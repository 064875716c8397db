//! Query-time retrieval: embed, search, threshold.

use std::sync::Arc;

use tracing::{debug, warn};

use ragline_core::config::RetrievalConfig;
use ragline_core::RetrievedContext;

use crate::embedding::DynEmbeddingService;
use crate::error::VectorError;
use crate::store::VectorStore;

/// Turns a user query into a [`RetrievedContext`].
///
/// Retrieval never fails a request: any embedding or store error is logged
/// and yields an empty context.
pub struct Retriever {
    embedder: Arc<dyn DynEmbeddingService>,
    store: Arc<dyn VectorStore>,
    default_collection: String,
    top_k: usize,
    relevance_threshold: f32,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn DynEmbeddingService>,
        store: Arc<dyn VectorStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            default_collection: config.collection.clone(),
            top_k: config.top_k,
            relevance_threshold: config.relevance_threshold,
        }
    }

    /// Retrieve passages for `query` from `collection` (or the default).
    pub async fn retrieve(&self, query: &str, collection: Option<&str>) -> RetrievedContext {
        let collection = collection.unwrap_or(&self.default_collection);
        match self.try_retrieve(query, collection).await {
            Ok(context) => {
                debug!(
                    collection,
                    passages = context.len(),
                    threshold = self.relevance_threshold,
                    "Retrieved context"
                );
                context
            }
            Err(VectorError::CollectionNotFound(name)) => {
                warn!(collection = %name, "Collection not found, continuing without context");
                RetrievedContext::empty()
            }
            Err(e) => {
                warn!(collection, error = %e, "Retrieval failed, continuing without context");
                RetrievedContext::empty()
            }
        }
    }

    async fn try_retrieve(
        &self,
        query: &str,
        collection: &str,
    ) -> Result<RetrievedContext, VectorError> {
        let embedding = self.embedder.embed_boxed(query).await?;
        let candidates = self.store.query(collection, &embedding, self.top_k).await?;
        Ok(RetrievedContext::from_candidates(
            candidates,
            self.relevance_threshold,
            self.top_k,
        ))
    }

    /// Liveness of the backing store.
    pub async fn probe(&self) -> Result<(), VectorError> {
        self.store.heartbeat().await
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn default_collection(&self) -> &str {
        &self.default_collection
    }
}

//! Vector store abstraction and its two implementations.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use ragline_core::config::{ChromaConfig, SeedDocument};
use ragline_core::Passage;

use crate::embedding::DynEmbeddingService;
use crate::error::VectorError;
use crate::index::VectorIndex;

/// Similarity search over a named collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short label used in logs and health output.
    fn name(&self) -> &'static str;

    /// Return up to `k` passages for `embedding`, best first, scores in 0..=1.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<Passage>, VectorError>;

    /// Cheap liveness probe.
    async fn heartbeat(&self) -> Result<(), VectorError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store backed by [`VectorIndex`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    index: VectorIndex,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Embed `text` and add it to `collection`.
    pub async fn ingest(
        &self,
        embedder: &dyn DynEmbeddingService,
        collection: &str,
        source_id: &str,
        text: &str,
    ) -> Result<(), VectorError> {
        let embedding = embedder.embed_boxed(text).await?;
        self.index.insert(collection, source_id, text, embedding)
    }

    /// Index configured seed documents. Returns how many were indexed.
    ///
    /// The default collection is created even when no document targets it.
    pub async fn seed(
        &self,
        embedder: &dyn DynEmbeddingService,
        documents: &[SeedDocument],
        default_collection: &str,
    ) -> Result<usize, VectorError> {
        self.index.ensure_collection(default_collection)?;
        for doc in documents {
            let collection = doc.collection.as_deref().unwrap_or(default_collection);
            self.ingest(embedder, collection, &doc.id, &doc.text).await?;
        }
        if !documents.is_empty() {
            info!(
                count = documents.len(),
                collections = ?self.index.collection_names(),
                "Seeded memory vector store"
            );
        }
        Ok(documents.len())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<Passage>, VectorError> {
        self.index.search(collection, embedding, k)
    }

    async fn heartbeat(&self) -> Result<(), VectorError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChromaStore
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChromaCollection {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChromaQueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl ChromaQueryResponse {
    /// Flatten the first (only) query row into passages with
    /// `relevance = 1 - distance`, clamped to 0..=1.
    fn into_passages(self) -> Vec<Passage> {
        let ids = self.ids.into_iter().next().unwrap_or_default();
        let documents = self
            .documents
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let distances = self
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();

        ids.into_iter()
            .enumerate()
            .filter_map(|(i, source_id)| {
                let text = documents.get(i).cloned().flatten()?;
                let distance = distances.get(i).copied().flatten().unwrap_or(1.0);
                Some(Passage {
                    text,
                    source_id,
                    relevance_score: (1.0 - distance).clamp(0.0, 1.0),
                })
            })
            .collect()
    }
}

/// A response meaning the collection (or the id standing for it) is gone.
fn is_missing_collection(status: reqwest::StatusCode, body: &str) -> bool {
    status == reqwest::StatusCode::NOT_FOUND || body.contains("does not exist")
}

/// Client for a Chroma server's REST API (v1).
///
/// Collection ids are resolved by name on first use and cached. A query
/// against a cached id that no longer exists evicts it and resolves the
/// name once more.
#[derive(Debug)]
pub struct ChromaStore {
    http: reqwest::Client,
    base_url: String,
    collection_ids: RwLock<HashMap<String, String>>,
}

impl ChromaStore {
    pub fn new(config: &ChromaConfig) -> Result<Self, VectorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VectorError::Unavailable(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection_ids: RwLock::new(HashMap::new()),
        })
    }

    async fn collection_id(&self, name: &str) -> Result<String, VectorError> {
        let cached = {
            let ids = self
                .collection_ids
                .read()
                .map_err(|_| VectorError::LockPoisoned)?;
            ids.get(name).cloned()
        };
        if let Some(id) = cached {
            return Ok(id);
        }

        let url = format!("{}/api/v1/collections/{}", self.base_url, name);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_missing_collection(status, &body) {
                return Err(VectorError::CollectionNotFound(name.to_string()));
            }
            return Err(VectorError::Unavailable(format!(
                "collection lookup returned {status}: {body}"
            )));
        }

        let collection: ChromaCollection = response.json().await?;
        debug!(collection = name, id = %collection.id, "Resolved Chroma collection");
        self.collection_ids
            .write()
            .map_err(|_| VectorError::LockPoisoned)?
            .insert(name.to_string(), collection.id.clone());
        Ok(collection.id)
    }

    fn forget(&self, name: &str) -> Result<(), VectorError> {
        self.collection_ids
            .write()
            .map_err(|_| VectorError::LockPoisoned)?
            .remove(name);
        Ok(())
    }

    /// Query one collection id. `None` when the server no longer knows it.
    async fn query_id(
        &self,
        id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Option<Vec<Passage>>, VectorError> {
        let url = format!("{}/api/v1/collections/{}/query", self.base_url, id);
        let body = json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "distances"],
        });

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if is_missing_collection(status, &text) {
                return Ok(None);
            }
            return Err(VectorError::Unavailable(format!(
                "query returned {status}: {text}"
            )));
        }

        let parsed: ChromaQueryResponse = response.json().await?;
        Ok(Some(parsed.into_passages()))
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &'static str {
        "chroma"
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<Passage>, VectorError> {
        let id = self.collection_id(collection).await?;
        if let Some(passages) = self.query_id(&id, embedding, k).await? {
            return Ok(passages);
        }

        info!(collection, stale_id = %id, "Chroma collection id is stale, resolving again");
        self.forget(collection)?;
        let id = self.collection_id(collection).await?;
        self.query_id(&id, embedding, k)
            .await?
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))
    }

    async fn heartbeat(&self) -> Result<(), VectorError> {
        let url = format!("{}/api/v1/heartbeat", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(VectorError::Unavailable(format!(
                "heartbeat returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_memory_store_seed_and_query() {
        let store = MemoryStore::new();
        let embedder = MockEmbedding::new();
        let docs = vec![
            SeedDocument {
                id: "hours".into(),
                text: "Office hours are Monday to Friday, 9am to 5pm.".into(),
                collection: None,
            },
            SeedDocument {
                id: "parking".into(),
                text: "Visitor parking is behind building C.".into(),
                collection: Some("facilities".into()),
            },
        ];
        assert_eq!(store.seed(&embedder, &docs, "kb").await.unwrap(), 2);

        let query = MockEmbedding::vector_for("office hours");
        let hits = store.query("kb", &query, 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "hours");
        assert!(hits[0].relevance_score > 0.0);
        assert_eq!(store.index().len("facilities"), 1);
    }

    #[tokio::test]
    async fn test_memory_store_default_collection_exists_when_empty() {
        let store = MemoryStore::new();
        store.seed(&MockEmbedding::new(), &[], "kb").await.unwrap();
        assert!(store.query("kb", &[0.0; 4], 3).await.unwrap().is_empty());
        assert!(store.heartbeat().await.is_ok());
    }

    #[test]
    fn test_chroma_response_into_passages() {
        let raw = r#"{
            "ids": [["a", "b", "c"]],
            "documents": [["first", null, "third"]],
            "distances": [[0.25, 0.5, 1.4]]
        }"#;
        let parsed: ChromaQueryResponse = serde_json::from_str(raw).unwrap();
        let passages = parsed.into_passages();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source_id, "a");
        assert!((passages[0].relevance_score - 0.75).abs() < 1e-6);
        assert_eq!(passages[1].source_id, "c");
        assert_eq!(passages[1].relevance_score, 0.0);
    }

    #[test]
    fn test_chroma_empty_response() {
        let parsed: ChromaQueryResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.into_passages().is_empty());
    }

    #[tokio::test]
    async fn test_chroma_unreachable_heartbeat() {
        let store = ChromaStore::new(&ChromaConfig {
            url: "http://127.0.0.1:9/".into(),
            timeout_secs: 2,
        })
        .unwrap();
        assert_eq!(store.base_url, "http://127.0.0.1:9");
        assert!(matches!(
            store.heartbeat().await,
            Err(VectorError::Unavailable(_))
        ));
    }

    // =====================================================================
    // Stale collection ids
    // =====================================================================

    type Route = dyn Fn(&str) -> (u16, String) + Send + Sync;

    /// HTTP/1.1 stub answering each request line from `route`. Returns the
    /// base URL and the request lines seen.
    async fn stub_server(route: Arc<Route>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let head = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                        continue;
                    };
                    let head = String::from_utf8_lossy(&buf[..end]).to_string();
                    let length = head
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length || n == 0 {
                        break head;
                    }
                };
                let line: Vec<&str> = head.lines().next().unwrap().split(' ').collect();
                let request = format!("{} {}", line[0], line[1]);
                let (status, body) = route(&request);
                log.lock().unwrap().push(request);
                let reply = format!(
                    "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        (format!("http://{addr}"), seen)
    }

    fn chroma(url: String) -> ChromaStore {
        ChromaStore::new(&ChromaConfig {
            url,
            timeout_secs: 5,
        })
        .unwrap()
    }

    const HITS: &str = r#"{"ids": [["hours"]], "documents": [["Open 9 to 5."]], "distances": [[0.2]]}"#;
    const GONE: &str = r#"{"error": "InvalidCollection", "message": "Collection old does not exist."}"#;

    #[test]
    fn test_missing_collection_detection() {
        assert!(is_missing_collection(reqwest::StatusCode::NOT_FOUND, ""));
        assert!(is_missing_collection(reqwest::StatusCode::BAD_REQUEST, GONE));
        assert!(!is_missing_collection(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "out of memory"
        ));
    }

    #[tokio::test]
    async fn test_stale_collection_id_evicted_and_resolved_again() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lookups);
        let (url, seen) = stub_server(Arc::new(move |request: &str| match request {
            "GET /api/v1/collections/kb" => {
                let id = if counter.fetch_add(1, Ordering::SeqCst) == 0 { "old" } else { "new" };
                (200, format!(r#"{{"id": "{id}"}}"#))
            }
            "POST /api/v1/collections/old/query" => (400, GONE.to_string()),
            "POST /api/v1/collections/new/query" => (200, HITS.to_string()),
            _ => (500, String::new()),
        }))
        .await;
        let store = chroma(url);

        let hits = store.query("kb", &[0.1, 0.2], 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "hours");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "GET /api/v1/collections/kb",
                "POST /api/v1/collections/old/query",
                "GET /api/v1/collections/kb",
                "POST /api/v1/collections/new/query",
            ]
        );

        store.query("kb", &[0.1, 0.2], 3).await.unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_collection_gone_after_retry_is_not_found() {
        let (url, seen) = stub_server(Arc::new(|request: &str| match request {
            "GET /api/v1/collections/kb" => (200, r#"{"id": "old"}"#.to_string()),
            _ => (404, GONE.to_string()),
        }))
        .await;
        let store = chroma(url);

        let err = store.query("kb", &[0.1], 3).await.unwrap_err();
        assert!(matches!(err, VectorError::CollectionNotFound(name) if name == "kb"));
        assert_eq!(seen.lock().unwrap().len(), 4);
    }
}

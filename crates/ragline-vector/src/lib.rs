//! Ragline vector crate - embedding services, vector stores, and the retriever.
//!
//! Provides an embedding service trait with Ollama and deterministic mock
//! implementations, a `VectorStore` abstraction over an in-memory cosine
//! index and a Chroma server, and the `Retriever` that turns a user query
//! into a thresholded `RetrievedContext`.

pub mod embedding;
pub mod error;
pub mod index;
pub mod retriever;
pub mod store;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OllamaEmbedding};
pub use error::VectorError;
pub use index::VectorIndex;
pub use retriever::Retriever;
pub use store::{ChromaStore, MemoryStore, VectorStore};

//! In-memory vector index with brute-force cosine similarity search.
//!
//! Passages are grouped by collection. Search is O(n) in the size of the
//! collection, which is fine for seeded knowledge bases and tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ragline_core::Passage;

use crate::error::VectorError;

/// An entry stored in the vector index.
#[derive(Debug, Clone)]
struct IndexedPassage {
    source_id: String,
    text: String,
    embedding: Vec<f32>,
}

/// In-memory vector index keyed by collection name.
///
/// Thread-safe via interior RwLock; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    collections: Arc<RwLock<HashMap<String, Vec<IndexedPassage>>>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a passage into a collection, creating the collection if needed.
    ///
    /// Overwrites any existing passage with the same source id.
    pub fn insert(
        &self,
        collection: &str,
        source_id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Result<(), VectorError> {
        let source_id = source_id.into();
        let mut collections = self
            .collections
            .write()
            .map_err(|_| VectorError::LockPoisoned)?;
        let entries = collections.entry(collection.to_string()).or_default();
        entries.retain(|e| e.source_id != source_id);
        entries.push(IndexedPassage {
            source_id,
            text: text.into(),
            embedding,
        });
        Ok(())
    }

    /// Return the `k` passages most similar to `query`, best first.
    ///
    /// Scores are cosine similarity clamped to 0..=1. An unknown collection
    /// is an error so callers can tell it apart from an empty one.
    pub fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Passage>, VectorError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| VectorError::LockPoisoned)?;
        let entries = collections
            .get(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        let mut scored: Vec<Passage> = entries
            .iter()
            .map(|entry| Passage {
                text: entry.text.clone(),
                source_id: entry.source_id.clone(),
                relevance_score: cosine_similarity(query, &entry.embedding).clamp(0.0, 1.0)
                    as f32,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Remove a passage. Returns whether it existed.
    pub fn delete(&self, collection: &str, source_id: &str) -> Result<bool, VectorError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| VectorError::LockPoisoned)?;
        let Some(entries) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.source_id != source_id);
        Ok(entries.len() != before)
    }

    /// Create an empty collection if it does not exist yet.
    pub fn ensure_collection(&self, collection: &str) -> Result<(), VectorError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| VectorError::LockPoisoned)?;
        collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    /// Number of passages in a collection (0 when it does not exist).
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections
            .read()
            .map(|c| {
                let mut names: Vec<String> = c.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let mag_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_insert_and_search() {
        let index = VectorIndex::new();
        index.insert("kb", "a", "alpha", unit(4, 0)).unwrap();
        index.insert("kb", "b", "beta", unit(4, 1)).unwrap();

        let hits = index.search("kb", &unit(4, 0), 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source_id, "a");
        assert!((hits[0].relevance_score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].relevance_score, 0.0);
    }

    #[test]
    fn test_search_respects_k() {
        let index = VectorIndex::new();
        for i in 0..4 {
            index.insert("kb", format!("p{i}"), "text", unit(4, i)).unwrap();
        }
        assert_eq!(index.search("kb", &unit(4, 2), 2).unwrap().len(), 2);
    }

    #[test]
    fn test_negative_similarity_clamped_to_zero() {
        let index = VectorIndex::new();
        index.insert("kb", "neg", "opposite", vec![-1.0, 0.0]).unwrap();
        let hits = index.search("kb", &[1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].relevance_score, 0.0);
    }

    #[test]
    fn test_unknown_collection_is_error() {
        let index = VectorIndex::new();
        assert!(matches!(
            index.search("missing", &[1.0], 3),
            Err(VectorError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_empty_collection_returns_nothing() {
        let index = VectorIndex::new();
        index.ensure_collection("kb").unwrap();
        assert!(index.search("kb", &[1.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_insert_overwrites_same_source() {
        let index = VectorIndex::new();
        index.insert("kb", "a", "old", unit(2, 0)).unwrap();
        index.insert("kb", "a", "new", unit(2, 0)).unwrap();
        assert_eq!(index.len("kb"), 1);
        assert_eq!(index.search("kb", &unit(2, 0), 1).unwrap()[0].text, "new");
    }

    #[test]
    fn test_delete() {
        let index = VectorIndex::new();
        index.insert("kb", "a", "alpha", unit(2, 0)).unwrap();
        assert!(index.delete("kb", "a").unwrap());
        assert!(!index.delete("kb", "a").unwrap());
        assert!(!index.delete("other", "a").unwrap());
        assert_eq!(index.len("kb"), 0);
    }

    #[test]
    fn test_collections_are_isolated() {
        let index = VectorIndex::new();
        index.insert("hr", "a", "leave policy", unit(2, 0)).unwrap();
        index.insert("it", "b", "vpn setup", unit(2, 0)).unwrap();
        let hits = index.search("hr", &unit(2, 0), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "a");
        assert_eq!(index.collection_names(), vec!["hr", "it"]);
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-9);
    }
}

//! Vector store abstraction for the dense half of the index.
//!
//! Provides a trait-based interface so tests can wire in an in-memory
//! backend while production uses the persistent SQLite-backed store.

mod memory;
mod sqlite;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A chunk record in the dense index: embedding plus the metadata needed to
/// play the passage back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Chunk id, `{video_id}-sem-{i}`.
    pub chunk_id: String,
    pub video_id: String,
    pub start_sec: f64,
    pub end_sec: f64,
    /// The chunk text, stored as the document body.
    pub text: String,
    /// Normalized embedding.
    pub embedding: Vec<f32>,
}

/// A dense search hit.
#[derive(Debug, Clone)]
pub struct DenseHit {
    pub chunk_id: String,
    pub video_id: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    /// 1 − cosine distance; higher is better.
    pub score: f32,
}

/// Trait for vector store implementations.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Bulk upsert chunk records.
    async fn upsert_batch(&self, records: &[VectorRecord]) -> Result<usize>;

    /// Nearest-neighbor query, optionally restricted to a set of videos.
    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        video_ids: Option<&[String]>,
    ) -> Result<Vec<DenseHit>>;

    /// Fetch records by chunk id (for joining timestamps onto lexical hits).
    async fn get(&self, chunk_ids: &[String]) -> Result<Vec<VectorRecord>>;

    /// Delete all records of a video. Returns the number removed.
    async fn delete_by_video(&self, video_id: &str) -> Result<usize>;

    /// All chunk ids stored for a video, sorted.
    async fn chunk_ids_for_video(&self, video_id: &str) -> Result<Vec<String>>;

    /// Total record count.
    async fn count(&self) -> Result<usize>;
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }
}

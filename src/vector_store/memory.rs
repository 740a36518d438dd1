//! In-memory vector store implementation.
//!
//! Useful for testing and small datasets.

use super::{cosine_similarity, DenseHit, VectorRecord, VectorStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory vector store.
pub struct MemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryVectorStore {
    /// Create a new in-memory vector store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert_batch(&self, records: &[VectorRecord]) -> Result<usize> {
        let mut store = self.records.write().unwrap();
        for record in records {
            store.insert(record.chunk_id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        video_ids: Option<&[String]>,
    ) -> Result<Vec<DenseHit>> {
        let store = self.records.read().unwrap();

        let mut results: Vec<DenseHit> = store
            .values()
            .filter(|r| match video_ids {
                Some(ids) if !ids.is_empty() => ids.iter().any(|v| v == &r.video_id),
                _ => true,
            })
            .map(|r| DenseHit {
                chunk_id: r.chunk_id.clone(),
                video_id: r.video_id.clone(),
                start_sec: r.start_sec,
                end_sec: r.end_sec,
                text: r.text.clone(),
                score: cosine_similarity(embedding, &r.embedding),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn get(&self, chunk_ids: &[String]) -> Result<Vec<VectorRecord>> {
        let store = self.records.read().unwrap();
        Ok(chunk_ids
            .iter()
            .filter_map(|id| store.get(id).cloned())
            .collect())
    }

    async fn delete_by_video(&self, video_id: &str) -> Result<usize> {
        let mut store = self.records.write().unwrap();
        let before = store.len();
        store.retain(|_, r| r.video_id != video_id);
        Ok(before - store.len())
    }

    async fn chunk_ids_for_video(&self, video_id: &str) -> Result<Vec<String>> {
        let store = self.records.read().unwrap();
        let mut ids: Vec<String> = store
            .values()
            .filter(|r| r.video_id == video_id)
            .map(|r| r.chunk_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryVectorStore::new();

        store
            .upsert_batch(&[VectorRecord {
                chunk_id: "v1-sem-0".to_string(),
                video_id: "v1".to_string(),
                start_sec: 0.0,
                end_sec: 10.0,
                text: "a sufficiently long passage of transcript text".to_string(),
                embedding: vec![1.0, 0.0],
            }])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "v1-sem-0");

        assert_eq!(store.delete_by_video("v1").await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}

//! Indexing: raw segments → semantic chunks → dense vectors + full-text
//! rows.
//!
//! A re-index is a per-video destructive replace: both stores are wiped
//! for the video before anything is written, so a crashed run is repaired
//! by the next successful one and repeated runs are idempotent.

mod metrics;

pub use metrics::{compute_segmentation_metrics, SegmentationMetrics};

use crate::catalog::{SqliteCatalog, VideoStatus};
use crate::chunking::{ChunkingLimits, SemanticChunker};
use crate::error::{KlippError, Result};
use crate::models::ModelRegistry;
use crate::vector_store::{VectorRecord, VectorStore};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Encode-and-upsert batch size.
const BATCH_SIZE: usize = 64;

/// Summary of an index run.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub video_id: String,
    pub segments: usize,
    pub chunks: usize,
    pub metrics: SegmentationMetrics,
}

/// Pipeline component that chunks a transcript and keeps both halves of
/// the dual index in sync.
pub struct Indexer {
    catalog: Arc<SqliteCatalog>,
    vectors: Arc<dyn VectorStore>,
    registry: Arc<ModelRegistry>,
    limits: ChunkingLimits,
}

impl Indexer {
    pub fn new(
        catalog: Arc<SqliteCatalog>,
        vectors: Arc<dyn VectorStore>,
        registry: Arc<ModelRegistry>,
        limits: ChunkingLimits,
    ) -> Self {
        Self {
            catalog,
            vectors,
            registry,
            limits,
        }
    }

    /// Chunk, embed, and index one video.
    #[instrument(skip(self))]
    pub async fn index_video(&self, video_id: &str) -> Result<IndexSummary> {
        let segments = self.catalog.segments_for(video_id)?;
        if segments.is_empty() {
            return Err(KlippError::InvalidInput(format!(
                "no segments for '{}'; transcribe it first",
                video_id
            )));
        }

        // Destructive replace: wipe both stores before writing so the key
        // sets stay identical even across crashed runs.
        self.catalog.delete_fts_for_video(video_id)?;
        self.vectors.delete_by_video(video_id).await?;

        let chunker = match self.registry.chunk_embedder() {
            Ok(embedder) => SemanticChunker::with_embedder(self.limits.clone(), embedder),
            Err(e) => {
                warn!("Chunk embedder unavailable ({}); degrading to raw segments", e);
                SemanticChunker::new(self.limits.clone())
            }
        };
        let chunks = chunker.chunk(&segments).await?;

        let dense = self.registry.dense_embedder()?;

        let mut indexed = 0usize;
        for (batch_index, batch) in chunks.chunks(BATCH_SIZE).enumerate() {
            let offset = batch_index * BATCH_SIZE;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = dense.embed_batch(&texts).await?;

            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(embeddings)
                .enumerate()
                .map(|(i, (chunk, embedding))| VectorRecord {
                    chunk_id: format!("{}-sem-{}", video_id, offset + i),
                    video_id: video_id.to_string(),
                    start_sec: chunk.start_sec,
                    end_sec: chunk.end_sec,
                    text: chunk.text.clone(),
                    embedding,
                })
                .collect();

            self.vectors.upsert_batch(&records).await?;

            let fts_rows: Vec<(String, String, String)> = records
                .iter()
                .map(|r| (r.chunk_id.clone(), r.video_id.clone(), r.text.clone()))
                .collect();
            self.catalog.insert_fts_rows(&fts_rows)?;

            indexed += records.len();
        }

        self.catalog.set_status(video_id, VideoStatus::Indexed)?;

        let metrics = compute_segmentation_metrics(&segments, &chunks, &self.limits);
        info!(
            "Indexed {}: {} chunks from {} segments (coverage {:.2})",
            video_id,
            indexed,
            segments.len(),
            metrics.coverage_ratio
        );

        Ok(IndexSummary {
            video_id: video_id.to_string(),
            segments: segments.len(),
            chunks: indexed,
            metrics,
        })
    }

    /// Metrics for a video's current chunk set, recomputed from the stores.
    pub async fn video_metrics(&self, video_id: &str) -> Result<SegmentationMetrics> {
        let segments = self.catalog.segments_for(video_id)?;
        if segments.is_empty() {
            return Err(KlippError::VideoNotFound(format!(
                "no segments for '{}'",
                video_id
            )));
        }

        let chunk_ids = self.vectors.chunk_ids_for_video(video_id).await?;
        let records = self.vectors.get(&chunk_ids).await?;
        let chunks: Vec<crate::chunking::Chunk> = records
            .into_iter()
            .map(|r| crate::chunking::Chunk {
                start_sec: r.start_sec,
                end_sec: r.end_sec,
                text: r.text,
            })
            .collect();

        Ok(compute_segmentation_metrics(&segments, &chunks, &self.limits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RawSegment, Word};
    use crate::config::Settings;
    use crate::embedding::Embedder;
    use crate::transcription::{SpeechToText, SpeechTranscript};
    use crate::vector_store::MemoryVectorStore;
    use async_trait::async_trait;

    /// Deterministic embedder: a fixed direction per text hash bucket.
    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>> {
            let h = text.len() % 3;
            Ok(match h {
                0 => vec![1.0, 0.0, 0.0],
                1 => vec![0.0, 1.0, 0.0],
                _ => vec![0.0, 0.0, 1.0],
            })
        }

        async fn embed_batch(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn model_id(&self) -> &str {
            "hash-test"
        }
    }

    struct NoopAsr;

    #[async_trait]
    impl SpeechToText for NoopAsr {
        async fn transcribe(
            &self,
            _media_path: &std::path::Path,
        ) -> crate::error::Result<SpeechTranscript> {
            Ok(SpeechTranscript {
                segments: Vec::new(),
                language: None,
                language_confidence: None,
            })
        }

        async fn transcribe_with_language(
            &self,
            media_path: &std::path::Path,
            _language: &str,
        ) -> crate::error::Result<SpeechTranscript> {
            self.transcribe(media_path).await
        }
    }

    fn words_for(text: &str, start: f64, end: f64) -> Vec<Word> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let per = (end - start) / tokens.len().max(1) as f64;
        tokens
            .iter()
            .enumerate()
            .map(|(i, w)| Word {
                word: w.to_string(),
                start: start + i as f64 * per,
                end: start + (i + 1) as f64 * per,
            })
            .collect()
    }

    fn seed_video(catalog: &SqliteCatalog, video_id: &str) {
        catalog.insert_video(video_id, "Test video", None).unwrap();
        let sentence = "The grey heron stood motionless in the shallow water watching for careless minnows below.";
        let segments: Vec<RawSegment> = (0..6)
            .map(|i| {
                let start = i as f64 * 6.0;
                let end = start + 6.0;
                RawSegment {
                    segment_id: format!("{}-{}", video_id, i),
                    video_id: video_id.to_string(),
                    start_sec: start,
                    end_sec: end,
                    text: sentence.to_string(),
                    words: Some(words_for(sentence, start, end)),
                }
            })
            .collect();
        catalog.insert_segments(video_id, &segments).unwrap();
    }

    fn build_indexer() -> (Arc<SqliteCatalog>, Arc<MemoryVectorStore>, Indexer) {
        let catalog = Arc::new(SqliteCatalog::in_memory().unwrap());
        let vectors = Arc::new(MemoryVectorStore::new());
        let settings = Settings::default();
        let registry = Arc::new(ModelRegistry::with_components(
            &settings,
            Arc::new(NoopAsr),
            Arc::new(HashEmbedder),
            Arc::new(HashEmbedder),
        ));
        let indexer = Indexer::new(
            catalog.clone(),
            vectors.clone(),
            registry,
            ChunkingLimits::default(),
        );
        (catalog, vectors, indexer)
    }

    #[tokio::test]
    async fn test_index_populates_both_stores_identically() {
        let (catalog, vectors, indexer) = build_indexer();
        seed_video(&catalog, "v1");

        let summary = indexer.index_video("v1").await.unwrap();
        assert!(summary.chunks > 0);

        let dense_ids = vectors.chunk_ids_for_video("v1").await.unwrap();
        let fts_ids = catalog.fts_chunk_ids("v1").unwrap();
        assert_eq!(dense_ids, fts_ids);
        assert!(dense_ids.iter().all(|id| id.starts_with("v1-sem-")));

        let video = catalog.get_video("v1").unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Indexed);
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let (catalog, vectors, indexer) = build_indexer();
        seed_video(&catalog, "v1");

        indexer.index_video("v1").await.unwrap();
        let first_ids = vectors.chunk_ids_for_video("v1").await.unwrap();
        let first_texts: Vec<String> = vectors
            .get(&first_ids)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();

        indexer.index_video("v1").await.unwrap();
        let second_ids = vectors.chunk_ids_for_video("v1").await.unwrap();
        let second_texts: Vec<String> = vectors
            .get(&second_ids)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();

        assert_eq!(first_ids, second_ids);
        assert_eq!(first_texts, second_texts);
        assert_eq!(catalog.fts_chunk_ids("v1").unwrap(), second_ids);
    }

    #[tokio::test]
    async fn test_delete_clears_both_stores() {
        let (catalog, vectors, indexer) = build_indexer();
        seed_video(&catalog, "v1");
        indexer.index_video("v1").await.unwrap();
        assert!(!vectors.chunk_ids_for_video("v1").await.unwrap().is_empty());

        catalog.delete_video("v1").unwrap();
        vectors.delete_by_video("v1").await.unwrap();

        assert!(catalog.get_video("v1").unwrap().is_none());
        assert!(catalog.fts_chunk_ids("v1").unwrap().is_empty());
        assert!(vectors.chunk_ids_for_video("v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_without_segments_fails() {
        let (catalog, _vectors, indexer) = build_indexer();
        catalog.insert_video("empty", "No segments", None).unwrap();

        let err = indexer.index_video("empty").await.unwrap_err();
        assert!(matches!(err, KlippError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_chunk_bounds_hold_after_indexing() {
        let (catalog, vectors, indexer) = build_indexer();
        seed_video(&catalog, "v1");

        indexer.index_video("v1").await.unwrap();

        let ids = vectors.chunk_ids_for_video("v1").await.unwrap();
        let records = vectors.get(&ids).await.unwrap();
        let limits = ChunkingLimits::default();
        let mut ordered = records.clone();
        ordered.sort_by(|a, b| a.start_sec.partial_cmp(&b.start_sec).unwrap());

        for r in &ordered {
            assert!(r.text.chars().count() <= limits.max_chars);
            assert!(r.end_sec - r.start_sec <= limits.max_seconds + 1e-6);
        }
        for pair in ordered.windows(2) {
            assert!(pair[0].end_sec <= pair[1].start_sec + 1e-9);
        }
    }
}

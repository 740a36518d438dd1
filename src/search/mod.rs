//! Hybrid search: dense and lexical retrieval fused with Reciprocal Rank
//! Fusion, then deduplicated per video by time overlap.

use crate::catalog::SqliteCatalog;
use crate::error::{KlippError, Result};
use crate::models::ModelRegistry;
use crate::vector_store::VectorStore;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, instrument};

/// RRF constant.
const RRF_K: f64 = 60.0;
/// Dense hits with documents shorter than this are stubs; drop them.
const MIN_DOC_CHARS: usize = 30;
/// Candidates overlapping a kept interval by at least this share of their
/// own duration are dropped.
const OVERLAP_THRESHOLD: f64 = 0.5;

/// Search options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Restrict to these videos when present.
    pub video_ids: Option<Vec<String>>,
    /// When false, runs the pure dense path.
    pub use_lexical: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 20,
            video_ids: None,
            use_lexical: true,
        }
    }
}

/// A fused search hit, ready to play back.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub video_id: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    pub score: f32,
    pub source: &'static str,
}

/// Dense + lexical searcher over the dual index.
pub struct HybridSearcher {
    catalog: Arc<SqliteCatalog>,
    vectors: Arc<dyn VectorStore>,
    registry: Arc<ModelRegistry>,
}

impl HybridSearcher {
    pub fn new(
        catalog: Arc<SqliteCatalog>,
        vectors: Arc<dyn VectorStore>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            catalog,
            vectors,
            registry,
        }
    }

    /// Run a hybrid search.
    #[instrument(skip(self, opts), fields(top_k = opts.top_k))]
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(KlippError::InvalidInput("query must not be empty".to_string()));
        }

        let candidates = opts.top_k.max(1) * 3;
        let video_ids = opts.video_ids.as_deref();

        let (dense, lexical) = futures::join!(
            self.dense_search(query, candidates, video_ids),
            async {
                if opts.use_lexical {
                    self.lexical_search(query, candidates, video_ids).await
                } else {
                    Ok(Vec::new())
                }
            }
        );
        let dense = dense?;
        let lexical = lexical?;

        debug!(
            "Retrieved {} dense + {} lexical candidates",
            dense.len(),
            lexical.len()
        );

        let mut fused = if lexical.is_empty() {
            dense
        } else {
            rrf_fuse(vec![dense, lexical])
        };

        fused = dedup_overlapping(fused);
        fused.truncate(opts.top_k);
        Ok(fused)
    }

    /// Dense retrieval through the query-embedding cache.
    async fn dense_search(
        &self,
        query: &str,
        limit: usize,
        video_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let embedding = self.registry.embed_query(query).await?;
        let hits = self.vectors.query(&embedding, limit, video_ids).await?;

        Ok(hits
            .into_iter()
            .filter(|h| h.text.chars().count() >= MIN_DOC_CHARS)
            .map(|h| SearchHit {
                chunk_id: h.chunk_id,
                video_id: h.video_id,
                start_sec: h.start_sec,
                end_sec: h.end_sec,
                text: h.text,
                score: round4(h.score as f64) as f32,
                source: "vector",
            })
            .collect())
    }

    /// BM25 retrieval; timestamps are joined from the vector store, and
    /// rows without a vector record are skipped rather than surfaced with
    /// zeroed timestamps.
    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        video_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let clean = strip_punctuation(query);
        if clean.is_empty() {
            return Ok(Vec::new());
        }

        // Post-filtering by video narrows the list, so fetch wider.
        let fetch_limit = if video_ids.is_some() { limit * 3 } else { limit };
        let mut rows = self.catalog.fts_search(&clean, fetch_limit)?;

        if let Some(ids) = video_ids {
            rows.retain(|r| ids.iter().any(|v| v == &r.video_id));
        }
        rows.truncate(limit);
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_ids: Vec<String> = rows.iter().map(|r| r.chunk_id.clone()).collect();
        let records = self.vectors.get(&chunk_ids).await?;
        let by_id: HashMap<&str, (f64, f64)> = records
            .iter()
            .map(|r| (r.chunk_id.as_str(), (r.start_sec, r.end_sec)))
            .collect();

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let (start_sec, end_sec) = by_id.get(row.chunk_id.as_str())?;
                let score = 1.0 / (1.0 + row.rank.abs());
                Some(SearchHit {
                    chunk_id: row.chunk_id,
                    video_id: row.video_id,
                    start_sec: *start_sec,
                    end_sec: *end_sec,
                    text: row.text,
                    score: round4(score) as f32,
                    source: "fts",
                })
            })
            .collect())
    }
}

/// Reciprocal Rank Fusion over ranked lists, dense first.
///
/// Scores are rounded to the 4-decimal precision they are reported at
/// before the stable sort, so near-ties resolve toward the dense ranking
/// instead of floating-point noise.
fn rrf_fuse(lists: Vec<Vec<SearchHit>>) -> Vec<SearchHit> {
    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut payloads: HashMap<String, SearchHit> = HashMap::new();

    for list in lists {
        for (rank, hit) in list.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + (rank + 1) as f64);
            let id = hit.chunk_id.clone();

            if !scores.contains_key(&id) {
                order.push(id.clone());
            }
            *scores.entry(id.clone()).or_insert(0.0) += contribution;

            // The dense payload carries authoritative timestamps.
            let replace = match payloads.get(&id) {
                None => true,
                Some(existing) => existing.source != "vector" && hit.source == "vector",
            };
            if replace {
                payloads.insert(id, hit);
            }
        }
    }

    let mut fused: Vec<SearchHit> = order
        .into_iter()
        .filter_map(|id| {
            let mut hit = payloads.remove(&id)?;
            hit.score = round4(*scores.get(&id).unwrap_or(&0.0)) as f32;
            hit.source = "hybrid";
            Some(hit)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

/// Per-video time-overlap dedup: walking hits best-first, drop any whose
/// interval overlaps an already-kept interval of the same video by at
/// least half the candidate's duration.
fn dedup_overlapping(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut kept_intervals: HashMap<String, Vec<(f64, f64)>> = HashMap::new();
    let mut kept = Vec::new();

    for hit in hits {
        let duration = (hit.end_sec - hit.start_sec).max(0.1);
        let intervals = kept_intervals.entry(hit.video_id.clone()).or_default();

        let overlaps = intervals.iter().any(|&(start, end)| {
            let overlap = (hit.end_sec.min(end) - hit.start_sec.max(start)).max(0.0);
            overlap / duration >= OVERLAP_THRESHOLD
        });

        if !overlaps {
            intervals.push((hit.start_sec, hit.end_sec));
            kept.push(hit);
        }
    }
    kept
}

fn strip_punctuation(query: &str) -> String {
    static PUNCT: OnceLock<Regex> = OnceLock::new();
    let re = PUNCT.get_or_init(|| Regex::new(r"[^\w\s]").expect("static punctuation pattern"));
    re.replace_all(query, " ").trim().to_string()
}

fn round4(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::embedding::Embedder;
    use crate::transcription::{SpeechToText, SpeechTranscript};
    use crate::vector_store::{MemoryVectorStore, VectorRecord};
    use async_trait::async_trait;

    fn hit(chunk_id: &str, video_id: &str, start: f64, end: f64, score: f32, source: &'static str) -> SearchHit {
        SearchHit {
            chunk_id: chunk_id.to_string(),
            video_id: video_id.to_string(),
            start_sec: start,
            end_sec: end,
            text: "a passage that easily clears the stub length filter".to_string(),
            score,
            source,
        }
    }

    #[test]
    fn test_rrf_fusion_order() {
        // Dense [A, B, C], lexical [C, B, D] with K=60 fuses to B, C, A, D.
        let dense = vec![
            hit("A", "v1", 0.0, 10.0, 0.9, "vector"),
            hit("B", "v2", 0.0, 10.0, 0.8, "vector"),
            hit("C", "v3", 0.0, 10.0, 0.7, "vector"),
        ];
        let lexical = vec![
            hit("C", "v3", 0.0, 10.0, 0.6, "fts"),
            hit("B", "v2", 0.0, 10.0, 0.5, "fts"),
            hit("D", "v4", 0.0, 10.0, 0.4, "fts"),
        ];

        let fused = rrf_fuse(vec![dense, lexical]);
        let ids: Vec<&str> = fused.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "A", "D"]);
        for h in &fused {
            assert_eq!(h.source, "hybrid");
        }
    }

    #[test]
    fn test_rrf_prefers_dense_payload() {
        let dense = vec![hit("A", "v1", 5.0, 15.0, 0.9, "vector")];
        let mut lex = hit("A", "v1", 0.0, 0.0, 0.5, "fts");
        lex.text = "lexical copy of the same passage with enough text".to_string();
        let fused = rrf_fuse(vec![dense, vec![lex]]);

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].start_sec, 5.0);
        assert_eq!(fused[0].end_sec, 15.0);
    }

    #[test]
    fn test_overlap_dedup_drops_half_overlapped() {
        // [10,20] kept; [15,25] overlaps 5s of its own 10s: exactly 50%.
        let hits = vec![
            hit("A", "v1", 10.0, 20.0, 0.9, "hybrid"),
            hit("B", "v1", 15.0, 25.0, 0.8, "hybrid"),
        ];
        let kept = dedup_overlapping(hits);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk_id, "A");
    }

    #[test]
    fn test_overlap_dedup_keeps_other_videos() {
        let hits = vec![
            hit("A", "v1", 10.0, 20.0, 0.9, "hybrid"),
            hit("B", "v2", 10.0, 20.0, 0.8, "hybrid"),
            hit("C", "v1", 21.0, 30.0, 0.7, "hybrid"),
        ];
        let kept = dedup_overlapping(hits);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_strip_punctuation() {
        assert_eq!(strip_punctuation("what's \"this\"?"), "what s  this");
        assert_eq!(strip_punctuation("!!!"), "");
    }

    // ── End-to-end over in-memory stores ────────────────────

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>> {
            Ok(if text.contains("heron") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
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
            2
        }

        fn model_id(&self) -> &str {
            "axis-test"
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

    async fn build_searcher() -> (Arc<SqliteCatalog>, Arc<MemoryVectorStore>, HybridSearcher) {
        let catalog = Arc::new(SqliteCatalog::in_memory().unwrap());
        let vectors = Arc::new(MemoryVectorStore::new());
        let settings = Settings::default();
        let registry = Arc::new(ModelRegistry::with_components(
            &settings,
            Arc::new(NoopAsr),
            Arc::new(AxisEmbedder),
            Arc::new(AxisEmbedder),
        ));
        let searcher = HybridSearcher::new(catalog.clone(), vectors.clone(), registry);

        // Two indexed chunks about herons, one stub, one lexical-only row.
        let records = vec![
            VectorRecord {
                chunk_id: "v1-sem-0".to_string(),
                video_id: "v1".to_string(),
                start_sec: 0.0,
                end_sec: 10.0,
                text: "The grey heron stood motionless in the shallow water.".to_string(),
                embedding: vec![1.0, 0.0],
            },
            VectorRecord {
                chunk_id: "v2-sem-0".to_string(),
                video_id: "v2".to_string(),
                start_sec: 5.0,
                end_sec: 15.0,
                text: "A heron is a wading bird found near rivers and lakes.".to_string(),
                embedding: vec![0.9, 0.1],
            },
            VectorRecord {
                chunk_id: "v2-sem-1".to_string(),
                video_id: "v2".to_string(),
                start_sec: 20.0,
                end_sec: 25.0,
                text: "short stub".to_string(),
                embedding: vec![1.0, 0.0],
            },
        ];
        vectors.upsert_batch(&records).await.unwrap();

        catalog.insert_video("v1", "Herons", None).unwrap();
        catalog.insert_video("v2", "Birds", None).unwrap();
        catalog
            .insert_fts_rows(&[
                (
                    "v1-sem-0".to_string(),
                    "v1".to_string(),
                    "The grey heron stood motionless in the shallow water.".to_string(),
                ),
                (
                    "v2-sem-0".to_string(),
                    "v2".to_string(),
                    "A heron is a wading bird found near rivers and lakes.".to_string(),
                ),
                // No vector record for this one: it must be skipped.
                (
                    "orphan-sem-0".to_string(),
                    "v3".to_string(),
                    "A heron mentioned only in the lexical index rows.".to_string(),
                ),
            ])
            .unwrap();

        (catalog, vectors, searcher)
    }

    #[tokio::test]
    async fn test_hybrid_search_end_to_end() {
        let (_catalog, _vectors, searcher) = build_searcher().await;

        let hits = searcher
            .search("heron", &SearchOptions::default())
            .await
            .unwrap();

        assert!(!hits.is_empty());
        assert!(hits.len() <= 20);
        // Scores non-increasing
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // The stub and the orphaned lexical row never surface
        assert!(hits.iter().all(|h| h.chunk_id != "v2-sem-1"));
        assert!(hits.iter().all(|h| h.chunk_id != "orphan-sem-0"));
        // No zeroed timestamps
        assert!(hits.iter().all(|h| h.end_sec > h.start_sec));
    }

    #[tokio::test]
    async fn test_video_filter() {
        let (_catalog, _vectors, searcher) = build_searcher().await;

        let opts = SearchOptions {
            video_ids: Some(vec!["v1".to_string()]),
            ..Default::default()
        };
        let hits = searcher.search("heron", &opts).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.video_id == "v1"));
    }

    #[tokio::test]
    async fn test_pure_dense_path() {
        let (_catalog, _vectors, searcher) = build_searcher().await;

        let opts = SearchOptions {
            use_lexical: false,
            ..Default::default()
        };
        let hits = searcher.search("heron", &opts).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.source == "vector"));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (_catalog, _vectors, searcher) = build_searcher().await;
        let err = searcher
            .search("   ", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KlippError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_top_k_truncation() {
        let (_catalog, _vectors, searcher) = build_searcher().await;
        let opts = SearchOptions {
            top_k: 1,
            ..Default::default()
        };
        let hits = searcher.search("heron", &opts).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}

//! Segmentation quality metrics, computed after each index run and served
//! per video for inspection.

use crate::catalog::RawSegment;
use crate::chunking::{Chunk, ChunkingLimits};
use serde::Serialize;

/// Summary statistics of a chunking run.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentationMetrics {
    pub segment_count: usize,
    pub chunk_count: usize,
    pub mean_chunk_chars: f64,
    pub max_chunk_chars: usize,
    pub mean_chunk_seconds: f64,
    pub max_chunk_seconds: f64,
    /// Chunks exceeding the character maximum. Should always be zero.
    pub over_char_limit: usize,
    /// Chunks exceeding the duration maximum. Should always be zero.
    pub over_duration_limit: usize,
    /// Chunks under the character minimum (at most the trailing runt).
    pub under_char_minimum: usize,
    /// Total chunk time over total segment time.
    pub coverage_ratio: f64,
}

pub fn compute_segmentation_metrics(
    segments: &[RawSegment],
    chunks: &[Chunk],
    limits: &ChunkingLimits,
) -> SegmentationMetrics {
    let chunk_count = chunks.len();
    let char_lens: Vec<usize> = chunks.iter().map(|c| c.char_len()).collect();
    let durations: Vec<f64> = chunks.iter().map(|c| c.duration()).collect();

    let total_chars: usize = char_lens.iter().sum();
    let total_seconds: f64 = durations.iter().sum();

    let span = match (segments.first(), segments.last()) {
        (Some(first), Some(last)) => (last.end_sec - first.start_sec).max(0.0),
        _ => 0.0,
    };

    SegmentationMetrics {
        segment_count: segments.len(),
        chunk_count,
        mean_chunk_chars: if chunk_count > 0 {
            total_chars as f64 / chunk_count as f64
        } else {
            0.0
        },
        max_chunk_chars: char_lens.iter().copied().max().unwrap_or(0),
        mean_chunk_seconds: if chunk_count > 0 {
            total_seconds / chunk_count as f64
        } else {
            0.0
        },
        max_chunk_seconds: durations.iter().copied().fold(0.0, f64::max),
        over_char_limit: char_lens.iter().filter(|&&l| l > limits.max_chars).count(),
        over_duration_limit: durations
            .iter()
            .filter(|&&d| d > limits.max_seconds + 1e-6)
            .count(),
        under_char_minimum: char_lens.iter().filter(|&&l| l < limits.min_chars).count(),
        coverage_ratio: if span > 0.0 { total_seconds / span } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_on_clean_chunks() {
        let segments = vec![RawSegment {
            segment_id: "v-0".to_string(),
            video_id: "v".to_string(),
            start_sec: 0.0,
            end_sec: 30.0,
            text: "irrelevant".to_string(),
            words: None,
        }];
        let chunks = vec![
            Chunk {
                start_sec: 0.0,
                end_sec: 15.0,
                text: "a".repeat(120),
            },
            Chunk {
                start_sec: 15.0,
                end_sec: 30.0,
                text: "b".repeat(180),
            },
        ];

        let m = compute_segmentation_metrics(&segments, &chunks, &ChunkingLimits::default());
        assert_eq!(m.chunk_count, 2);
        assert_eq!(m.over_char_limit, 0);
        assert_eq!(m.over_duration_limit, 0);
        assert_eq!(m.under_char_minimum, 0);
        assert!((m.coverage_ratio - 1.0).abs() < 1e-9);
        assert_eq!(m.max_chunk_chars, 180);
    }

    #[test]
    fn test_metrics_flag_violations() {
        let chunks = vec![Chunk {
            start_sec: 0.0,
            end_sec: 25.0,
            text: "c".repeat(400),
        }];
        let m = compute_segmentation_metrics(&[], &chunks, &ChunkingLimits::default());
        assert_eq!(m.over_char_limit, 1);
        assert_eq!(m.over_duration_limit, 1);
    }
}

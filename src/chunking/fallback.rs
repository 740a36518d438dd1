//! Raw-segment chunking: the degenerate path used when the transcript has
//! no word timestamps or the chunk embedder is unavailable. The same
//! bounds hold; timestamps come from raw segment boundaries.

use super::sentence::ensure_terminated;
use super::{merge_short_chunks, Chunk, ChunkingLimits};
use crate::catalog::RawSegment;
use tracing::debug;

/// Greedily pack consecutive segments into bounded chunks. Callers run the
/// force-split pre-pass first, so every incoming segment is itself within
/// the limits.
pub(crate) fn chunk_segments(segs: &[RawSegment], limits: &ChunkingLimits) -> Vec<Chunk> {
    if segs.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut texts: Vec<String> = Vec::new();
    let mut chars = 0usize;
    let mut start = segs[0].start_sec;
    let mut end = segs[0].end_sec;

    for seg in segs {
        let text = ensure_terminated(seg.text.trim());
        let len = text.chars().count();
        if len == 0 {
            continue;
        }

        let candidate_chars = if texts.is_empty() { len } else { chars + 1 + len };
        let exceeds = !texts.is_empty()
            && (candidate_chars > limits.max_chars || seg.end_sec - start > limits.max_seconds);

        if exceeds {
            chunks.push(Chunk {
                start_sec: start,
                end_sec: end,
                text: texts.join(" "),
            });
            texts.clear();
            start = seg.start_sec;
        }

        chars = if texts.is_empty() { len } else { chars + 1 + len };
        texts.push(text);
        end = seg.end_sec;
    }

    if !texts.is_empty() {
        chunks.push(Chunk {
            start_sec: start,
            end_sec: end,
            text: texts.join(" "),
        });
    }

    let chunks = merge_short_chunks(chunks, limits);
    debug!("Fallback chunking produced {} chunks from {} segments", chunks.len(), segs.len());
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(ordinal: usize, start: f64, end: f64, text: &str) -> RawSegment {
        RawSegment {
            segment_id: format!("v-{}", ordinal),
            video_id: "v".to_string(),
            start_sec: start,
            end_sec: end,
            text: text.to_string(),
            words: None,
        }
    }

    #[test]
    fn test_packs_to_duration_bound() {
        // Twenty 5-second segments; the duration bound flushes every 20s.
        let segs: Vec<RawSegment> = (0..20)
            .map(|i| {
                segment(
                    i,
                    i as f64 * 5.0,
                    (i + 1) as f64 * 5.0,
                    "A sentence of roughly fifty characters padding ok.",
                )
            })
            .collect();

        let limits = ChunkingLimits::default();
        let chunks = chunk_segments(&segs, &limits);

        assert_eq!(chunks.len(), 5);
        for chunk in &chunks {
            assert!(chunk.duration() <= limits.max_seconds + 1e-6);
            assert!(chunk.char_len() <= limits.max_chars);
            assert!(chunk.char_len() >= limits.min_chars);
        }
        // Contiguous coverage
        assert_eq!(chunks[0].start_sec, 0.0);
        assert_eq!(chunks.last().unwrap().end_sec, 100.0);
        for pair in chunks.windows(2) {
            assert!(pair[0].end_sec <= pair[1].start_sec + 1e-9);
        }
    }

    #[test]
    fn test_packs_to_char_bound() {
        // Short durations, long texts: the character bound drives flushes.
        let segs: Vec<RawSegment> = (0..6)
            .map(|i| {
                segment(
                    i,
                    i as f64,
                    i as f64 + 1.0,
                    &"y".repeat(199),
                )
            })
            .collect();

        let limits = ChunkingLimits::default();
        let chunks = chunk_segments(&segs, &limits);

        for chunk in &chunks {
            assert!(chunk.char_len() <= limits.max_chars);
        }
        assert!(chunks.len() >= 3);
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_segments(&[], &ChunkingLimits::default()).is_empty());
    }
}

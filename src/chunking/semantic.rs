//! Similarity-driven chunk grouping with word-accurate boundary
//! projection.
//!
//! The transcript's words are laid out as one text with a byte-offset →
//! word map. Sentences are located inside that map, embedded, and grouped
//! by adjacent cosine similarity under the length and duration bounds.
//! Chunk timestamps are then read back from the first and last covering
//! word, which stays accurate across merges. The bound checks are ordered:
//! an over-limit group is always emitted before a short group may grow,
//! otherwise a single oversized sentence produces unbounded chunks.

use super::sentence::{ensure_terminated, merge_short_spans, sentence_spans};
use super::{fallback, merge_short_chunks, split, Chunk, ChunkingLimits};
use crate::catalog::{RawSegment, Word};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::vector_store::cosine_similarity;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Semantic chunker over raw ASR segments.
pub struct SemanticChunker {
    limits: ChunkingLimits,
    embedder: Option<Arc<dyn Embedder>>,
}

/// A word projected into the concatenated transcript text.
struct WordSpan {
    sc: usize,
    ec: usize,
    start: f64,
    end: f64,
}

/// A sentence with its byte range and word-grid timestamps.
#[derive(Clone)]
struct TimedSentence {
    sc: usize,
    ec: usize,
    text: String,
    start: f64,
    end: f64,
}

impl TimedSentence {
    fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

impl SemanticChunker {
    /// Chunker without an embedder: every transcript takes the
    /// raw-segment fallback path.
    pub fn new(limits: ChunkingLimits) -> Self {
        Self {
            limits,
            embedder: None,
        }
    }

    pub fn with_embedder(limits: ChunkingLimits, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            limits,
            embedder: Some(embedder),
        }
    }

    /// Chunk a transcript. Deterministic for fixed inputs and embedder.
    pub async fn chunk(&self, segments: &[RawSegment]) -> Result<Vec<Chunk>> {
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        // Oversized raw segments poison grouping; split them up front.
        let mut segs: Vec<RawSegment> = segments
            .iter()
            .flat_map(|s| split::force_split_oversized(s, &self.limits))
            .collect();
        segs.sort_by(|a, b| {
            a.start_sec
                .partial_cmp(&b.start_sec)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let words: Vec<Word> = segs
            .iter()
            .filter_map(|s| s.words.as_ref())
            .flatten()
            .cloned()
            .collect();
        if words.is_empty() {
            debug!("No word timestamps; using raw-segment chunking");
            return Ok(fallback::chunk_segments(&segs, &self.limits));
        }

        let (full_text, spans) = project_words(&words);

        let sent_spans = sentence_spans(&full_text, 10);
        if sent_spans.is_empty() {
            return Ok(fallback::chunk_segments(&segs, &self.limits));
        }
        let sent_spans = merge_short_spans(&full_text, sent_spans, 40);

        let sentences: Vec<TimedSentence> = sent_spans
            .into_iter()
            .map(|(sc, ec)| timed_sentence(&full_text, &spans, sc, ec))
            .collect();
        if sentences.is_empty() {
            return Ok(fallback::chunk_segments(&segs, &self.limits));
        }

        // Too little material to group: one chunk over the full span.
        if sentences.len() <= 2 {
            let mut chunks = Vec::new();
            self.emit_bounded(&mut chunks, &sentences, &spans, &full_text);
            return Ok(chunks);
        }

        let embedder = match &self.embedder {
            Some(e) => e.clone(),
            None => {
                debug!("No chunk embedder configured; using raw-segment chunking");
                return Ok(fallback::chunk_segments(&segs, &self.limits));
            }
        };

        let texts: Vec<String> = sentences.iter().map(|s| s.text.clone()).collect();
        let embeddings = match embedder.embed_batch(&texts).await {
            Ok(e) if e.len() == sentences.len() => e,
            Ok(_) => {
                warn!("Embedder returned a mismatched batch; falling back");
                return Ok(fallback::chunk_segments(&segs, &self.limits));
            }
            Err(e) => {
                warn!("Chunk embedder unavailable ({}); falling back", e);
                return Ok(fallback::chunk_segments(&segs, &self.limits));
            }
        };

        let sims: Vec<f32> = embeddings
            .windows(2)
            .map(|pair| cosine_similarity(&pair[0], &pair[1]))
            .collect();

        let chunks = self.group_sentences(&sentences, &sims, &spans, &full_text);
        let chunks = merge_short_chunks(chunks, &self.limits);

        info!(
            "Chunked {} segments into {} chunks ({} sentences)",
            segments.len(),
            chunks.len(),
            sentences.len()
        );
        Ok(chunks)
    }

    fn group_sentences(
        &self,
        sentences: &[TimedSentence],
        sims: &[f32],
        spans: &[WordSpan],
        full_text: &str,
    ) -> Vec<Chunk> {
        let limits = &self.limits;
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut group: Vec<TimedSentence> = vec![sentences[0].clone()];

        for (i, &sim) in sims.iter().enumerate() {
            let next = sentences[i + 1].clone();
            let glen = group_char_len(&group);
            let gdur = group_duration(&group);

            // Contract: the maximum is checked before the minimum. The
            // other order lets an oversized sentence grow without bound.
            let too_long = glen >= limits.max_chars || gdur >= limits.max_seconds;
            let too_short = glen < limits.min_chars || gdur < limits.min_seconds;

            if too_long {
                self.emit_bounded(&mut chunks, &group, spans, full_text);
                group = vec![next];
            } else if too_short {
                group.push(next);
            } else if sim < limits.similarity_threshold {
                self.emit_bounded(&mut chunks, &group, spans, full_text);
                group = vec![next];
            } else {
                group.push(next);
            }
        }

        // Flush the trailing group under the same invariants.
        if !group.is_empty() {
            let glen = group_char_len(&group);
            let gdur = group_duration(&group);

            if glen > limits.max_chars || gdur > limits.max_seconds {
                self.emit_bounded(&mut chunks, &group, spans, full_text);
            } else if glen >= limits.min_chars && gdur >= limits.min_seconds {
                chunks.push(chunk_from_group(&group));
            } else {
                // Merge a short tail into its predecessor only when the
                // result stays bounded; otherwise it is the one permitted
                // runt.
                let tail = chunk_from_group(&group);
                match chunks.last_mut() {
                    Some(prev)
                        if prev.char_len() + 1 + tail.char_len() <= limits.max_chars
                            && tail.end_sec - prev.start_sec <= limits.max_seconds =>
                    {
                        prev.text = format!("{} {}", prev.text, tail.text);
                        prev.end_sec = tail.end_sec;
                    }
                    _ => chunks.push(tail),
                }
            }
        }

        chunks
    }

    /// Emit a group as one chunk when it fits, otherwise split it along
    /// sentence boundaries, and a lone oversized sentence along word
    /// boundaries. No emitted chunk ever exceeds the maxima.
    fn emit_bounded(
        &self,
        chunks: &mut Vec<Chunk>,
        group: &[TimedSentence],
        spans: &[WordSpan],
        full_text: &str,
    ) {
        if group.is_empty() {
            return;
        }
        let limits = &self.limits;

        if group_char_len(group) <= limits.max_chars && group_duration(group) <= limits.max_seconds
        {
            chunks.push(chunk_from_group(group));
            return;
        }

        let mut sub: Vec<TimedSentence> = Vec::new();
        for sentence in group {
            let s_len = sentence.char_len();
            let s_dur = sentence.end - sentence.start;

            if s_len > limits.max_chars || s_dur > limits.max_seconds {
                if !sub.is_empty() {
                    chunks.push(chunk_from_group(&sub));
                    sub.clear();
                }
                chunks.extend(self.hard_split_sentence(sentence, spans, full_text));
                continue;
            }

            let cand_len = if sub.is_empty() {
                s_len
            } else {
                group_char_len(&sub) + 1 + s_len
            };
            let cand_dur = sub
                .first()
                .map(|f| sentence.end - f.start)
                .unwrap_or(s_dur);

            if !sub.is_empty() && (cand_len > limits.max_chars || cand_dur > limits.max_seconds) {
                chunks.push(chunk_from_group(&sub));
                sub.clear();
            }
            sub.push(sentence.clone());
        }
        if !sub.is_empty() {
            chunks.push(chunk_from_group(&sub));
        }
    }

    /// Break a single over-limit sentence at word boundaries, keeping the
    /// pieces on the word grid.
    fn hard_split_sentence(
        &self,
        sentence: &TimedSentence,
        spans: &[WordSpan],
        full_text: &str,
    ) -> Vec<Chunk> {
        let limits = &self.limits;
        let covered: Vec<&WordSpan> = spans
            .iter()
            .filter(|w| w.sc < sentence.ec && w.ec > sentence.sc)
            .collect();

        if covered.is_empty() {
            return split::hard_split_text(&sentence.text, sentence.start, sentence.end, limits)
                .into_iter()
                .map(|(text, start, end)| Chunk {
                    start_sec: start,
                    end_sec: end,
                    text,
                })
                .collect();
        }

        let mut out = Vec::new();
        let mut first: Option<&WordSpan> = None;
        let mut last: Option<&WordSpan> = None;

        for w in covered {
            if let (Some(f), Some(_)) = (first, last) {
                let cand_chars = full_text[f.sc..w.ec].chars().count();
                let cand_dur = w.end - f.start;
                // Headroom for the appended terminator.
                if cand_chars + 1 > limits.max_chars || cand_dur > limits.max_seconds {
                    out.push(chunk_from_word_range(full_text, f, last.unwrap_or(f)));
                    first = None;
                    last = None;
                }
            }
            if first.is_none() {
                first = Some(w);
            }
            last = Some(w);
        }
        if let (Some(f), Some(l)) = (first, last) {
            out.push(chunk_from_word_range(full_text, f, l));
        }
        out
    }
}

fn project_words(words: &[Word]) -> (String, Vec<WordSpan>) {
    let full_text = words
        .iter()
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let mut spans = Vec::with_capacity(words.len());
    let mut cursor = 0usize;
    for w in words {
        let sc = cursor;
        let ec = cursor + w.word.len();
        spans.push(WordSpan {
            sc,
            ec,
            start: w.start,
            end: w.end,
        });
        cursor = ec + 1;
    }
    (full_text, spans)
}

fn timed_sentence(full_text: &str, spans: &[WordSpan], sc: usize, ec: usize) -> TimedSentence {
    let start = spans
        .iter()
        .find(|w| w.sc <= sc && sc < w.ec)
        .map(|w| w.start)
        .unwrap_or(0.0);

    let last_byte = ec.saturating_sub(1);
    let end = spans
        .iter()
        .find(|w| w.sc <= last_byte && last_byte < w.ec)
        .map(|w| w.end)
        .or_else(|| spans.iter().rev().find(|w| w.ec <= ec).map(|w| w.end))
        .unwrap_or(start);

    TimedSentence {
        sc,
        ec,
        text: ensure_terminated(full_text[sc..ec].trim()),
        start,
        end,
    }
}

fn group_char_len(group: &[TimedSentence]) -> usize {
    let sum: usize = group.iter().map(|s| s.char_len()).sum();
    sum + group.len().saturating_sub(1)
}

fn group_duration(group: &[TimedSentence]) -> f64 {
    match (group.first(), group.last()) {
        (Some(first), Some(last)) => last.end - first.start,
        _ => 0.0,
    }
}

fn chunk_from_group(group: &[TimedSentence]) -> Chunk {
    let text = group
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    Chunk {
        start_sec: group.first().map(|s| s.start).unwrap_or(0.0),
        end_sec: group.last().map(|s| s.end).unwrap_or(0.0),
        text,
    }
}

fn chunk_from_word_range(full_text: &str, first: &WordSpan, last: &WordSpan) -> Chunk {
    Chunk {
        start_sec: first.start,
        end_sec: last.end,
        text: ensure_terminated(full_text[first.sc..last.ec].trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Deterministic embedder: the vector depends only on a topic marker
    /// in the text, so similarity between sentences is fully scripted.
    struct TopicEmbedder;

    #[async_trait]
    impl Embedder for TopicEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.contains("pelican") {
                vec![0.0, 1.0]
            } else {
                vec![1.0, 0.0]
            })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
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
            "topic-test"
        }
    }

    fn words_for(text: &str, start: f64, per_word: f64) -> Vec<Word> {
        text.split_whitespace()
            .enumerate()
            .map(|(i, w)| Word {
                word: w.to_string(),
                start: start + i as f64 * per_word,
                end: start + (i + 1) as f64 * per_word,
            })
            .collect()
    }

    fn segment_with_words(ordinal: usize, text: &str, start: f64, end: f64) -> RawSegment {
        let n = text.split_whitespace().count().max(1);
        RawSegment {
            segment_id: format!("v-{}", ordinal),
            video_id: "v".to_string(),
            start_sec: start,
            end_sec: end,
            text: text.to_string(),
            words: Some(words_for(text, start, (end - start) / n as f64)),
        }
    }

    fn word_grid(segments: &[RawSegment]) -> Vec<f64> {
        let mut grid = Vec::new();
        for seg in segments {
            if let Some(words) = &seg.words {
                for w in words {
                    grid.push(w.start);
                    grid.push(w.end);
                }
            }
        }
        grid
    }

    fn assert_on_grid(value: f64, grid: &[f64]) {
        assert!(
            grid.iter().any(|g| (g - value).abs() <= 0.010),
            "timestamp {} not on the word grid",
            value
        );
    }

    #[tokio::test]
    async fn test_two_sentence_transcript_single_chunk() {
        // The word-accuracy scenario: boundaries must land on the grid.
        let segments = vec![
            RawSegment {
                segment_id: "v-0".to_string(),
                video_id: "v".to_string(),
                start_sec: 0.0,
                end_sec: 1.0,
                text: "Hello world.".to_string(),
                words: Some(vec![
                    Word { word: "Hello".into(), start: 0.0, end: 0.5 },
                    Word { word: "world.".into(), start: 0.5, end: 1.0 },
                ]),
            },
            RawSegment {
                segment_id: "v-1".to_string(),
                video_id: "v".to_string(),
                start_sec: 1.0,
                end_sec: 2.0,
                text: "This is a test.".to_string(),
                words: Some(vec![
                    Word { word: "This".into(), start: 1.0, end: 1.2 },
                    Word { word: "is".into(), start: 1.2, end: 1.4 },
                    Word { word: "a".into(), start: 1.4, end: 1.6 },
                    Word { word: "test.".into(), start: 1.6, end: 2.0 },
                ]),
            },
        ];

        let chunker =
            SemanticChunker::with_embedder(ChunkingLimits::default(), Arc::new(TopicEmbedder));
        let chunks = chunker.chunk(&segments).await.unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_sec, 0.0);
        assert_eq!(chunks[0].end_sec, 2.0);
        assert!(chunks[0].text.ends_with('.'));

        let grid = word_grid(&segments);
        assert_on_grid(chunks[0].start_sec, &grid);
        assert_on_grid(chunks[0].end_sec, &grid);
    }

    #[tokio::test]
    async fn test_topic_change_splits_groups() {
        // Three heron sentences then three pelican sentences, each ~90
        // chars over ~6s, so groups pass the minimum before the topic
        // flips and the similarity threshold can split them.
        let heron = "The grey heron stood motionless in the shallow water watching for careless minnows below.";
        let pelican = "A brown pelican wheeled overhead and crashed into the surf chasing a silver shoal of pelican prey.";

        let mut segments = Vec::new();
        let mut t = 0.0;
        for i in 0..3 {
            segments.push(segment_with_words(i, heron, t, t + 6.0));
            t += 6.0;
        }
        for i in 3..6 {
            segments.push(segment_with_words(i, pelican, t, t + 6.0));
            t += 6.0;
        }

        let limits = ChunkingLimits::default();
        let chunker = SemanticChunker::with_embedder(limits.clone(), Arc::new(TopicEmbedder));
        let chunks = chunker.chunk(&segments).await.unwrap();

        assert!(chunks.len() >= 2, "expected a split, got {:?}", chunks.len());
        for chunk in &chunks {
            assert!(chunk.char_len() <= limits.max_chars);
            assert!(chunk.duration() <= limits.max_seconds + 1e-6);
            assert!(chunk.text.ends_with('.') || chunk.text.ends_with('!') || chunk.text.ends_with('?'));
        }
        // No heron chunk contains pelican text
        assert!(chunks[0].text.contains("heron"));
        assert!(!chunks[0].text.contains("pelican"));

        // Chunks are ordered and non-overlapping
        for pair in chunks.windows(2) {
            assert!(pair[0].end_sec <= pair[1].start_sec + 1e-9);
        }

        // Every boundary sits on the word grid
        let grid = word_grid(&segments);
        for chunk in &chunks {
            assert_on_grid(chunk.start_sec, &grid);
            assert_on_grid(chunk.end_sec, &grid);
        }
    }

    #[tokio::test]
    async fn test_pathological_segment_is_bounded() {
        // One 4000-char, 400-second segment without word timestamps.
        let sentence = "Here is a sentence padded out to reach fifty chars.";
        let text = (0..80).map(|_| sentence).collect::<Vec<_>>().join(" ");
        let seg = RawSegment {
            segment_id: "v-0".to_string(),
            video_id: "v".to_string(),
            start_sec: 0.0,
            end_sec: 400.0,
            text,
            words: None,
        };

        let limits = ChunkingLimits::default();
        let chunker = SemanticChunker::with_embedder(limits.clone(), Arc::new(TopicEmbedder));
        let chunks = chunker.chunk(&[seg]).await.unwrap();

        assert!(chunks.len() > 10, "got {} chunks", chunks.len());
        for chunk in &chunks {
            assert!(chunk.char_len() <= limits.max_chars, "{} chars", chunk.char_len());
            assert!(chunk.duration() <= limits.max_seconds + 1e-6);
        }
        assert!((chunks[0].start_sec - 0.0).abs() < 1e-9);
        assert!((chunks.last().unwrap().end_sec - 400.0).abs() < 1e-9);
        for pair in chunks.windows(2) {
            assert!((pair[0].end_sec - pair[1].start_sec).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_deterministic_output() {
        let heron = "The grey heron stood motionless in the shallow water watching for careless minnows below.";
        let segments: Vec<RawSegment> = (0..4)
            .map(|i| segment_with_words(i, heron, i as f64 * 6.0, (i + 1) as f64 * 6.0))
            .collect();

        let chunker =
            SemanticChunker::with_embedder(ChunkingLimits::default(), Arc::new(TopicEmbedder));
        let first = chunker.chunk(&segments).await.unwrap();
        let second = chunker.chunk(&segments).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_no_embedder_falls_back() {
        let heron = "The grey heron stood motionless in the shallow water watching for careless minnows below.";
        let segments: Vec<RawSegment> = (0..4)
            .map(|i| segment_with_words(i, heron, i as f64 * 6.0, (i + 1) as f64 * 6.0))
            .collect();

        let limits = ChunkingLimits::default();
        let chunker = SemanticChunker::new(limits.clone());
        let chunks = chunker.chunk(&segments).await.unwrap();

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.char_len() <= limits.max_chars);
            assert!(chunk.duration() <= limits.max_seconds + 1e-6);
        }
    }

    #[tokio::test]
    async fn test_empty_input() {
        let chunker = SemanticChunker::new(ChunkingLimits::default());
        assert!(chunker.chunk(&[]).await.unwrap().is_empty());
    }
}

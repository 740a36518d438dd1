//! Semantic chunking: turns raw ASR segments into length- and duration-
//! bounded, sentence-complete chunks with word-accurate timestamps.

mod fallback;
mod semantic;
mod sentence;
mod split;

pub use semantic::SemanticChunker;

use crate::config::ChunkingSettings;

/// A chunk of transcript: the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Start time in seconds, snapped to the word grid when one exists.
    pub start_sec: f64,
    /// End time in seconds.
    pub end_sec: f64,
    /// Sentence-complete text, always ending in a terminator.
    pub text: String,
}

impl Chunk {
    pub fn duration(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Bounds every emitted chunk must respect.
#[derive(Debug, Clone)]
pub struct ChunkingLimits {
    pub min_chars: usize,
    pub max_chars: usize,
    pub min_seconds: f64,
    pub max_seconds: f64,
    /// Cosine similarity below which adjacent sentences split.
    pub similarity_threshold: f32,
}

impl Default for ChunkingLimits {
    fn default() -> Self {
        Self {
            min_chars: 80,
            max_chars: 350,
            min_seconds: 5.0,
            max_seconds: 20.0,
            similarity_threshold: 0.55,
        }
    }
}

impl From<&ChunkingSettings> for ChunkingLimits {
    fn from(settings: &ChunkingSettings) -> Self {
        Self {
            min_chars: settings.min_chars,
            max_chars: settings.max_chars,
            min_seconds: settings.min_seconds,
            max_seconds: settings.max_seconds,
            similarity_threshold: settings.similarity_threshold,
        }
    }
}

/// Post-pass: merge chunks under the character minimum into their
/// predecessor, but never past the maximum bounds.
pub(crate) fn merge_short_chunks(chunks: Vec<Chunk>, limits: &ChunkingLimits) -> Vec<Chunk> {
    if chunks.len() <= 1 {
        return chunks;
    }

    let mut merged: Vec<Chunk> = Vec::new();
    for chunk in chunks {
        if let Some(prev) = merged.last_mut() {
            let prev_len = prev.char_len();
            if prev_len < limits.min_chars {
                let combined_len = prev_len + 1 + chunk.char_len();
                let combined_dur = chunk.end_sec - prev.start_sec;
                if combined_len <= limits.max_chars && combined_dur <= limits.max_seconds {
                    prev.text = format!("{} {}", prev.text, chunk.text);
                    prev.end_sec = chunk.end_sec;
                    continue;
                }
            }
        }
        merged.push(chunk);
    }

    // A short trailing chunk merges backward when the bounds allow.
    if merged.len() > 1 && merged[merged.len() - 1].char_len() < limits.min_chars {
        if let Some(last) = merged.pop() {
            if let Some(prev) = merged.last_mut() {
                let combined_len = prev.char_len() + 1 + last.char_len();
                let combined_dur = last.end_sec - prev.start_sec;
                if combined_len <= limits.max_chars && combined_dur <= limits.max_seconds {
                    prev.text = format!("{} {}", prev.text, last.text);
                    prev.end_sec = last.end_sec;
                } else {
                    merged.push(last);
                }
            }
        }
    }

    merged
}

//! Force-splitting of oversized raw segments.
//!
//! A single malformed ASR segment can be minutes long; left alone it would
//! poison the whole chunk pipeline. Before chunking begins, any segment
//! over the character or duration maximum is broken into sentences, with
//! timestamps taken from its word grid when present and distributed in
//! proportion to character length otherwise.

use super::sentence::{ensure_terminated, sentence_spans};
use super::ChunkingLimits;
use crate::catalog::{RawSegment, Word};
use tracing::{debug, warn};

/// Split a segment that exceeds the limits into sentence-sized segments.
/// Segments within bounds are returned unchanged.
pub(crate) fn force_split_oversized(seg: &RawSegment, limits: &ChunkingLimits) -> Vec<RawSegment> {
    let char_len = seg.text.chars().count();
    let duration = seg.duration();
    if char_len <= limits.max_chars && duration <= limits.max_seconds {
        return vec![seg.clone()];
    }

    warn!(
        "Segment {} exceeds limits ({} chars, {:.1}s); splitting",
        seg.segment_id, char_len, duration
    );

    let spans = sentence_spans(&seg.text, 10);
    let pieces = if spans.len() <= 1 {
        // No sentence boundary to use; fall through to the word-level split.
        vec![seg.clone()]
    } else {
        split_at_sentences(seg, &spans)
    };

    // A single sentence can still exceed the limits on its own.
    let mut out = Vec::new();
    for piece in pieces {
        let plen = piece.text.chars().count();
        if plen > limits.max_chars || piece.duration() > limits.max_seconds {
            out.extend(hard_split_segment(&piece, limits));
        } else {
            out.push(piece);
        }
    }

    debug!("Segment {} split into {} pieces", seg.segment_id, out.len());
    out
}

/// One segment per sentence, timed from the word grid when the sentence's
/// word sequence can be located in it, proportionally otherwise.
fn split_at_sentences(seg: &RawSegment, spans: &[(usize, usize)]) -> Vec<RawSegment> {
    let words = seg.words.as_deref().unwrap_or(&[]);
    let joined = words
        .iter()
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let duration = seg.duration();
    let total_chars: usize = spans
        .iter()
        .map(|&(s, e)| seg.text[s..e].chars().count())
        .sum();

    let mut result = Vec::new();
    let mut current_start = seg.start_sec;
    let mut search_from = 0usize;

    for (i, &(s, e)) in spans.iter().enumerate() {
        let sent = seg.text[s..e].trim();
        let mut timed: Option<(f64, f64, Vec<Word>)> = None;

        if !words.is_empty() {
            if let Some(found) = joined[search_from..].find(sent) {
                let abs = search_from + found;
                let words_before = joined[..abs].split_whitespace().count();
                let n = sent.split_whitespace().count();
                let hi = (words_before + n).min(words.len());
                let slice = &words[words_before..hi];
                if let (Some(first), Some(last)) = (slice.first(), slice.last()) {
                    timed = Some((first.start, last.end, slice.to_vec()));
                }
                search_from = abs + sent.len();
            }
        }

        let (start, mut end, sent_words) = match timed {
            Some((s, e, w)) => (s, e, Some(w)),
            None => {
                let share = if total_chars > 0 {
                    sent.chars().count() as f64 / total_chars as f64 * duration
                } else {
                    duration / spans.len() as f64
                };
                let end = (current_start + share).min(seg.end_sec);
                (current_start, end, None)
            }
        };
        // The trailing proportional piece closes out the segment exactly.
        if i == spans.len() - 1 && sent_words.is_none() {
            end = seg.end_sec;
        }

        result.push(RawSegment {
            segment_id: format!("{}-{}", seg.segment_id, i),
            video_id: seg.video_id.clone(),
            start_sec: start,
            end_sec: end,
            text: ensure_terminated(sent),
            words: sent_words.filter(|w| !w.is_empty()),
        });
        current_start = end;
    }

    result
}

/// Last resort for an unsplittable run of text: break at word boundaries
/// so no emitted piece exceeds the limits.
fn hard_split_segment(seg: &RawSegment, limits: &ChunkingLimits) -> Vec<RawSegment> {
    match seg.words.as_deref() {
        Some(words) if !words.is_empty() => {
            let mut out = Vec::new();
            let mut piece: Vec<&Word> = Vec::new();
            let mut piece_chars = 0usize;

            for w in words {
                let wlen = w.word.chars().count();
                let cand_chars = if piece.is_empty() {
                    wlen
                } else {
                    piece_chars + 1 + wlen
                };
                let cand_dur = piece.first().map(|f| w.end - f.start).unwrap_or(0.0);
                if !piece.is_empty()
                    && (cand_chars + 1 > limits.max_chars || cand_dur > limits.max_seconds)
                {
                    out.push(segment_from_words(seg, out.len(), &piece));
                    piece.clear();
                    piece_chars = 0;
                }
                piece_chars = if piece.is_empty() {
                    wlen
                } else {
                    piece_chars + 1 + wlen
                };
                piece.push(w);
            }
            if !piece.is_empty() {
                out.push(segment_from_words(seg, out.len(), &piece));
            }
            out
        }
        _ => hard_split_text(&seg.text, seg.start_sec, seg.end_sec, limits)
            .into_iter()
            .enumerate()
            .map(|(i, (text, start, end))| RawSegment {
                segment_id: format!("{}-{}", seg.segment_id, i),
                video_id: seg.video_id.clone(),
                start_sec: start,
                end_sec: end,
                text,
                words: None,
            })
            .collect(),
    }
}

fn segment_from_words(seg: &RawSegment, ordinal: usize, piece: &[&Word]) -> RawSegment {
    let text = piece
        .iter()
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    RawSegment {
        segment_id: format!("{}-{}", seg.segment_id, ordinal),
        video_id: seg.video_id.clone(),
        start_sec: piece[0].start,
        end_sec: piece[piece.len() - 1].end,
        text: ensure_terminated(&text),
        words: Some(piece.iter().map(|w| (*w).clone()).collect()),
    }
}

/// Split text at whitespace into pieces within the limits, distributing
/// the duration by character share. Used when no word grid exists.
pub(crate) fn hard_split_text(
    text: &str,
    start: f64,
    end: f64,
    limits: &ChunkingLimits,
) -> Vec<(String, f64, f64)> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let duration = end - start;
    let total_chars: usize = tokens.iter().map(|t| t.chars().count()).sum();
    let per_char = if total_chars > 0 {
        duration / total_chars as f64
    } else {
        0.0
    };

    let mut out: Vec<(String, f64, f64)> = Vec::new();
    let mut piece: Vec<&str> = Vec::new();
    let mut piece_chars = 0usize;
    let mut piece_start = start;

    let mut flush = |piece: &mut Vec<&str>, piece_chars: &mut usize, piece_start: &mut f64| {
        if piece.is_empty() {
            return;
        }
        let piece_end = *piece_start + *piece_chars as f64 * per_char;
        out.push((
            ensure_terminated(&piece.join(" ")),
            *piece_start,
            piece_end,
        ));
        *piece_start = piece_end;
        piece.clear();
        *piece_chars = 0;
    };

    for tok in &tokens {
        let tlen = tok.chars().count();
        let cand_chars = if piece.is_empty() {
            tlen
        } else {
            piece_chars + 1 + tlen
        };
        let cand_dur = cand_chars as f64 * per_char;
        if !piece.is_empty()
            && (cand_chars + 1 > limits.max_chars || cand_dur > limits.max_seconds)
        {
            flush(&mut piece, &mut piece_chars, &mut piece_start);
        }
        piece_chars = if piece.is_empty() {
            tlen
        } else {
            piece_chars + 1 + tlen
        };
        piece.push(tok);
    }
    flush(&mut piece, &mut piece_chars, &mut piece_start);

    // Close out the span exactly.
    if let Some(last) = out.last_mut() {
        last.2 = end;
    }
    out
}

//! Locale-aware sentence segmentation.
//!
//! Splits on `.!?` followed by whitespace and a capital letter, after
//! masking common Russian abbreviations so they do not produce false
//! boundaries. The masks are byte-length-preserving, so split positions
//! computed on the masked text apply directly to the original.

use regex::Regex;
use std::sync::OnceLock;

/// Abbreviation → mask pairs. Every mask has the same byte length as its
/// abbreviation (Cyrillic upper/lower case are both two bytes, '.' and '_'
/// one byte each). Longer forms first so `и.т.д.` masks before `т.д.`.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("и.т.д.", "И_Т_Д_"),
    ("млрд.", "МЛРД_"),
    ("руб.", "РУБ_"),
    ("млн.", "МЛН_"),
    ("тыс.", "ТЫС_"),
    ("т.е.", "Т_Е_"),
    ("т.д.", "Т_Д_"),
    ("т.п.", "Т_П_"),
    ("др.", "ДР_"),
    ("г.", "Г_"),
];

fn abbreviation_patterns() -> &'static Vec<(Regex, &'static str)> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ABBREVIATIONS
            .iter()
            .map(|(abbrev, mask)| {
                let pattern = format!("(?i){}", regex::escape(abbrev));
                (Regex::new(&pattern).expect("static abbreviation pattern"), *mask)
            })
            .collect()
    })
}

/// Mask abbreviations without changing byte offsets.
fn protect(text: &str) -> String {
    let mut protected = text.to_string();
    for (pattern, mask) in abbreviation_patterns() {
        protected = pattern.replace_all(&protected, *mask).into_owned();
    }
    debug_assert_eq!(protected.len(), text.len());
    protected
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_capital(c: char) -> bool {
    c.is_uppercase()
}

/// Byte ranges of sentences in `text`, trimmed to non-whitespace.
///
/// Sentences shorter than `glue_under` characters are glued to a neighbor
/// rather than dropped, so no text is lost.
pub fn sentence_spans(text: &str, glue_under: usize) -> Vec<(usize, usize)> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let protected = protect(text);
    let chars: Vec<(usize, char)> = protected.char_indices().collect();

    // Boundary after a terminator run followed by whitespace and a capital.
    let mut boundaries = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if is_terminator(chars[i].1) {
            let mut j = i + 1;
            while j < chars.len() && is_terminator(chars[j].1) {
                j += 1;
            }
            let ws_start = j;
            while j < chars.len() && chars[j].1.is_whitespace() {
                j += 1;
            }
            if j > ws_start && j < chars.len() && is_capital(chars[j].1) {
                boundaries.push(chars[j].0);
                i = j;
                continue;
            }
            i = j.max(i + 1);
        } else {
            i += 1;
        }
    }

    let mut spans = Vec::new();
    let mut start = 0;
    for b in boundaries {
        spans.push((start, b));
        start = b;
    }
    spans.push((start, text.len()));

    // Trim each span to its non-whitespace extent.
    let mut trimmed: Vec<(usize, usize)> = spans
        .into_iter()
        .filter_map(|(s, e)| trim_span(text, s, e))
        .collect();

    // Glue short sentences to their neighbor instead of losing them.
    let mut glued: Vec<(usize, usize)> = Vec::new();
    for span in trimmed.drain(..) {
        let len = text[span.0..span.1].chars().count();
        match glued.last_mut() {
            Some(prev) if len < glue_under => prev.1 = span.1,
            _ => glued.push(span),
        }
    }
    // A short leading sentence has no predecessor; glue it forward.
    if glued.len() > 1 && text[glued[0].0..glued[0].1].chars().count() < glue_under {
        glued[0].1 = glued[1].1;
        glued.remove(1);
    }

    glued
}

/// Merge adjacent sentence spans until each reaches `min_chars`, so a run
/// of clipped utterances does not flood the grouping stage.
pub fn merge_short_spans(
    text: &str,
    spans: Vec<(usize, usize)>,
    min_chars: usize,
) -> Vec<(usize, usize)> {
    if spans.is_empty() {
        return spans;
    }

    let mut result: Vec<(usize, usize)> = Vec::new();
    let mut current = spans[0];
    for span in spans.into_iter().skip(1) {
        if text[current.0..current.1].chars().count() < min_chars {
            current.1 = span.1;
        } else {
            result.push(current);
            current = span;
        }
    }
    result.push(current);
    result
}

fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let offset = slice.find(trimmed).unwrap_or(0);
    Some((start + offset, start + offset + trimmed.len()))
}

/// Append a terminator when the text does not already end in one.
pub fn ensure_terminated(text: &str) -> String {
    match text.chars().last() {
        Some(c) if is_terminator(c) => text.to_string(),
        Some(_) => format!("{}.", text),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(text: &str) -> Vec<&str> {
        sentence_spans(text, 10)
            .into_iter()
            .map(|(s, e)| &text[s..e])
            .collect()
    }

    #[test]
    fn test_basic_split() {
        let text = "Первое предложение закончилось. Второе предложение тоже. Third one here.";
        let sents = sentences(text);
        assert_eq!(sents.len(), 3);
        assert_eq!(sents[0], "Первое предложение закончилось.");
        assert_eq!(sents[2], "Third one here.");
    }

    #[test]
    fn test_abbreviations_do_not_split() {
        let text = "Это стоит 5 млн. руб. примерно. Новая мысль начинается здесь.";
        let sents = sentences(text);
        assert_eq!(sents.len(), 2);
        assert!(sents[0].contains("млн. руб."));
    }

    #[test]
    fn test_no_split_before_lowercase() {
        let text = "Сокращение т.е. вот такое продолжается дальше без разрыва.";
        let sents = sentences(text);
        assert_eq!(sents.len(), 1);
    }

    #[test]
    fn test_short_sentences_glued_not_dropped() {
        let text = "Да. Вот это уже нормальное длинное предложение. Ага. Продолжение мысли идёт здесь.";
        let spans = sentence_spans(text, 10);
        let total: String = spans.iter().map(|&(s, e)| &text[s..e]).collect::<Vec<_>>().join(" ");
        assert!(total.contains("Да."));
        assert!(total.contains("Ага."));
        // "Да." glued forward, "Ага." glued to a neighbor
        for (s, e) in &spans {
            assert!(text[*s..*e].chars().count() >= 10);
        }
    }

    #[test]
    fn test_merge_short_spans() {
        let text = "Короткая фраза. Ещё одна короткая. Зато здесь длинное предложение с достаточным числом символов.";
        let spans = sentence_spans(text, 10);
        let merged = merge_short_spans(text, spans, 40);
        assert!(!merged.is_empty());
        // All but the last reach the minimum
        for (s, e) in &merged[..merged.len() - 1] {
            assert!(text[*s..*e].chars().count() >= 40);
        }
    }

    #[test]
    fn test_ensure_terminated() {
        assert_eq!(ensure_terminated("Hello"), "Hello.");
        assert_eq!(ensure_terminated("Hello!"), "Hello!");
        assert_eq!(ensure_terminated(""), "");
    }

    #[test]
    fn test_exclamation_and_question_boundaries() {
        let text = "Неужели это работает?! Конечно работает без всяких сомнений.";
        let sents = sentences(text);
        assert_eq!(sents.len(), 2);
    }
}

//! Sentence-aware splitting of narration text and analytic duration estimates.

use once_cell::sync::Lazy;
use regex::Regex;

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));

const WORDS_PER_MINUTE: f64 = 150.0;
const SENTENCE_PAUSE_SECS: f64 = 0.5;
const CLAUSE_PAUSE_SECS: f64 = 0.25;

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `paragraph` after every `.`, `!` or `?` that is followed by whitespace.
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        let mut next_start = end;
        while let Some(&(j, w)) = chars.peek() {
            if !w.is_whitespace() {
                break;
            }
            next_start = j + w.len_utf8();
            chars.next();
        }
        if next_start > end {
            sentences.push(&paragraph[start..end]);
            start = next_start;
        }
    }
    if start < paragraph.len() {
        sentences.push(&paragraph[start..]);
    }
    sentences
}

/// Split `text` into chunks of at most `max_chunk_size` characters.
///
/// Paragraphs are split first, then sentences, which are packed greedily. A
/// single sentence longer than `max_chunk_size` becomes its own oversized
/// chunk.
pub fn split_into_chunks(text: &str, max_chunk_size: usize) -> Vec<String> {
    if char_len(text) <= max_chunk_size {
        return vec![text.to_string()];
    }

    let paragraphs: Vec<&str> = PARAGRAPH_BREAK.split(text).collect();
    let mut chunks = Vec::new();
    let mut current = String::new();

    for (idx, paragraph) in paragraphs.iter().enumerate() {
        for sentence in split_sentences(paragraph) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }

            let sep = if current.is_empty() { 0 } else { 1 };
            let potential_len = char_len(&current) + sep + char_len(sentence);
            if potential_len > max_chunk_size && !current.is_empty() {
                chunks.push(current.trim().to_string());
                current = sentence.to_string();
            } else {
                if sep == 1 {
                    current.push(' ');
                }
                current.push_str(sentence);
            }
        }

        if !current.is_empty() && idx + 1 < paragraphs.len() {
            current.push_str("\n\n");
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        chunks.push(tail.to_string());
    }
    chunks
}

/// Estimated playback length in seconds.
///
/// 150 words per minute scaled by `speed`, plus half a second per sentence
/// stop and a quarter second per clause mark.
pub fn estimate_duration_secs(text: &str, speed: f64) -> f64 {
    let words = text.split_whitespace().count() as f64;
    let stops = text.chars().filter(|c| matches!(c, '.' | '!' | '?')).count() as f64;
    let clauses = text.chars().filter(|c| matches!(c, ',' | ';' | ':')).count() as f64;

    let base = words / (WORDS_PER_MINUTE * speed) * 60.0;
    base + stops * SENTENCE_PAUSE_SECS + clauses * CLAUSE_PAUSE_SECS
}

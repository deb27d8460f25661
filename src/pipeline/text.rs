//! Text handling between OCR and translation: merge, clean, chunk, context.
//!
//! All functions here are pure.
//!
//! ## Chunking
//!
//! [`split_chunks`] tokenises on Unicode whitespace and groups words into
//! chunks of at most `max_words`. Words inside a chunk are re-joined with a
//! single space, so joining all chunk texts with `" "` reproduces the
//! whitespace-normalised input exactly. Empty or whitespace-only input yields
//! **zero** chunks.
//!
//! ## Context
//!
//! [`last_n_words`] builds the trailing context for chunk `i` from the
//! *source* text of chunk `i - 1`, never from its translation, so every chunk
//! can be translated in parallel.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A contiguous, word-bounded slice of the merged document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-indexed position in the document.
    pub index: usize,
    pub text: String,
}

static RE_MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Join page texts in page order and clean the result.
///
/// Empty pages (failed OCR) still contribute their separator, so the page
/// boundary survives until cleaning collapses it.
pub fn merge_pages<S: AsRef<str>>(pages: &[S]) -> String {
    let joined = pages
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n");
    clean_text(&joined)
}

/// Strip undecodable and invisible code points, then collapse every run of
/// two or more whitespace characters into a single space.
pub fn clean_text(input: &str) -> String {
    let stripped = input.replace(
        [
            '\u{FFFD}', '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    );
    RE_MULTI_SPACE.replace_all(&stripped, " ").into_owned()
}

/// Partition `text` into ordered chunks of at most `max_words` words.
///
/// `max_words` of 0 is treated as 1.
pub fn split_chunks(text: &str, max_words: usize) -> Vec<Chunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_words.max(1))
        .enumerate()
        .map(|(index, group)| Chunk {
            index,
            text: group.join(" "),
        })
        .collect()
}

/// The last `n` whitespace-delimited words of `text`, joined by single
/// spaces. Returns every word when `text` has fewer than `n`.
pub fn last_n_words(text: &str, n: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(n);
    words[start..].join(" ")
}

/// Context for each chunk: empty for the first, otherwise the tail of the
/// previous chunk's source text.
pub fn chunk_contexts(chunks: &[Chunk], context_words: usize) -> Vec<String> {
    (0..chunks.len())
        .map(|i| {
            if i == 0 {
                String::new()
            } else {
                last_n_words(&chunks[i - 1].text, context_words)
            }
        })
        .collect()
}

/// Whitespace-delimited word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

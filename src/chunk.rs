//! Recursive character text splitter.
//!
//! Splits page text into overlapping [`Chunk`]s of at most `chunk_size`
//! characters. Boundaries are tried in preference order
//! ([`SEPARATORS`]): paragraph, line, sentence period, space, and finally
//! a hard cut between characters. Neighbouring chunks share up to
//! `chunk_overlap` characters so a passage cut at a boundary still
//! appears whole in one of them.
//!
//! # Algorithm
//!
//! 1. Pick the first separator present in the text (the empty separator
//!    always matches).
//! 2. Split on it, keeping the separator at the end of each piece.
//! 3. Pieces shorter than `chunk_size` are buffered; oversized pieces are
//!    split recursively with the remaining separators.
//! 4. Buffered pieces are merged greedily into chunks; when a chunk is
//!    emitted, pieces are dropped from the front of the window until at
//!    most `chunk_overlap` characters remain to seed the next one.
//!
//! # Example
//!
//! ```rust
//! use study_harness::chunk::split_pages;
//!
//! let pages = vec!["Hello world.\n\nSecond paragraph.".to_string()];
//! let chunks = split_pages("notes.pdf", &pages, 1000, 200);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].page, 0);
//! ```

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::models::Chunk;

/// Split boundaries, most preferred first.
pub const SEPARATORS: [&str; 5] = ["\n\n", "\n", ".", " ", ""];

/// Split every page of a document into chunks.
///
/// Chunk indices are contiguous across the whole document, starting at 0.
/// Pages with no text contribute no chunks.
pub fn split_pages(
    source: &str,
    pages: &[String],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for (page, text) in pages.iter().enumerate() {
        for piece in split_text(text, chunk_size, chunk_overlap) {
            chunks.push(make_chunk(source, page, chunk_index, piece));
            chunk_index += 1;
        }
    }

    chunks
}

/// Split a single text into chunk strings.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size.saturating_sub(1));
    split_recursive(text, &SEPARATORS, chunk_size, chunk_overlap)
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let (pos, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
        .map(|(i, sep)| (i, *sep))
        .unwrap_or((separators.len().saturating_sub(1), ""));
    let remaining = if pos + 1 < separators.len() {
        &separators[pos + 1..]
    } else {
        &[][..]
    };

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(|c| c.to_string()).collect()
    } else {
        text.split_inclusive(separator)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut out = Vec::new();
    let mut buffered: Vec<String> = Vec::new();

    for piece in pieces {
        if char_len(&piece) < chunk_size {
            buffered.push(piece);
            continue;
        }
        if !buffered.is_empty() {
            out.extend(merge_pieces(&buffered, chunk_size, chunk_overlap));
            buffered.clear();
        }
        if remaining.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        } else {
            out.extend(split_recursive(&piece, remaining, chunk_size, chunk_overlap));
        }
    }

    if !buffered.is_empty() {
        out.extend(merge_pieces(&buffered, chunk_size, chunk_overlap));
    }

    out
}

fn merge_pieces(pieces: &[String], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        if total + len > chunk_size && !window.is_empty() {
            push_joined(&mut out, &window);
            while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }
        window.push_back(piece);
        total += len;
    }

    push_joined(&mut out, &window);
    out
}

fn push_joined(out: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(source: &str, page: usize, index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        source: source.to_string(),
        page,
        chunk_index: index,
        text,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{:02}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 1000, 200);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(split_text("", 1000, 200).is_empty());
        assert!(split_text("   \n\n  ", 1000, 200).is_empty());
    }

    #[test]
    fn chunks_respect_size() {
        let text = words(200);
        for chunk in split_text(&text, 50, 10) {
            assert!(chunk.chars().count() <= 50, "oversized chunk: {:?}", chunk);
        }
    }

    #[test]
    fn neighbours_overlap() {
        let text = words(60);
        let chunks = split_text(&text, 50, 20);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let first_word = pair[1].split_whitespace().next().unwrap();
            assert!(
                pair[0].contains(first_word),
                "{:?} does not overlap {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn zero_overlap_has_no_shared_words() {
        let text = words(40);
        let chunks = split_text(&text, 30, 0);
        for pair in chunks.windows(2) {
            let first_word = pair[1].split_whitespace().next().unwrap();
            assert!(!pair[0].contains(first_word));
        }
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let para_a = "a".repeat(30);
        let para_b = "b".repeat(30);
        let text = format!("{}\n\n{}", para_a, para_b);
        let chunks = split_text(&text, 40, 0);
        assert_eq!(chunks, vec![para_a, para_b]);
    }

    #[test]
    fn hard_cut_without_separators() {
        let text = "x".repeat(25);
        let chunks = split_text(&text, 10, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn multibyte_text_is_not_split_mid_char() {
        let text = "é".repeat(25);
        let chunks = split_text(&text, 10, 2);
        for c in &chunks {
            assert!(c.chars().count() <= 10);
        }
    }

    #[test]
    fn indices_contiguous_across_pages() {
        let pages = vec![words(40), String::new(), words(40)];
        let chunks = split_pages("notes.pdf", &pages, 60, 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.source, "notes.pdf");
            assert_ne!(c.page, 1, "empty page produced a chunk");
        }
        assert!(chunks.iter().any(|c| c.page == 2));
    }

    #[test]
    fn deterministic() {
        let pages = vec![words(100)];
        let c1 = split_pages("a.pdf", &pages, 80, 20);
        let c2 = split_pages("a.pdf", &pages, 80, 20);
        assert_eq!(c1, c2);
    }
}
